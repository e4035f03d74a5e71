//! Cost estimator (spec.md §4.7): a pure function of the cluster
//! description and a per-provider price table. No network calls, no
//! caching beyond what the caller chooses to keep around a single run.

use std::collections::BTreeMap;

use nimbus_types::description::{ClusterDescription, CostLimits, ProviderKind};

#[derive(Debug, Clone, Copy)]
pub struct SizePrice {
    pub hourly_on_demand_usd: f64,
    pub hourly_spot_usd: f64,
}

/// Flat table keyed by `(provider, size)`; callers load this from whatever
/// pricing source they trust (a vendored table, a provider pricing API). A
/// `default_price_table` with rough public list prices is provided for
/// stacks that never override it.
#[derive(Debug, Clone, Default)]
pub struct PriceTable {
    prices: BTreeMap<(ProviderKind, String), SizePrice>,
    pub storage_usd_per_gb_month: f64,
    pub load_balancer_hourly_usd: f64,
}

impl PriceTable {
    pub fn new(storage_usd_per_gb_month: f64, load_balancer_hourly_usd: f64) -> Self {
        PriceTable { prices: BTreeMap::new(), storage_usd_per_gb_month, load_balancer_hourly_usd }
    }

    pub fn set(&mut self, provider: ProviderKind, size: impl Into<String>, price: SizePrice) {
        self.prices.insert((provider, size.into()), price);
    }

    fn lookup(&self, provider: ProviderKind, size: &str) -> Option<SizePrice> {
        self.prices.get(&(provider, size.to_string())).copied()
    }

    /// Rough public on-demand list prices as of this table's authoring;
    /// meant as a starting point, not a source of truth.
    pub fn default_price_table() -> Self {
        let mut table = PriceTable::new(0.10, 0.015);
        table.set(ProviderKind::Aws, "t3.medium", SizePrice { hourly_on_demand_usd: 0.0416, hourly_spot_usd: 0.0125 });
        table.set(ProviderKind::Aws, "t3.large", SizePrice { hourly_on_demand_usd: 0.0832, hourly_spot_usd: 0.025 });
        table.set(ProviderKind::DigitalOcean, "s-2vcpu-4gb", SizePrice { hourly_on_demand_usd: 0.0298, hourly_spot_usd: 0.0298 });
        table.set(ProviderKind::DigitalOcean, "s-4vcpu-8gb", SizePrice { hourly_on_demand_usd: 0.0595, hourly_spot_usd: 0.0595 });
        table.set(ProviderKind::Linode, "g6-standard-2", SizePrice { hourly_on_demand_usd: 0.036, hourly_spot_usd: 0.036 });
        table.set(ProviderKind::Hetzner, "cx21", SizePrice { hourly_on_demand_usd: 0.0119, hourly_spot_usd: 0.0119 });
        table.set(ProviderKind::Azure, "Standard_B2s", SizePrice { hourly_on_demand_usd: 0.0416, hourly_spot_usd: 0.0125 });
        table
    }
}

#[derive(Debug, Clone)]
pub struct NodeCostEstimate {
    pub pool: String,
    pub count: u32,
    pub hourly_usd: f64,
    pub monthly_usd: f64,
    pub yearly_usd: f64,
    pub spot_monthly_savings_usd: f64,
    pub priced: bool,
}

pub const HOURS_PER_MONTH: f64 = 730.0;
pub const HOURS_PER_YEAR: f64 = 8760.0;

pub fn estimate_node_cost(pool_name: &str, count: u32, provider: ProviderKind, size: &str, spot: bool, table: &PriceTable) -> NodeCostEstimate {
    let price = table.lookup(provider, size);
    let (priced, on_demand, spot_price) = match price {
        Some(p) => (true, p.hourly_on_demand_usd, p.hourly_spot_usd),
        None => (false, 0.0, 0.0),
    };
    let effective_hourly = if spot { spot_price } else { on_demand };
    let hourly = effective_hourly * count as f64;
    let on_demand_monthly = on_demand * count as f64 * HOURS_PER_MONTH;
    let spot_monthly = spot_price * count as f64 * HOURS_PER_MONTH;
    NodeCostEstimate {
        pool: pool_name.to_string(),
        count,
        hourly_usd: hourly,
        monthly_usd: hourly * HOURS_PER_MONTH,
        yearly_usd: hourly * HOURS_PER_YEAR,
        spot_monthly_savings_usd: if spot { 0.0 } else { (on_demand_monthly - spot_monthly).max(0.0) },
        priced,
    }
}

#[derive(Debug, Clone)]
pub struct ClusterCostEstimate {
    pub nodes: Vec<NodeCostEstimate>,
    pub load_balancer_monthly_usd: f64,
    pub total_monthly_usd: f64,
    pub total_yearly_usd: f64,
    pub recommendations: Vec<String>,
}

/// Sums every pool plus the implicit control-plane load balancer, and
/// flags pools where `spot` is unset but a spot price is available, and
/// whether the total exceeds `CostLimits::monthly_budget_usd`.
pub fn estimate_cluster_cost(description: &ClusterDescription, table: &PriceTable) -> ClusterCostEstimate {
    let mut nodes = Vec::new();
    let mut recommendations = Vec::new();
    let mut total_monthly = 0.0;

    for (pool_name, pool) in description.master_pools().into_iter().chain(description.worker_pools()) {
        let estimate = estimate_node_cost(pool_name, pool.count, pool.provider, &pool.size, pool.spot, table);
        total_monthly += estimate.monthly_usd;
        if !estimate.priced {
            recommendations.push(format!("no price entry for {}/{} (pool '{}'); estimate excludes it", pool.provider.name(), pool.size, pool_name));
        } else if !pool.spot && estimate.spot_monthly_savings_usd > 0.0 {
            recommendations.push(format!(
                "pool '{}' could save ${:.2}/mo by switching to spot capacity",
                pool_name, estimate.spot_monthly_savings_usd
            ));
        }
        nodes.push(estimate);
    }

    let load_balancer_monthly = table.load_balancer_hourly_usd * HOURS_PER_MONTH;
    total_monthly += load_balancer_monthly;

    if let CostLimits { monthly_budget_usd: Some(budget) } = &description.lifecycle.cost {
        if total_monthly > *budget {
            recommendations.push(format!("estimated ${:.2}/mo exceeds the configured budget of ${:.2}/mo", total_monthly, budget));
        }
    }

    ClusterCostEstimate {
        nodes,
        load_balancer_monthly_usd: load_balancer_monthly,
        total_monthly_usd: total_monthly,
        total_yearly_usd: total_monthly * 12.0,
        recommendations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_types::description::{KubernetesSpec, LifecyclePolicies, Metadata, NodePool, Role, SecuritySpec};
    use std::collections::{BTreeMap, BTreeSet};

    fn description(spot: bool, budget: Option<f64>) -> ClusterDescription {
        let mut node_pools = BTreeMap::new();
        node_pools.insert(
            "masters".to_string(),
            NodePool {
                count: 3,
                roles: BTreeSet::from([Role::Master]),
                size: "t3.medium".to_string(),
                image: "ubuntu-22.04".to_string(),
                provider: ProviderKind::Aws,
                region: Some("us-east-1".to_string()),
                labels: BTreeMap::new(),
                taints: vec![],
                spot,
                az_distribution: vec![],
            },
        );
        let mut lifecycle = LifecyclePolicies::default();
        lifecycle.cost.monthly_budget_usd = budget;
        ClusterDescription {
            metadata: Metadata { name: "demo".into(), environment: "prod".into(), owner: None },
            providers: BTreeSet::from([ProviderKind::Aws]),
            network: Default::default(),
            security: SecuritySpec::default(),
            node_pools,
            kubernetes: KubernetesSpec { distribution: "rke2".into(), version: "1.27.1".into(), token: None, cni: "canal".into(), snapshot_schedule: None, high_availability: false },
            addons: vec![],
            lifecycle,
        }
    }

    #[test]
    fn unpriced_size_is_flagged_not_silently_zeroed() {
        let table = PriceTable::new(0.1, 0.01);
        let estimate = estimate_node_cost("masters", 3, ProviderKind::Aws, "made-up-size", false, &table);
        assert!(!estimate.priced);
        assert_eq!(estimate.hourly_usd, 0.0);
    }

    #[test]
    fn on_demand_pool_recommends_spot_when_cheaper() {
        let table = PriceTable::default_price_table();
        let result = estimate_cluster_cost(&description(false, None), &table);
        assert!(result.recommendations.iter().any(|r| r.contains("spot")));
    }

    #[test]
    fn over_budget_is_flagged() {
        let table = PriceTable::default_price_table();
        let result = estimate_cluster_cost(&description(false, Some(1.0)), &table);
        assert!(result.recommendations.iter().any(|r| r.contains("exceeds")));
    }

    #[test]
    fn monthly_and_yearly_totals_are_consistent() {
        let table = PriceTable::default_price_table();
        let result = estimate_cluster_cost(&description(true, None), &table);
        assert!((result.total_yearly_usd - result.total_monthly_usd * 12.0).abs() < 1e-6);
    }
}
