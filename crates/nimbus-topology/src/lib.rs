//! Secure topology layer (spec.md §4.2): deterministic overlay-VPN
//! addressing, bastion boot-script rendering, and the flat peer-table mesh.

use thiserror::Error;

pub mod addressing;
pub mod bastion;
pub mod mesh;

#[derive(Debug, Error)]
pub enum TopologyError {
    #[error(transparent)]
    Addressing(#[from] addressing::AddressingError),
    #[error("failed to render topology template: {0}")]
    TemplateRender(String),
}

pub use addressing::{allocate_masters, allocate_workers, bastion_address, gateway_address};
pub use bastion::{render_boot_script, render_salt_master_config, BastionContext};
pub use mesh::{generate_keypair, render_peer_config, PeerConfigContext, PeerEntry, PeerKeyPair, PeerTable};

/// Precomputes every node's overlay address up front, masters then workers,
/// sorted pool order (spec.md §4.5) — done before any node is created so
/// cloud-init user-data can embed its own peer table at boot (spec.md §4.2
/// "Address allocation").
pub fn precompute_addresses(
    overlay_cidr: &str,
    master_pool_names: &[(&str, u32)],
    worker_pool_names: &[(&str, u32)],
) -> Result<std::collections::BTreeMap<String, String>, TopologyError> {
    let mut out = std::collections::BTreeMap::new();
    let mut master_index = 0usize;
    let mut sorted_masters: Vec<_> = master_pool_names.to_vec();
    sorted_masters.sort_by(|a, b| a.0.cmp(b.0));
    for (pool, count) in &sorted_masters {
        let addrs = allocate_masters(overlay_cidr, master_index, *count as usize)?;
        for (i, addr) in addrs.into_iter().enumerate() {
            out.insert(format!("{}-{}", pool, i), addr);
        }
        master_index += *count as usize;
    }
    let mut worker_index = 0usize;
    let mut sorted_workers: Vec<_> = worker_pool_names.to_vec();
    sorted_workers.sort_by(|a, b| a.0.cmp(b.0));
    for (pool, count) in &sorted_workers {
        let addrs = allocate_workers(overlay_cidr, worker_index, *count as usize)?;
        for (i, addr) in addrs.into_iter().enumerate() {
            out.insert(format!("{}-{}", pool, i), addr);
        }
        worker_index += *count as usize;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precompute_is_deterministic_across_pools() {
        let masters = vec![("control-b", 1u32), ("control-a", 1u32)];
        let workers = vec![("workers-b", 2u32), ("workers-a", 1u32)];
        let first = precompute_addresses("10.8.0.0/24", &masters, &workers).unwrap();
        let second = precompute_addresses("10.8.0.0/24", &masters, &workers).unwrap();
        assert_eq!(first, second);
        // control-a sorts before control-b, so it gets the lower addresses.
        assert_eq!(first.get("control-a-0"), Some(&"10.8.0.10".to_string()));
        assert_eq!(first.get("control-b-0"), Some(&"10.8.0.11".to_string()));
        assert_eq!(first.get("workers-a-0"), Some(&"10.8.0.30".to_string()));
    }
}
