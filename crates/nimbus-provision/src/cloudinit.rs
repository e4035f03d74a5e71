//! Cloud-init script generation (spec.md §4.4 "Cloud-init script
//! contract"). Same content for every provider; only the wire encoding
//! differs (plain on AWS/DO/Hetzner, base64 on Azure/Linode — handled by
//! `nimbus-providers`, not here). The rendered script is idempotent: a
//! second run finds every package already installed and every file already
//! written, so `runcmd` entries are themselves no-ops on reapply.

use tera::{Context, Tera};

use crate::error::ProvisionError;

const CLOUD_INIT_TEMPLATE: &str = include_str!("../templates/cloud_init.yaml.tera");

pub struct CloudInitInput<'a> {
    pub node_name: &'a str,
    pub cluster_name: &'a str,
    pub role: &'a str,
    pub vpn_ipv4: &'a str,
    /// `Some` once the bastion's Salt master is up; nodes booted before
    /// that point get `None` and join later via a re-render.
    pub salt_master_address: Option<&'a str>,
    pub cluster_token: &'a str,
}

pub fn render_cloud_init(input: &CloudInitInput) -> Result<String, ProvisionError> {
    let mut tera = Tera::default();
    tera.add_raw_template("cloud_init.yaml", CLOUD_INIT_TEMPLATE)
        .map_err(|e| ProvisionError::TemplateRender(e.to_string()))?;
    let mut ctx = Context::new();
    ctx.insert("node_name", input.node_name);
    ctx.insert("cluster_name", input.cluster_name);
    ctx.insert("role", input.role);
    ctx.insert("vpn_ipv4", input.vpn_ipv4);
    ctx.insert("salt_master_address", &input.salt_master_address);
    ctx.insert("cluster_token", input.cluster_token);
    tera.render("cloud_init.yaml", &ctx)
        .map_err(|e| ProvisionError::TemplateRender(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_forwarding_and_packages() {
        let script = render_cloud_init(&CloudInitInput {
            node_name: "m1",
            cluster_name: "demo",
            role: "master",
            vpn_ipv4: "10.8.0.10",
            salt_master_address: None,
            cluster_token: "tok",
        })
        .unwrap();
        assert!(script.contains("ip_forward=1"));
        assert!(script.contains("wireguard"));
        assert!(!script.contains("salt-minion"));
    }

    #[test]
    fn renders_minion_config_when_master_known() {
        let script = render_cloud_init(&CloudInitInput {
            node_name: "w1",
            cluster_name: "demo",
            role: "worker",
            vpn_ipv4: "10.8.0.30",
            salt_master_address: Some("10.8.0.5"),
            cluster_token: "tok",
        })
        .unwrap();
        assert!(script.contains("master: 10.8.0.5"));
        assert!(script.contains("salt-minion"));
        assert!(script.contains("tok"));
    }
}
