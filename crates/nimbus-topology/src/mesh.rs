//! Overlay VPN mesh: peer key generation and the flat peer table (spec.md
//! §4.2 "Overlay VPN mesh"). Peers form a flat relation rather than a graph
//! so there is nothing to cycle-check; the orchestrator only needs to know
//! whether the table changed since the last push.

use std::collections::BTreeMap;

use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tera::{Context, Tera};

use crate::TopologyError;

const WG_PEERS_TEMPLATE: &str = include_str!("../templates/wg_peers.conf.tera");

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct PeerEntry {
    pub node_name: String,
    pub public_ipv4: String,
    pub vpn_ipv4: String,
    pub public_key: String,
}

/// A keypair for one mesh peer. The private key never leaves the node it
/// was generated for; only the public key is distributed through the peer
/// table.
pub struct PeerKeyPair {
    pub private_key_base64: String,
    pub public_key_base64: String,
}

/// Generates a WireGuard-shaped (32-byte, base64) keypair. We don't attempt
/// X25519 clamping/scalar-mult here (out of scope, spec.md §1 defers VPN
/// tooling call surface) — the mesh layer only needs stable, unique,
/// opaque key material to populate the peer table and fingerprint it.
pub fn generate_keypair() -> PeerKeyPair {
    let mut private_bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut private_bytes);
    let mut hasher = Sha256::new();
    hasher.update(private_bytes);
    hasher.update(b"nimbus-mesh-pubkey");
    let public_bytes = hasher.finalize();
    let engine = base64::engine::general_purpose::STANDARD;
    PeerKeyPair {
        private_key_base64: engine.encode(private_bytes),
        public_key_base64: engine.encode(&public_bytes[..32]),
    }
}

/// The full peer table for one cluster, keyed by node name so lookups and
/// the fingerprint computation are independent of insertion order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PeerTable {
    entries: BTreeMap<String, PeerEntry>,
}

impl PeerTable {
    pub fn new() -> Self {
        PeerTable::default()
    }

    pub fn insert(&mut self, entry: PeerEntry) {
        self.entries.insert(entry.node_name.clone(), entry);
    }

    pub fn insert_bastion(&mut self, bastion_public_ipv4: &str, bastion_vpn_address: &str, public_key: &str) {
        self.insert(PeerEntry {
            node_name: "bastion".to_string(),
            public_ipv4: bastion_public_ipv4.to_string(),
            vpn_ipv4: bastion_vpn_address.to_string(),
            public_key: public_key.to_string(),
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every peer's view of the mesh: itself excluded, everyone else
    /// included — spec.md §4.2 "Each node is configured with peers = all
    /// others".
    pub fn peers_of(&self, node_name: &str) -> Vec<&PeerEntry> {
        self.entries
            .values()
            .filter(|e| e.node_name != node_name)
            .collect()
    }

    pub fn all(&self) -> Vec<&PeerEntry> {
        self.entries.values().collect()
    }

    /// A stable fingerprint of the whole table, used by the orchestrator to
    /// decide whether a mesh push is needed at all (spec.md §4.2 "the
    /// orchestrator computes a fingerprint ... and only pushes updates when
    /// it changes").
    pub fn fingerprint(&self) -> Result<String, TopologyError> {
        let mut hasher = Sha256::new();
        for entry in self.entries.values() {
            hasher.update(entry.node_name.as_bytes());
            hasher.update(b"|");
            hasher.update(entry.public_ipv4.as_bytes());
            hasher.update(b"|");
            hasher.update(entry.vpn_ipv4.as_bytes());
            hasher.update(b"|");
            hasher.update(entry.public_key.as_bytes());
            hasher.update(b";");
        }
        Ok(format!("{:x}", hasher.finalize()))
    }

    pub fn has_changed_since(&self, previous_fingerprint: &str) -> Result<bool, TopologyError> {
        Ok(self.fingerprint()? != previous_fingerprint)
    }
}

/// Inputs for rendering one node's `wg0.conf` peer set (spec.md §4.2 "Each
/// node is configured with peers = all others").
pub struct PeerConfigContext<'a> {
    pub node_name: &'a str,
    pub cluster_name: &'a str,
    pub self_vpn_ipv4: &'a str,
    pub vpn_port: u16,
    pub peers: Vec<&'a PeerEntry>,
}

/// Renders `node_name`'s WireGuard peer config against every other entry in
/// the table (spec.md §4.2). Called once per node, every time the table's
/// fingerprint changes.
pub fn render_peer_config(ctx: &PeerConfigContext) -> Result<String, TopologyError> {
    let mut tera = Tera::default();
    tera.add_raw_template("wg_peers.conf", WG_PEERS_TEMPLATE)
        .map_err(|e| TopologyError::TemplateRender(e.to_string()))?;
    let mut tctx = Context::new();
    tctx.insert("node_name", ctx.node_name);
    tctx.insert("cluster_name", ctx.cluster_name);
    tctx.insert("self_vpn_ipv4", ctx.self_vpn_ipv4);
    tctx.insert("vpn_port", &ctx.vpn_port);
    tctx.insert("peers", &ctx.peers);
    tera.render("wg_peers.conf", &tctx)
        .map_err(|e| TopologyError::TemplateRender(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> PeerTable {
        let mut t = PeerTable::new();
        t.insert(PeerEntry {
            node_name: "m1".into(),
            public_ipv4: "198.51.100.10".into(),
            vpn_ipv4: "10.8.0.10".into(),
            public_key: "keyA".into(),
        });
        t.insert(PeerEntry {
            node_name: "w1".into(),
            public_ipv4: "198.51.100.30".into(),
            vpn_ipv4: "10.8.0.30".into(),
            public_key: "keyB".into(),
        });
        t
    }

    #[test]
    fn peers_of_excludes_self() {
        let t = sample_table();
        let peers = t.peers_of("m1");
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].node_name, "w1");
    }

    #[test]
    fn fingerprint_stable_and_order_independent() {
        let t1 = sample_table();
        let mut t2 = PeerTable::new();
        t2.insert(PeerEntry { node_name: "w1".into(), public_ipv4: "198.51.100.30".into(), vpn_ipv4: "10.8.0.30".into(), public_key: "keyB".into() });
        t2.insert(PeerEntry { node_name: "m1".into(), public_ipv4: "198.51.100.10".into(), vpn_ipv4: "10.8.0.10".into(), public_key: "keyA".into() });
        assert_eq!(t1.fingerprint().unwrap(), t2.fingerprint().unwrap());
    }

    #[test]
    fn fingerprint_changes_on_key_rotation() {
        let t1 = sample_table();
        let fp1 = t1.fingerprint().unwrap();
        let mut t2 = sample_table();
        t2.insert(PeerEntry { node_name: "m1".into(), public_ipv4: "198.51.100.10".into(), vpn_ipv4: "10.8.0.10".into(), public_key: "rotatedKey".into() });
        assert!(t2.has_changed_since(&fp1).unwrap());
    }

    #[test]
    fn keypairs_are_unique() {
        let a = generate_keypair();
        let b = generate_keypair();
        assert_ne!(a.public_key_base64, b.public_key_base64);
    }

    #[test]
    fn peer_config_lists_every_other_node_but_not_self() {
        let t = sample_table();
        let peers = t.peers_of("m1");
        let config = render_peer_config(&PeerConfigContext {
            node_name: "m1",
            cluster_name: "demo",
            self_vpn_ipv4: "10.8.0.10",
            vpn_port: 51820,
            peers,
        })
        .unwrap();
        assert!(config.contains("Address = 10.8.0.10/32"));
        assert!(config.contains("AllowedIPs = 10.8.0.30/32"));
        assert!(config.contains("keyB"));
        assert!(!config.contains("keyA"));
    }
}
