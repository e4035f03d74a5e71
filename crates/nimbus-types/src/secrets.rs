//! Secrets envelope (spec.md §3) plus the generators spec.md §4.4/§8 call
//! for: the per-deployment cluster token and random admin passwords.
//!
//! Encryption at rest follows the `aes-gcm`/`argon2` pairing: argon2
//! derives a symmetric key from an operator passphrase, aes-gcm seals the
//! envelope under it. See DESIGN.md for where this pairing is grounded.

use std::time::{SystemTime, UNIX_EPOCH};

use aes_gcm::aead::{Aead, KeyInit, OsRng as AeadOsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::Argon2;
use rand::rngs::OsRng;
use rand::RngCore;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SecretsError {
    #[error("encryption failed")]
    Encrypt,
    #[error("decryption failed: wrong passphrase or corrupted blob")]
    Decrypt,
}

/// SSH private key, cloud tokens, cluster token, Salt API password,
/// WireGuard private keys — stored only inside the stack's encrypted blob.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecretsEnvelope {
    /// Base64 ciphertext; empty until `seal` is called.
    pub ciphertext_b64: String,
    /// Base64 salt used for the Argon2 key derivation.
    pub salt_b64: String,
    /// Base64 AES-GCM nonce.
    pub nonce_b64: String,
}

/// The plaintext secrets payload, never logged and never written
/// unencrypted to the stack blob (spec.md §3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecretsPayload {
    pub ssh_private_key: String,
    pub cloud_tokens: std::collections::BTreeMap<String, String>,
    pub cluster_token: String,
    pub salt_api_password: String,
    pub wireguard_private_keys: std::collections::BTreeMap<String, String>,
}

impl SecretsEnvelope {
    /// Encrypts `payload` with a key derived from `passphrase` via Argon2.
    pub fn seal(payload: &SecretsPayload, passphrase: &str) -> Result<Self, SecretsError> {
        let mut salt = [0u8; 16];
        OsRng.fill_bytes(&mut salt);
        let key = derive_key(passphrase, &salt)?;
        let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| SecretsError::Encrypt)?;
        let mut nonce_bytes = [0u8; 12];
        AeadOsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let plaintext = serde_json::to_vec(payload).map_err(|_| SecretsError::Encrypt)?;
        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_ref())
            .map_err(|_| SecretsError::Encrypt)?;
        Ok(SecretsEnvelope {
            ciphertext_b64: base64_encode(&ciphertext),
            salt_b64: base64_encode(&salt),
            nonce_b64: base64_encode(&nonce_bytes),
        })
    }

    pub fn open(&self, passphrase: &str) -> Result<SecretsPayload, SecretsError> {
        if self.ciphertext_b64.is_empty() {
            return Ok(SecretsPayload::default());
        }
        let salt = base64_decode(&self.salt_b64).map_err(|_| SecretsError::Decrypt)?;
        let nonce_bytes = base64_decode(&self.nonce_b64).map_err(|_| SecretsError::Decrypt)?;
        let ciphertext = base64_decode(&self.ciphertext_b64).map_err(|_| SecretsError::Decrypt)?;
        let key = derive_key(passphrase, &salt)?;
        let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| SecretsError::Decrypt)?;
        let nonce = Nonce::from_slice(&nonce_bytes);
        let plaintext = cipher
            .decrypt(nonce, ciphertext.as_ref())
            .map_err(|_| SecretsError::Decrypt)?;
        serde_json::from_slice(&plaintext).map_err(|_| SecretsError::Decrypt)
    }
}

fn derive_key(passphrase: &str, salt: &[u8]) -> Result<[u8; 32], SecretsError> {
    let mut key = [0u8; 32];
    Argon2::default()
        .hash_password_into(passphrase.as_bytes(), salt, &mut key)
        .map_err(|_| SecretsError::Encrypt)?;
    Ok(key)
}

fn base64_encode(data: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(data)
}

fn base64_decode(data: &str) -> Result<Vec<u8>, base64::DecodeError> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.decode(data)
}

/// `sha256(clusterName || "-" || stackName || "-" || monotonicNow())[0..32]`
/// hex (spec.md §4.4). Generated once per deployment; never logged.
pub fn generate_cluster_token(cluster_name: &str, stack_name: &str) -> String {
    let now_nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let mut extra = [0u8; 16];
    OsRng.fill_bytes(&mut extra);
    let input = format!("{}-{}-{}-{}", cluster_name, stack_name, now_nanos, hex::encode(extra));
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(digest)[..32].to_string()
}

const PASSWORD_ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Random admin password: length 16, drawn from `PASSWORD_ALPHABET` (no
/// whitespace, no control characters; spec.md §8).
pub fn generate_admin_password() -> String {
    let mut rng = rand::thread_rng();
    (0..16)
        .map(|_| *PASSWORD_ALPHABET.choose(&mut rng).unwrap() as char)
        .collect()
}

// Minimal inline hex encoder so we don't pull in the `hex` crate for two
// call sites; kept private to this module.
mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        let mut s = String::with_capacity(bytes.as_ref().len() * 2);
        for b in bytes.as_ref() {
            s.push_str(&format!("{:02x}", b));
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn seal_open_roundtrip() {
        let payload = SecretsPayload {
            ssh_private_key: "-----BEGIN KEY-----".into(),
            cluster_token: "deadbeef".into(),
            ..Default::default()
        };
        let envelope = SecretsEnvelope::seal(&payload, "correct horse").unwrap();
        let opened = envelope.open("correct horse").unwrap();
        assert_eq!(opened.ssh_private_key, payload.ssh_private_key);
        assert_eq!(opened.cluster_token, payload.cluster_token);
    }

    #[test]
    fn wrong_passphrase_fails() {
        let payload = SecretsPayload::default();
        let envelope = SecretsEnvelope::seal(&payload, "right").unwrap();
        assert!(envelope.open("wrong").is_err());
    }

    #[test]
    fn cluster_tokens_are_distinct() {
        let mut seen = BTreeSet::new();
        for _ in 0..64 {
            let t = generate_cluster_token("demo", "prod");
            assert_eq!(t.len(), 32);
            assert!(seen.insert(t));
        }
    }

    #[test]
    fn admin_passwords_meet_shape_constraints() {
        let mut seen = BTreeSet::new();
        for _ in 0..1000 {
            let p = generate_admin_password();
            assert_eq!(p.len(), 16);
            assert!(p.chars().all(|c| c.is_ascii_alphanumeric()));
            assert!(!p.chars().any(|c| c.is_whitespace() || c.is_control()));
            seen.insert(p);
        }
        assert!(seen.len() >= 995);
    }
}
