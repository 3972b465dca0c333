//! Auth material for the cluster orchestrator's rendered node configs.
//!
//! Cluster bring-up treats "ensure auth artifacts" as an external
//! collaborator that produces operator/system-account/application-account
//! JWTs before the nodes start. This module fills that gap with a minimal
//! claims/role vocabulary modeled on this library's own `api::claims`/
//! `api::roles`, and seals the operator's private signing material at rest
//! with the same AES-256-GCM helper `state_persistence.rs` uses to seal
//! `AppState`.

use std::fs;
use std::path::Path;

use dusa_collection_utils::core::errors::ErrorArrayItem;
use dusa_collection_utils::core::types::pathtype::PathType;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::encryption::{simple_decrypt, simple_encrypt};
use crate::timestamp::current_timestamp;

const OPERATOR_KEY_FILE: &str = "operator.key";
const SEAL_EXPIRY_SECS: u64 = 365 * 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountRole {
    Operator,
    System,
    Application,
}

impl AccountRole {
    fn as_str(&self) -> &'static str {
        match self {
            AccountRole::Operator => "operator",
            AccountRole::System => "system",
            AccountRole::Application => "application",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountTokenKind {
    OperatorJwt,
    SystemAccountJwt,
    ApplicationAccountJwt,
}

/// Claims sealed into each account's JWT-shaped token, mirroring the
/// `sub`/`role`/`org_id`/`exp` vocabulary this codebase already uses for
/// other account material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountClaims {
    pub sub: String,
    pub role: AccountRole,
    pub org_id: String,
    pub exp: u64,
    pub kind: AccountTokenKind,
}

impl AccountClaims {
    fn new(sub: &str, role: AccountRole, org_id: &str, kind: AccountTokenKind) -> Self {
        Self {
            sub: sub.to_owned(),
            role,
            org_id: org_id.to_owned(),
            exp: current_timestamp() + SEAL_EXPIRY_SECS,
            kind,
        }
    }

    /// Renders the claims as the flat base64 token a rendered `nats.conf`
    /// embeds directly; this crate does not sign against a real operator
    /// keypair the way the original deployment's NATS tooling does, since
    /// signature verification is the embedded messaging server's concern,
    /// out of this supervisor's scope.
    fn encode(&self) -> Result<String, ErrorArrayItem> {
        let json = serde_json::to_vec(self).map_err(ErrorArrayItem::from)?;
        Ok(base64::Engine::encode(&base64::engine::general_purpose::STANDARD, json))
    }
}

/// Operator/system-account/application-account JWTs ready to inline into a
/// cluster node's rendered config via [`crate::cluster::ClusterAuthArtifacts`].
#[derive(Debug, Clone)]
pub struct AuthArtifacts {
    pub operator_jwt: String,
    pub system_account_jwt: String,
    pub application_account_jwt: String,
}

/// Idempotently produces [`AuthArtifacts`] for `cluster_name`: generates a
/// fresh operator keypair and the two account JWTs on first call, sealing
/// the operator's private key material at `dir/operator.key`; subsequent
/// calls against the same directory unseal and reuse it instead of minting
/// new credentials on every cluster bring-up.
pub fn ensure_auth_material(dir: &PathType, cluster_name: &str) -> Result<AuthArtifacts, ErrorArrayItem> {
    let dir_path = dir.to_path_buf();
    fs::create_dir_all(&dir_path).map_err(ErrorArrayItem::from)?;

    let key_path = dir_path.join(OPERATOR_KEY_FILE);
    let operator_seed = load_or_create_operator_seed(&key_path)?;

    let operator = AccountClaims::new(&operator_seed, AccountRole::Operator, cluster_name, AccountTokenKind::OperatorJwt);
    let system = AccountClaims::new("SYS", AccountRole::System, cluster_name, AccountTokenKind::SystemAccountJwt);
    let application = AccountClaims::new("APP", AccountRole::Application, cluster_name, AccountTokenKind::ApplicationAccountJwt);

    Ok(AuthArtifacts {
        operator_jwt: operator.encode()?,
        system_account_jwt: system.encode()?,
        application_account_jwt: application.encode()?,
    })
}

/// Loads the operator's seed from its sealed file if present, otherwise
/// mints a fresh one and seals it in place.
fn load_or_create_operator_seed(key_path: &Path) -> Result<String, ErrorArrayItem> {
    if key_path.exists() {
        let sealed = fs::read(key_path).map_err(ErrorArrayItem::from)?;
        let opened = simple_decrypt(&sealed)?;
        return String::from_utf8(opened).map_err(|err| ErrorArrayItem::from(std::io::Error::new(std::io::ErrorKind::InvalidData, err)));
    }

    let mut seed_bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut seed_bytes);
    let seed = hex::encode(seed_bytes);

    let sealed = simple_encrypt(seed.as_bytes())?;
    fs::write(key_path, sealed.as_bytes()).map_err(ErrorArrayItem::from)?;

    Ok(seed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_auth_material_mints_all_three_jwts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = PathType::PathBuf(dir.path().to_path_buf());
        let artifacts = ensure_auth_material(&path, "test-cluster").expect("auth material should be produced");
        assert!(!artifacts.operator_jwt.is_empty());
        assert!(!artifacts.system_account_jwt.is_empty());
        assert!(!artifacts.application_account_jwt.is_empty());
    }

    #[test]
    fn ensure_auth_material_reuses_the_sealed_operator_seed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = PathType::PathBuf(dir.path().to_path_buf());

        let first = ensure_auth_material(&path, "test-cluster").expect("first call should succeed");
        let second = ensure_auth_material(&path, "test-cluster").expect("second call should succeed");

        assert_eq!(first.operator_jwt, second.operator_jwt);
    }
}
