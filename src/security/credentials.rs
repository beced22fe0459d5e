use crate::db::connectors::ConnectionConfig;
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

/// Errors from credential lookups.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Credential not found: {0}")]
    NotFound(String),
    #[error("Credential store error: {0}")]
    StoreError(String),
}

/// Which side of the migration a connection belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionRole {
    Source,
    Destination,
}

impl ConnectionRole {
    fn label(self) -> &'static str {
        match self {
            ConnectionRole::Source => "SOURCE",
            ConnectionRole::Destination => "DESTINATION",
        }
    }
}

/// Read-only lookup of secrets by key. Plan files never need to carry a
/// password; the binary resolves them from the environment.
pub trait CredentialStore {
    fn retrieve(&self, key: &str) -> Result<String, CredentialError>;
}

/// Resolves credentials from process environment variables.
#[derive(Debug, Default)]
pub struct EnvCredentialStore;

impl CredentialStore for EnvCredentialStore {
    fn retrieve(&self, key: &str) -> Result<String, CredentialError> {
        match std::env::var(key) {
            Ok(value) => Ok(value),
            Err(std::env::VarError::NotPresent) => Err(CredentialError::NotFound(key.to_string())),
            Err(e) => Err(CredentialError::StoreError(format!("{}: {}", key, e))),
        }
    }
}

/// In-memory credential store, used by tests and embedding callers.
#[derive(Default)]
pub struct InMemoryCredentialStore {
    entries: Mutex<HashMap<String, String>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, key: &str, value: &str) -> Result<(), CredentialError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| CredentialError::StoreError(e.to_string()))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

impl CredentialStore for InMemoryCredentialStore {
    fn retrieve(&self, key: &str) -> Result<String, CredentialError> {
        let entries = self
            .entries
            .lock()
            .map_err(|e| CredentialError::StoreError(e.to_string()))?;
        entries
            .get(key)
            .cloned()
            .ok_or_else(|| CredentialError::NotFound(key.to_string()))
    }
}

/// Key under which the password for a connection role is looked up.
pub fn credential_key_for_role(role: ConnectionRole) -> String {
    format!("DRIFT_{}_PASSWORD", role.label())
}

/// Fill `config.password` from the store when it holds an entry for the role.
/// A missing entry leaves the configured password untouched.
pub fn resolve_password(
    config: &mut ConnectionConfig,
    role: ConnectionRole,
    store: &dyn CredentialStore,
) -> Result<(), CredentialError> {
    let key = credential_key_for_role(role);
    match store.retrieve(&key) {
        Ok(password) => {
            log::debug!("Using {} for the {:?} connection", key, role);
            config.password = Some(password);
            Ok(())
        }
        Err(CredentialError::NotFound(_)) => Ok(()),
        Err(e) => Err(e),
    }
}
