pub mod credentials;
pub mod journal;
pub mod validation;

pub use credentials::{
    credential_key_for_role, resolve_password, ConnectionRole, CredentialError, CredentialStore,
    EnvCredentialStore, InMemoryCredentialStore,
};
pub use journal::{AuditError, JournalEntry, JournalEvent, JournalFilter, RunJournal};
pub use validation::{validate_file_path, validate_identifier, validate_identifiers, ValidationError};
