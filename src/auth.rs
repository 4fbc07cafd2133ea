//! Front-end login against the static credential table from config.

use crate::{ChatError, Result};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// A user who passed the credential check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub identifier: String,
    pub provider: &'static str,
}

/// Static username/password table
#[derive(Debug, Clone, Default)]
pub struct CredentialTable {
    users: BTreeMap<String, String>,
}

impl CredentialTable {
    pub fn new(users: BTreeMap<String, String>) -> Self {
        Self { users }
    }

    /// No users configured means login is skipped
    pub fn is_required(&self) -> bool {
        !self.users.is_empty()
    }

    /// Exact match on both username and password
    pub fn authenticate(&self, username: &str, password: &str) -> Result<AuthenticatedUser> {
        match self.users.get(username) {
            Some(expected) if expected == password => {
                info!("User '{}' logged in", username);
                Ok(AuthenticatedUser {
                    identifier: username.to_string(),
                    provider: "credentials",
                })
            }
            _ => {
                warn!("Rejected login for '{}'", username);
                Err(ChatError::Auth("invalid username or password".to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> CredentialTable {
        CredentialTable::new(BTreeMap::from([
            ("sake".to_string(), "123".to_string()),
            ("khoa".to_string(), "456".to_string()),
        ]))
    }

    #[test]
    fn test_accepts_matching_pair() {
        let user = table().authenticate("khoa", "456").unwrap();
        assert_eq!(user.identifier, "khoa");
        assert_eq!(user.provider, "credentials");
    }

    #[test]
    fn test_rejects_wrong_password_and_unknown_user() {
        let table = table();
        assert!(matches!(
            table.authenticate("sake", "456"),
            Err(ChatError::Auth(_))
        ));
        assert!(table.authenticate("nobody", "123").is_err());
        assert!(table.authenticate("SAKE", "123").is_err());
    }

    #[test]
    fn test_empty_table_not_required() {
        assert!(!CredentialTable::default().is_required());
        assert!(table().is_required());
    }
}
