//! Known users and their privileges

use std::collections::HashMap;

use secrecy::{ExposeSecret, SecretString};

use crate::config::UserConfig;

/// A registered user
#[derive(Debug)]
pub struct UserRecord {
    pub name: String,
    pub admin: bool,
    token: Option<SecretString>,
}

/// Lookup table for users, keyed by lowercase name
#[derive(Debug, Default)]
pub struct UserDirectory {
    users: HashMap<String, UserRecord>,
}

impl UserDirectory {
    #[must_use]
    pub fn new(users: Vec<UserConfig>) -> Self {
        let mut directory = Self::default();
        for user in users {
            directory.insert(user);
        }
        directory
    }

    /// Add or replace a user
    pub fn insert(&mut self, user: UserConfig) {
        let key = user.name.to_lowercase();
        self.users.insert(
            key,
            UserRecord {
                name: user.name,
                admin: user.admin,
                token: user.token,
            },
        );
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&UserRecord> {
        self.users.get(&name.to_lowercase())
    }

    #[must_use]
    pub fn exists(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    #[must_use]
    pub fn is_admin(&self, name: &str) -> bool {
        self.get(name).is_some_and(|u| u.admin)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.users.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Resolve a bearer token to its user
    #[must_use]
    pub fn authenticate_token(&self, provided: &str) -> Option<&str> {
        if provided.is_empty() {
            return None;
        }
        self.users.values().find_map(|u| {
            u.token
                .as_ref()
                .filter(|t| constant_time_eq(t.expose_secret().as_bytes(), provided.as_bytes()))
                .map(|_| u.name.as_str())
        })
    }
}

/// Constant-time comparison to prevent timing attacks
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}
