//! Account storage: username, credential, rating
//!
//! A deliberately small credential store. The engine only needs
//! find/register/verify plus rating reads and the transactional delta apply
//! at the end of a ranked game. Backed by an in-memory map; persistence of
//! accounts is a deployment concern behind this same surface.

use log::info;
use shared::DEFAULT_RATING;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
pub struct Account {
    pub username: String,
    /// Opaque to everything in this crate; only `verify` compares it.
    secret: String,
    pub rating: i32,
}

/// Concurrent account store. Rating writes are per-username, so no lock
/// beyond the store's own is ever needed.
#[derive(Default)]
pub struct AccountStore {
    accounts: RwLock<HashMap<String, Account>>,
}

impl AccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new account at the default rating. Returns false when the
    /// username is taken.
    pub async fn register(&self, username: &str, secret: &str) -> bool {
        let mut accounts = self.accounts.write().await;
        if accounts.contains_key(username) {
            return false;
        }
        accounts.insert(
            username.to_string(),
            Account {
                username: username.to_string(),
                secret: secret.to_string(),
                rating: DEFAULT_RATING,
            },
        );
        info!("Registered account {}", username);
        true
    }

    pub async fn find(&self, username: &str) -> Option<Account> {
        self.accounts.read().await.get(username).cloned()
    }

    pub async fn verify(&self, username: &str, secret: &str) -> bool {
        match self.accounts.read().await.get(username) {
            Some(account) => account.secret == secret,
            None => false,
        }
    }

    /// Rating of a user, defaulting to 1500 for unknown usernames the same
    /// way lookups elsewhere in the game do.
    pub async fn rating(&self, username: &str) -> i32 {
        self.accounts
            .read()
            .await
            .get(username)
            .map(|a| a.rating)
            .unwrap_or(DEFAULT_RATING)
    }

    /// Applies rating deltas from a completed ranked game in one write lock.
    pub async fn apply_deltas(&self, deltas: &HashMap<String, i32>) {
        let mut accounts = self.accounts.write().await;
        for (username, delta) in deltas {
            if let Some(account) = accounts.get_mut(username) {
                account.rating += delta;
                info!(
                    "Rating update: {} {:+} -> {}",
                    username, delta, account.rating
                );
            }
        }
    }
}
