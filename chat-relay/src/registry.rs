//! Directory of active sessions keyed by display name.

use std::collections::BTreeMap;

use tokio::sync::RwLock;
use tracing::debug;

use crate::session::Mailbox;

/// Shared roster of active sessions.
///
/// Mutations take the write lock for the whole check-then-insert or
/// find-then-remove, so two handshakes can never settle on the same name.
/// Reads share the lock. `BTreeMap` keeps roster listings in name order.
#[derive(Default)]
pub struct Registry {
    sessions: RwLock<BTreeMap<String, Mailbox>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `mailbox` under `requested`, or under the first free
    /// `requested1`, `requested2`, ... if taken. Returns the name used.
    ///
    /// The session becomes active while the write lock is held, so no
    /// reader can observe a registered session that is still handshaking.
    /// Returns `None` and leaves the roster untouched if the session is no
    /// longer handshaking.
    pub async fn try_add(&self, requested: &str, mailbox: &Mailbox) -> Option<String> {
        let mut sessions = self.sessions.write().await;

        let mut name = requested.to_string();
        let mut suffix = 1u64;
        while sessions.contains_key(&name) {
            name = format!("{requested}{suffix}");
            suffix += 1;
        }

        if !mailbox.admit(&name) {
            debug!(session = mailbox.id(), state = %mailbox.state(), "refusing to register");
            return None;
        }
        sessions.insert(name.clone(), mailbox.clone());
        Some(name)
    }

    /// Removes the entry owned by `mailbox`, returning the name it held.
    ///
    /// Returns `None` if it was already removed, which makes repeated
    /// closes harmless.
    pub async fn remove(&self, mailbox: &Mailbox) -> Option<String> {
        let mut sessions = self.sessions.write().await;

        let name = sessions
            .iter()
            .find(|(_, entry)| entry.id() == mailbox.id())
            .map(|(name, _)| name.clone())?;

        sessions.remove(&name);
        mailbox.begin_close();
        Some(name)
    }

    /// Names of all active sessions at one instant, in name order.
    pub async fn snapshot(&self) -> Vec<String> {
        self.sessions.read().await.keys().cloned().collect()
    }

    pub async fn find(&self, name: &str) -> Option<Mailbox> {
        self.sessions.read().await.get(name).cloned()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Calls `visit` for every active session except `excluded`.
    ///
    /// Visits a copy of the roster taken under the read lock; sessions that
    /// join or leave meanwhile may or may not be visited, and sends to a
    /// session that closed in between are dropped by its mailbox.
    pub async fn for_each_except<F>(&self, excluded: &str, visit: F)
    where
        F: FnMut(&str, &Mailbox),
    {
        self.apply(Some(excluded), visit).await;
    }

    pub async fn for_each<F>(&self, visit: F)
    where
        F: FnMut(&str, &Mailbox),
    {
        self.apply(None, visit).await;
    }

    async fn apply<F>(&self, excluded: Option<&str>, mut visit: F)
    where
        F: FnMut(&str, &Mailbox),
    {
        let targets: Vec<(String, Mailbox)> = {
            let sessions = self.sessions.read().await;
            sessions
                .iter()
                .filter(|(name, _)| Some(name.as_str()) != excluded)
                .map(|(name, mailbox)| (name.clone(), mailbox.clone()))
                .collect()
        };

        for (name, mailbox) in &targets {
            visit(name, mailbox);
        }
    }
}
