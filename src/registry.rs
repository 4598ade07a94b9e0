use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::gateway::{RecipientSource, UnreachableSink};
use crate::types::RecipientId;

const WEEK_SECS: u64 = 7 * 24 * 60 * 60;

/// What the registry knows about one recipient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipientProfile {
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub joined_at_secs: u64,
    pub last_active_secs: u64,
    pub blocked: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStats {
    pub total: u64,
    /// Recipients active within the last seven days.
    pub active_week: u64,
    pub blocked: u64,
}

/// In-memory recipient registry for lightweight deployments.
///
/// Serves as both the recipient source and the unreachable sink of a
/// broadcaster: `list_active` yields every non-blocked recipient, and
/// marking a recipient unreachable sets its blocked flag.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    users: RwLock<HashMap<RecipientId, RecipientProfile>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh a recipient. Refreshing updates the profile
    /// fields and the activity timestamp, never the join timestamp.
    pub async fn upsert(
        &self,
        id: RecipientId,
        username: Option<&str>,
        first_name: Option<&str>,
    ) {
        let now = now_secs();
        let mut guard = self.users.write().await;
        let profile = guard.entry(id).or_insert_with(|| RecipientProfile {
            username: None,
            first_name: None,
            joined_at_secs: now,
            last_active_secs: now,
            blocked: false,
        });
        profile.username = username.map(str::to_owned);
        profile.first_name = first_name.map(str::to_owned);
        profile.last_active_secs = now;
    }

    /// Refresh a recipient's activity timestamp.
    pub async fn touch(&self, id: RecipientId) {
        let mut guard = self.users.write().await;
        if let Some(profile) = guard.get_mut(&id) {
            profile.last_active_secs = now_secs();
        }
    }

    pub async fn set_blocked(&self, id: RecipientId, blocked: bool) {
        let mut guard = self.users.write().await;
        if let Some(profile) = guard.get_mut(&id) {
            profile.blocked = blocked;
        }
    }

    pub async fn get(&self, id: RecipientId) -> Option<RecipientProfile> {
        let guard = self.users.read().await;
        guard.get(&id).cloned()
    }

    pub async fn stats(&self) -> RegistryStats {
        let now = now_secs();
        let guard = self.users.read().await;
        let mut stats = RegistryStats {
            total: guard.len() as u64,
            active_week: 0,
            blocked: 0,
        };
        for profile in guard.values() {
            if profile.blocked {
                stats.blocked += 1;
            }
            if now.saturating_sub(profile.last_active_secs) <= WEEK_SECS {
                stats.active_week += 1;
            }
        }
        stats
    }

    /// Drop every blocked recipient. Returns how many were removed.
    pub async fn cleanup_blocked(&self) -> usize {
        let mut guard = self.users.write().await;
        let before = guard.len();
        guard.retain(|_, profile| !profile.blocked);
        before - guard.len()
    }

    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.users.read().await.is_empty()
    }
}

#[async_trait]
impl RecipientSource for InMemoryRegistry {
    async fn list_active(&self) -> Vec<RecipientId> {
        let guard = self.users.read().await;
        guard
            .iter()
            .filter(|(_, profile)| !profile.blocked)
            .map(|(id, _)| *id)
            .collect()
    }
}

#[async_trait]
impl UnreachableSink for InMemoryRegistry {
    async fn mark_unreachable(&self, recipient: RecipientId) {
        self.set_blocked(recipient, true).await;
        tracing::debug!(recipient = recipient.0, "recipient marked blocked");
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
