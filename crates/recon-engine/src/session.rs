//! Per-session remembered selections.

use std::time::Duration;

use moka::future::Cache;
use tracing::debug;

use recon_core::defaults::{CACHE_MAX_ENTRIES, SESSION_TTL_SECS};
use recon_core::ManualSelections;

#[derive(Debug, Clone, Default)]
struct Remembered {
    role: Option<i64>,
}

/// Last manual choices per operator session, dropped after an idle period.
#[derive(Clone)]
pub struct SessionSelections {
    sessions: Cache<String, Remembered>,
}

impl Default for SessionSelections {
    fn default() -> Self {
        Self::new(Duration::from_secs(SESSION_TTL_SECS))
    }
}

impl SessionSelections {
    pub fn new(idle_ttl: Duration) -> Self {
        Self {
            sessions: Cache::builder()
                .max_capacity(CACHE_MAX_ENTRIES)
                .time_to_idle(idle_ttl)
                .build(),
        }
    }

    pub async fn remember_role(&self, session: &str, role_id: i64) {
        self.sessions
            .insert(session.to_string(), Remembered { role: Some(role_id) })
            .await;
        debug!(session, role_id, "Remembered role selection");
    }

    pub async fn role(&self, session: &str) -> Option<i64> {
        self.sessions.get(session).await.and_then(|r| r.role)
    }

    /// Fill unset selections from what the session remembers.
    pub async fn prefill(&self, session: Option<&str>, selections: &mut ManualSelections) {
        let Some(session) = session else {
            return;
        };
        if selections.role.is_none() {
            selections.role = self.role(session).await;
        }
    }
}
