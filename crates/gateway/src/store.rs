//! The session store: explicit lifecycle, no process-wide globals.
//!
//! Sessions are inserted on submit (which spawns the runner task), read as
//! snapshots, and evicted oldest-first when the retention cap is reached.
//! The store never mutates session contents — the agent loop stays the
//! single writer; `clear` only resets terminal sessions.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast};
use tracing::{info, warn};

use taskforge_agent::AgentRunner;
use taskforge_core::error::SessionError;
use taskforge_core::event::SessionEvent;
use taskforge_core::message::SessionId;
use taskforge_core::provider::ProviderKind;
use taskforge_core::session::{Session, SessionHandle};

/// Holds every live session and owns their runner tasks.
pub struct SessionStore {
    runner: Arc<AgentRunner>,
    sessions: RwLock<HashMap<String, Arc<SessionHandle>>>,
    /// Insertion order, oldest first, for eviction
    order: RwLock<VecDeque<String>>,
    max_sessions: usize,
}

impl SessionStore {
    pub fn new(runner: Arc<AgentRunner>, max_sessions: usize) -> Self {
        Self {
            runner,
            sessions: RwLock::new(HashMap::new()),
            order: RwLock::new(VecDeque::new()),
            max_sessions: max_sessions.max(1),
        }
    }

    /// Create a session for the goal and start its run in the background.
    pub async fn submit(&self, goal: impl Into<String>, provider: ProviderKind) -> SessionId {
        let session = Session::new(goal, provider);
        let id = session.id.clone();
        let handle = Arc::new(SessionHandle::new(session));

        {
            let mut sessions = self.sessions.write().await;
            let mut order = self.order.write().await;

            while sessions.len() >= self.max_sessions {
                let Some(oldest) = order.pop_front() else { break };
                if let Some(evicted) = sessions.remove(&oldest) {
                    // Stop the evicted run so its task does not linger
                    evicted.cancel();
                    warn!(session = %oldest, "Evicted oldest session at capacity");
                }
            }

            sessions.insert(id.to_string(), handle.clone());
            order.push_back(id.to_string());
        }

        info!(session = %id, "Session submitted");

        let runner = self.runner.clone();
        tokio::spawn(async move {
            runner.run(handle).await;
        });

        id
    }

    /// The handle for a session id.
    pub async fn get(&self, id: &str) -> Result<Arc<SessionHandle>, SessionError> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(id.to_string()))
    }

    /// A point-in-time snapshot of a session.
    pub async fn snapshot(&self, id: &str) -> Result<Session, SessionError> {
        Ok(self.get(id).await?.snapshot().await)
    }

    /// Subscribe to a session's future events.
    pub async fn subscribe(
        &self,
        id: &str,
    ) -> Result<broadcast::Receiver<SessionEvent>, SessionError> {
        Ok(self.get(id).await?.subscribe())
    }

    /// Request cancellation. The runner observes the token at its next
    /// suspension point and terminates the session.
    pub async fn cancel(&self, id: &str) -> Result<(), SessionError> {
        let handle = self.get(id).await?;
        handle.cancel();
        Ok(())
    }

    /// Reset a terminal session's history, preserving its identity.
    /// Running sessions must be cancelled first.
    pub async fn clear(&self, id: &str) -> Result<(), SessionError> {
        let handle = self.get(id).await?;
        let cleared = handle
            .with_state_mut(|s| {
                if s.is_terminal() {
                    s.reset_history();
                    true
                } else {
                    false
                }
            })
            .await;

        if cleared {
            Ok(())
        } else {
            Err(SessionError::StillRunning(id.to_string()))
        }
    }

    /// Snapshots of every retained session, insertion order.
    pub async fn list(&self) -> Vec<Session> {
        let sessions = self.sessions.read().await;
        let order = self.order.read().await;

        let mut snapshots = Vec::with_capacity(sessions.len());
        for id in order.iter() {
            if let Some(handle) = sessions.get(id) {
                snapshots.push(handle.snapshot().await);
            }
        }
        snapshots
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
