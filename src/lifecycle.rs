//! Session lifecycle: acquire, warm up, publish, release.
//!
//! ```text
//! Idle → Initializing → WarmingUp → Ready → ShuttingDown → Closed
//!             └────────────┴──→ Failed
//! ```
//!
//! The manager must live on the thread that owns the session. Release runs
//! in a fixed order: drop the host handles, uninitialize the thread's
//! runtime, then let the runtime free unused native handles. It runs for
//! whatever was acquired, including after a failed start, and from `Drop`.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::affinity::{AffinityError, ThreadAffinityRegistry};
use crate::bridge::{Bridge, BridgeError, BridgeOptions};
use crate::host::HostConnector;

pub const DEFAULT_WARMUP_ATTEMPTS: u32 = 5;
pub const DEFAULT_WARMUP_BACKOFF: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Idle,
    Initializing,
    WarmingUp,
    Ready,
    ShuttingDown,
    Closed,
    Failed,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Initializing => "initializing",
            Self::WarmingUp => "warming_up",
            Self::Ready => "ready",
            Self::ShuttingDown => "shutting_down",
            Self::Closed => "closed",
            Self::Failed => "failed",
        }
    }
}

/// Fixed-backoff retry policy for the warm-up call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WarmupPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for WarmupPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_WARMUP_ATTEMPTS,
            backoff: DEFAULT_WARMUP_BACKOFF,
        }
    }
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Runtime(#[from] AffinityError),

    #[error(transparent)]
    Connect(#[from] BridgeError),

    #[error("Host did not respond after {attempts} warm-up attempts: {last_error}")]
    WarmupExhausted { attempts: u32, last_error: String },

    #[error("Cannot start the session from state '{}'", .0.as_str())]
    InvalidState(LifecycleState),

    #[error("Failed to spawn session thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Session thread exited before the session was ready")]
    ThreadExited,
}

pub struct LifecycleManager {
    registry: Arc<ThreadAffinityRegistry>,
    connector: Arc<dyn HostConnector>,
    options: BridgeOptions,
    warmup: WarmupPolicy,
    state: LifecycleState,
    session: Option<Bridge>,
    /// Whether this manager initialized the runtime on its thread.
    affinity_acquired: bool,
}

impl LifecycleManager {
    pub fn new(
        registry: Arc<ThreadAffinityRegistry>,
        connector: Arc<dyn HostConnector>,
        options: BridgeOptions,
        warmup: WarmupPolicy,
    ) -> Self {
        Self {
            registry,
            connector,
            options,
            warmup,
            state: LifecycleState::Idle,
            session: None,
            affinity_acquired: false,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn registry(&self) -> &Arc<ThreadAffinityRegistry> {
        &self.registry
    }

    /// Bring the session up. On failure everything acquired so far is
    /// released and the manager stays `Failed`.
    pub fn start(&mut self) -> Result<&Bridge, LifecycleError> {
        if self.state != LifecycleState::Idle {
            return Err(LifecycleError::InvalidState(self.state));
        }

        self.transition(LifecycleState::Initializing);
        if let Err(e) = self.initialize() {
            self.fail(&e);
            return Err(e);
        }

        self.transition(LifecycleState::WarmingUp);
        if let Err(e) = self.warm_up() {
            self.fail(&e);
            return Err(e);
        }

        self.transition(LifecycleState::Ready);
        self.session
            .as_ref()
            .ok_or(LifecycleError::InvalidState(LifecycleState::Ready))
    }

    /// The published session. `None` unless the manager is `Ready`.
    pub fn session(&self) -> Option<&Bridge> {
        match self.state {
            LifecycleState::Ready => self.session.as_ref(),
            _ => None,
        }
    }

    pub fn shutdown(&mut self) {
        match self.state {
            LifecycleState::Closed | LifecycleState::Failed | LifecycleState::ShuttingDown => {}
            LifecycleState::Idle => self.transition(LifecycleState::Closed),
            _ => {
                self.transition(LifecycleState::ShuttingDown);
                self.release();
                self.transition(LifecycleState::Closed);
            }
        }
    }

    fn initialize(&mut self) -> Result<(), LifecycleError> {
        let already = self.registry.is_initialized();
        self.registry.ensure_initialized()?;
        self.affinity_acquired = !already;
        let bridge = Bridge::connect(self.connector.as_ref(), self.options.clone())?;
        self.session = Some(bridge);
        Ok(())
    }

    fn warm_up(&self) -> Result<(), LifecycleError> {
        let bridge = self
            .session
            .as_ref()
            .ok_or(LifecycleError::InvalidState(self.state))?;
        let attempts = self.warmup.attempts.max(1);
        let mut last_error = None;
        for attempt in 1..=attempts {
            match bridge.inbox_count() {
                Ok(count) => {
                    tracing::info!(attempt, inbox = count, "Host responded to warm-up");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(attempt, attempts, error = %e, "Warm-up attempt failed");
                    last_error = Some(e);
                    if attempt < attempts {
                        thread::sleep(self.warmup.backoff);
                    }
                }
            }
        }
        Err(LifecycleError::WarmupExhausted {
            attempts,
            last_error: last_error.map(|e| e.to_string()).unwrap_or_default(),
        })
    }

    fn fail(&mut self, error: &LifecycleError) {
        tracing::error!(state = self.state.as_str(), error = %error, "Session startup failed");
        self.release();
        self.transition(LifecycleState::Failed);
    }

    fn release(&mut self) {
        let had_session = self.session.take().is_some();
        if had_session {
            tracing::debug!("Released host session");
        }
        let had_affinity = std::mem::take(&mut self.affinity_acquired);
        if had_affinity {
            self.registry.release_current_thread();
        }
        if had_session || had_affinity {
            self.registry.runtime().free_unused();
        }
    }

    fn transition(&mut self, next: LifecycleState) {
        tracing::debug!(from = self.state.as_str(), to = next.as_str(), "Lifecycle transition");
        self.state = next;
    }
}

impl Drop for LifecycleManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
