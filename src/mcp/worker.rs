//! The session thread.
//!
//! The host session is bound to the thread that created it, so a single
//! dedicated thread owns the [`LifecycleManager`] for the life of the
//! process. Async handlers hand it boxed jobs and await the reply.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::affinity::ThreadAffinityRegistry;
use crate::bridge::{Bridge, BridgeOptions};
use crate::host::HostConnector;
use crate::lifecycle::{LifecycleError, LifecycleManager, WarmupPolicy};

use super::types::RpcError;

pub const SESSION_THREAD_NAME: &str = "mailbridge-session";

type Job = Box<dyn FnOnce(&LifecycleManager) + Send>;

enum Command {
    Run(Job),
    Shutdown,
}

/// Cloneable handle for submitting work to the session thread.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
}

impl SessionHandle {
    /// Run `f` against the live session and wait at most `timeout` for it.
    ///
    /// A panic inside `f` is reported as an internal error and the thread
    /// keeps serving.
    pub async fn run<T, F>(&self, timeout: Duration, f: F) -> Result<T, RpcError>
    where
        T: Send + 'static,
        F: FnOnce(&Bridge) -> Result<T, RpcError> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move |manager: &LifecycleManager| {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                manager
                    .registry()
                    .ensure_initialized()
                    .map_err(|e| RpcError::internal(e.to_string()))?;
                let bridge = manager.session().ok_or_else(RpcError::not_initialized)?;
                f(bridge)
            }));
            let result = outcome.unwrap_or_else(|payload| {
                let message = panic_message(payload.as_ref());
                tracing::error!(panic = %message, "Tool call panicked");
                Err(RpcError::internal(format!("Tool call panicked: {}", message)))
            });
            // The caller may have timed out and gone away.
            let _ = tx.send(result);
        });

        self.commands
            .send(Command::Run(job))
            .map_err(|_| RpcError::internal("Session thread has stopped"))?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RpcError::internal("Session thread dropped the call")),
            Err(_) => {
                tracing::warn!(?timeout, "Tool call timed out");
                Err(RpcError::internal(format!("Tool call timed out after {:?}", timeout)))
            }
        }
    }
}

/// Owner of the session thread.
pub struct SessionThread {
    handle: SessionHandle,
    join: JoinHandle<()>,
}

impl SessionThread {
    /// Spawn the thread and bring the session up on it. Blocks until the
    /// session is `Ready` or has failed; on failure the thread has already
    /// released everything and exited.
    pub fn spawn(
        registry: Arc<ThreadAffinityRegistry>,
        connector: Arc<dyn HostConnector>,
        options: BridgeOptions,
        warmup: WarmupPolicy,
    ) -> Result<Self, LifecycleError> {
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), LifecycleError>>();
        let (commands, inbox) = mpsc::channel::<Command>();

        let join = thread::Builder::new()
            .name(SESSION_THREAD_NAME.to_string())
            .spawn(move || {
                let mut manager = LifecycleManager::new(registry, connector, options, warmup);
                if let Err(e) = manager.start() {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                while let Ok(command) = inbox.recv() {
                    match command {
                        Command::Run(job) => job(&manager),
                        Command::Shutdown => break,
                    }
                }
                tracing::info!("Session thread shutting down");
                manager.shutdown();
            })
            .map_err(LifecycleError::Spawn)?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                handle: SessionHandle { commands },
                join,
            }),
            Ok(Err(e)) => {
                let _ = join.join();
                Err(e)
            }
            Err(_) => {
                let _ = join.join();
                Err(LifecycleError::ThreadExited)
            }
        }
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Stop accepting work, release the session and wait for the thread.
    /// Jobs queued before the call still run.
    pub fn shutdown(self) {
        let _ = self.handle.commands.send(Command::Shutdown);
        if self.join.join().is_err() {
            tracing::error!("Session thread panicked during shutdown");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
