//! Reconnection supervisor
//!
//! Observes connection loss and drives a bounded sequence of reconnect
//! attempts. The wait before attempt n is `base_delay * (n + 1)` —
//! linear backoff scaled by attempt number. After each attempt the
//! supervisor holds a fixed observation window before deciding whether
//! connectivity came back.

use super::events::SessionEvent;
use crate::config::ReconnectConfig;
use futures::future::BoxFuture;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

/// Supervisor lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// Not supervising; connection healthy or never lost
    Idle,
    /// Retry loop running
    Reconnecting,
    /// All attempts failed; re-arm required before another trigger
    Exhausted,
}

/// Orchestrator-supplied reconnect entry point
pub type ReconnectFn = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

pub struct ReconnectSupervisor {
    max_attempts: u32,
    base_delay: Duration,
    observe_window: Duration,
    state: Arc<Mutex<SupervisorState>>,
    attempts: Arc<AtomicU32>,
    events: broadcast::Sender<SessionEvent>,
    connectivity: watch::Receiver<bool>,
    reconnect: ReconnectFn,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ReconnectSupervisor {
    pub fn new(
        config: &ReconnectConfig,
        events: broadcast::Sender<SessionEvent>,
        connectivity: watch::Receiver<bool>,
        reconnect: ReconnectFn,
    ) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: config.base_delay(),
            observe_window: config.observe_window(),
            state: Arc::new(Mutex::new(SupervisorState::Idle)),
            attempts: Arc::new(AtomicU32::new(0)),
            events,
            connectivity,
            reconnect,
            task: Mutex::new(None),
        }
    }

    /// Start supervising after a connection-lost signal. Idempotent
    /// while a retry loop is already running; a supervisor in the
    /// Exhausted state stays put until `rearm()`.
    pub fn trigger(&self) {
        {
            let mut state = self.state.lock().unwrap();
            match *state {
                SupervisorState::Reconnecting => {
                    debug!("Reconnect already in progress, ignoring trigger");
                    return;
                }
                SupervisorState::Exhausted => {
                    warn!("Reconnect attempts exhausted, re-arm before triggering again");
                    return;
                }
                SupervisorState::Idle => *state = SupervisorState::Reconnecting,
            }
        }

        self.attempts.store(0, Ordering::SeqCst);
        let _ = self.events.send(SessionEvent::ConnectionLost);

        let handle = tokio::spawn(run_retry_loop(
            self.max_attempts,
            self.base_delay,
            self.observe_window,
            self.state.clone(),
            self.attempts.clone(),
            self.events.clone(),
            self.connectivity.clone(),
            self.reconnect.clone(),
        ));
        *self.task.lock().unwrap() = Some(handle);
    }

    /// Return an Exhausted supervisor to Idle so it can be triggered again
    pub fn rearm(&self) {
        let mut state = self.state.lock().unwrap();
        if *state == SupervisorState::Exhausted {
            *state = SupervisorState::Idle;
            self.attempts.store(0, Ordering::SeqCst);
            info!("Reconnect supervisor re-armed");
        }
    }

    /// Cancel any pending scheduled work. Aborts the retry task at its
    /// current suspension point; no callback fires afterwards.
    pub fn shutdown(&self) {
        if let Some(handle) = self.task.lock().unwrap().take() {
            handle.abort();
        }
        *self.state.lock().unwrap() = SupervisorState::Idle;
    }

    pub fn state(&self) -> SupervisorState {
        *self.state.lock().unwrap()
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Drop for ReconnectSupervisor {
    fn drop(&mut self) {
        if let Some(handle) = self.task.lock().unwrap().take() {
            handle.abort();
        }
    }
}

enum WaitOutcome {
    Elapsed,
    Restored,
    Cancelled,
}

/// Sleep for `duration` unless the connectivity watch flips true first
async fn wait_or_restored(connectivity: &mut watch::Receiver<bool>, duration: Duration) -> WaitOutcome {
    tokio::select! {
        _ = tokio::time::sleep(duration) => WaitOutcome::Elapsed,
        changed = connectivity.wait_for(|connected| *connected) => match changed {
            Ok(_) => WaitOutcome::Restored,
            // sender gone: owning session was torn down
            Err(_) => WaitOutcome::Cancelled,
        },
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_retry_loop(
    max_attempts: u32,
    base_delay: Duration,
    observe_window: Duration,
    state: Arc<Mutex<SupervisorState>>,
    attempts: Arc<AtomicU32>,
    events: broadcast::Sender<SessionEvent>,
    mut connectivity: watch::Receiver<bool>,
    reconnect: ReconnectFn,
) {
    loop {
        let attempt = attempts.load(Ordering::SeqCst);
        if attempt >= max_attempts {
            *state.lock().unwrap() = SupervisorState::Exhausted;
            warn!("Reconnect exhausted after {} attempts", attempt);
            let _ = events.send(SessionEvent::ReconnectExhausted { attempts: attempt });
            return;
        }

        let delay = base_delay * (attempt + 1);
        debug!("Waiting {:?} before reconnect attempt {}", delay, attempt + 1);
        match wait_or_restored(&mut connectivity, delay).await {
            WaitOutcome::Elapsed => {}
            WaitOutcome::Restored => {
                restored(&state, &attempts, &events);
                return;
            }
            WaitOutcome::Cancelled => return,
        }

        attempts.fetch_add(1, Ordering::SeqCst);
        info!("Reconnect attempt {}/{}", attempt + 1, max_attempts);
        (reconnect)().await;

        match wait_or_restored(&mut connectivity, observe_window).await {
            WaitOutcome::Elapsed => {}
            WaitOutcome::Restored => {
                restored(&state, &attempts, &events);
                return;
            }
            WaitOutcome::Cancelled => return,
        }
    }
}

fn restored(
    state: &Arc<Mutex<SupervisorState>>,
    attempts: &Arc<AtomicU32>,
    events: &broadcast::Sender<SessionEvent>,
) {
    *state.lock().unwrap() = SupervisorState::Idle;
    attempts.store(0, Ordering::SeqCst);
    info!("Connection restored, reconnect supervisor idle");
    let _ = events.send(SessionEvent::ConnectionRestored);
}
