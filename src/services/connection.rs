//! Connection orchestration
//!
//! Runs single connection attempts and bounded background retry sessions
//! against the managed device. At most one session retries at a time and every
//! `connect` call is serialized through one lock, so the device is never
//! reconfigured by two callers at once.

use crate::{
    config::RetryConfig,
    network_manager::NetworkManager,
    services::{
        classifier::{ConnectionOutcome, FailureKind, classify},
        hotspot_config::{Credential, HotspotConfigStore},
    },
};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::{
    sync::{Arc, Mutex as StdMutex, PoisonError},
    time::Duration,
};
use tokio::{
    sync::{
        Mutex,
        oneshot::{self, error::TryRecvError},
        watch,
    },
    task::JoinHandle,
    time::{Instant, sleep_until},
};
use uuid::Uuid;

/// Progress of a background retry session
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    /// Launched, first attempt not started yet
    Idle,
    Attempting {
        attempt: u32,
    },
    /// Last attempt failed, waiting for the next one
    Retrying {
        attempt: u32,
        last_outcome: ConnectionOutcome,
    },
    Succeeded {
        attempts: u32,
        outcome: ConnectionOutcome,
    },
    TimedOut {
        attempts: u32,
        last_outcome: Option<ConnectionOutcome>,
    },
    /// Stopped by `cancel`, `shutdown` or a superseding session
    Cancelled {
        attempts: u32,
        last_outcome: Option<ConnectionOutcome>,
    },
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded { .. } | Self::TimedOut { .. } | Self::Cancelled { .. }
        )
    }

    /// Most recent classified outcome, if any attempt finished
    pub fn last_outcome(&self) -> Option<&ConnectionOutcome> {
        match self {
            Self::Idle | Self::Attempting { .. } => None,
            Self::Retrying { last_outcome, .. } => Some(last_outcome),
            Self::Succeeded { outcome, .. } => Some(outcome),
            Self::TimedOut { last_outcome, .. } | Self::Cancelled { last_outcome, .. } => {
                last_outcome.as_ref()
            }
        }
    }
}

/// Observer of one background retry session
#[derive(Clone, Debug)]
pub struct SessionHandle {
    id: Uuid,
    ssid: String,
    state_rx: watch::Receiver<SessionState>,
}

impl SessionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn ssid(&self) -> &str {
        &self.ssid
    }

    pub fn state(&self) -> SessionState {
        self.state_rx.borrow().clone()
    }

    /// Receiver notified on every state change
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    /// Wait for the terminal state of the session
    pub async fn wait(&self) -> SessionState {
        let mut state_rx = self.state_rx.clone();

        let result = state_rx
            .wait_for(SessionState::is_terminal)
            .await
            .map(|state| state.clone());

        match result {
            Ok(state) => state,
            // task is gone without a terminal state, report what it left behind
            Err(_) => state_rx.borrow().clone(),
        }
    }
}

struct SessionSlot {
    handle: SessionHandle,
    cancel_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl SessionSlot {
    /// Signal the session to stop, returns its task for joining
    fn cancel(&mut self) -> Option<JoinHandle<()>> {
        if let Some(cancel_tx) = self.cancel_tx.take() {
            if cancel_tx.send(()).is_ok() {
                info!("session {}: cancel requested", self.handle.id);
            }
        }
        self.task.take()
    }
}

/// Everything a session task needs, detached from the orchestrator
struct SessionContext<NM> {
    id: Uuid,
    ssid: String,
    password: Option<Credential>,
    interval: Duration,
    max_duration: Duration,
    network_manager: Arc<NM>,
    connect_lock: Arc<Mutex<()>>,
    state_tx: watch::Sender<SessionState>,
}

/// Drives connection attempts against the managed device
pub struct ConnectionOrchestrator<NM>
where
    NM: NetworkManager + Send + Sync + 'static,
{
    network_manager: Arc<NM>,
    store: HotspotConfigStore,
    retry: RetryConfig,
    connect_lock: Arc<Mutex<()>>,
    session: StdMutex<Option<SessionSlot>>,
}

impl<NM> ConnectionOrchestrator<NM>
where
    NM: NetworkManager + Send + Sync + 'static,
{
    pub fn new(network_manager: Arc<NM>, store: HotspotConfigStore, retry: RetryConfig) -> Self {
        Self {
            network_manager,
            store,
            retry,
            connect_lock: Arc::new(Mutex::new(())),
            session: StdMutex::new(None),
        }
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    pub fn store(&self) -> &HotspotConfigStore {
        &self.store
    }

    /// Run exactly one connection attempt and classify it
    ///
    /// # Arguments
    /// * `ssid` - Network to join
    /// * `password` - Optional secret, none for open or already known networks
    ///
    /// # Returns
    /// The classified outcome, tool failures included
    pub async fn attempt_once(&self, ssid: &str, password: Option<Credential>) -> ConnectionOutcome {
        info!("attempt to connect to \"{ssid}\"");

        if self.retry.persist_policy.persists_immediate() {
            self.persist(ssid, password.as_ref());
        }

        let outcome = attempt(
            self.network_manager.as_ref(),
            &self.connect_lock,
            ssid,
            password.as_ref(),
        )
        .await;

        info!("attempt to connect to \"{ssid}\": {}", describe(&outcome));
        outcome
    }

    /// Start a background retry session, superseding any running one
    ///
    /// The config is persisted before the session launches so a restarted device
    /// still knows its target. Returns as soon as the task is spawned.
    ///
    /// # Arguments
    /// * `ssid` - Network to join
    /// * `password` - Optional secret
    /// * `max_duration` - No attempt starts once this much time has elapsed
    ///
    /// # Returns
    /// Handle to observe the new session
    ///
    /// # Panics
    /// When called outside a tokio runtime
    pub fn start_retrying(
        &self,
        ssid: &str,
        password: Option<Credential>,
        max_duration: Duration,
    ) -> SessionHandle {
        if self.retry.persist_policy.persists_background() {
            self.persist(ssid, password.as_ref());
        }

        let id = Uuid::new_v4();
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);
        let (cancel_tx, cancel_rx) = oneshot::channel();

        let handle = SessionHandle {
            id,
            ssid: ssid.to_string(),
            state_rx,
        };

        let context = SessionContext {
            id,
            ssid: ssid.to_string(),
            password: password.filter(|p| !p.is_empty()),
            interval: self.retry.interval,
            max_duration,
            network_manager: Arc::clone(&self.network_manager),
            connect_lock: Arc::clone(&self.connect_lock),
            state_tx,
        };

        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);

        let superseded = session.as_mut().and_then(|previous| {
            info!(
                "session {id}: supersedes session {} for \"{}\"",
                previous.handle.id, previous.handle.ssid
            );
            previous.cancel()
        });

        info!(
            "session {id}: retry \"{ssid}\" every {}s for up to {}s",
            self.retry.interval.as_secs_f32(),
            max_duration.as_secs_f32()
        );

        let task = tokio::spawn(async move {
            if let Some(superseded) = superseded {
                // never let two sessions touch the device at once
                if let Err(e) = superseded.await {
                    warn!("session {}: superseded session ended abnormally: {e}", context.id);
                }
            }
            run_session(context, cancel_rx).await;
        });

        *session = Some(SessionSlot {
            handle: handle.clone(),
            cancel_tx: Some(cancel_tx),
            task: Some(task),
        });

        handle
    }

    /// Handle of the current or most recent session
    pub fn session(&self) -> Option<SessionHandle> {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|slot| slot.handle.clone())
    }

    /// State of the current or most recent session, for polling callers
    pub fn session_state(&self) -> Option<SessionState> {
        self.session().map(|handle| handle.state())
    }

    pub fn is_retrying(&self) -> bool {
        self.session_state().is_some_and(|state| !state.is_terminal())
    }

    /// Stop the running session, if any
    ///
    /// # Returns
    /// true if a running session was signalled
    pub fn cancel(&self) -> bool {
        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);

        match session.as_mut() {
            Some(slot) if !slot.handle.state().is_terminal() => {
                // keep the task so shutdown can still join it
                if let Some(task) = slot.cancel() {
                    slot.task = Some(task);
                }
                true
            }
            _ => false,
        }
    }

    /// Cancel the running session and wait for its task to end
    pub async fn shutdown(&self) {
        let task = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_mut()
            .and_then(SessionSlot::cancel);

        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("session task ended abnormally: {e}");
            }
        }

        debug!("connection orchestrator shut down");
    }

    fn persist(&self, ssid: &str, password: Option<&Credential>) {
        if let Err(e) = self.store.save(ssid, password) {
            error!("failed to persist hotspot config: {e:#}");
        }
    }
}

/// One gateway `connect`, serialized through `connect_lock` and classified
async fn attempt<NM>(
    network_manager: &NM,
    connect_lock: &Mutex<()>,
    ssid: &str,
    password: Option<&Credential>,
) -> ConnectionOutcome
where
    NM: NetworkManager + Sync,
{
    let _guard = connect_lock.lock().await;

    match network_manager
        .connect(ssid.to_string(), password.cloned())
        .await
    {
        Ok(output) => classify(&output.stdout, &output.stderr),
        Err(e) => {
            error!("failed to run connect: {e:#}");
            ConnectionOutcome::failure(FailureKind::ToolUnavailable, format!("{e:#}"))
        }
    }
}

async fn run_session<NM>(context: SessionContext<NM>, mut cancel_rx: oneshot::Receiver<()>)
where
    NM: NetworkManager + Send + Sync + 'static,
{
    let SessionContext {
        id,
        ssid,
        password,
        interval,
        max_duration,
        network_manager,
        connect_lock,
        state_tx,
    } = context;

    let deadline = Instant::now() + max_duration;
    let mut attempts = 0;
    let mut last_outcome = None;

    let terminal = loop {
        // superseded again while waiting for the previous session to end
        if !matches!(cancel_rx.try_recv(), Err(TryRecvError::Empty)) {
            break SessionState::Cancelled {
                attempts,
                last_outcome,
            };
        }

        attempts += 1;
        state_tx.send_replace(SessionState::Attempting { attempt: attempts });
        debug!("session {id}: attempt {attempts} for \"{ssid}\"");

        let outcome = tokio::select! {
            biased;
            _ = &mut cancel_rx => break SessionState::Cancelled { attempts, last_outcome },
            outcome = attempt(network_manager.as_ref(), &connect_lock, &ssid, password.as_ref()) => outcome,
        };

        info!("session {id}: attempt {attempts}: {}", describe(&outcome));

        if outcome.is_success() {
            break SessionState::Succeeded { attempts, outcome };
        }

        let now = Instant::now();
        if now >= deadline {
            break SessionState::TimedOut {
                attempts,
                last_outcome: Some(outcome),
            };
        }

        state_tx.send_replace(SessionState::Retrying {
            attempt: attempts,
            last_outcome: outcome.clone(),
        });
        last_outcome = Some(outcome);

        tokio::select! {
            biased;
            _ = &mut cancel_rx => break SessionState::Cancelled { attempts, last_outcome },
            _ = sleep_until((now + interval).min(deadline)) => {}
        }

        if Instant::now() >= deadline {
            break SessionState::TimedOut {
                attempts,
                last_outcome,
            };
        }
    };

    match &terminal {
        SessionState::Succeeded { .. } => info!("session {id}: connected to \"{ssid}\""),
        SessionState::TimedOut { .. } => warn!(
            "session {id}: gave up on \"{ssid}\" after {attempts} attempts ({}s)",
            max_duration.as_secs_f32()
        ),
        _ => info!("session {id}: cancelled after {attempts} attempts"),
    }

    state_tx.send_replace(terminal);
}

fn describe(outcome: &ConnectionOutcome) -> String {
    match outcome {
        ConnectionOutcome::Success { .. } => "success".to_string(),
        ConnectionOutcome::Failure { kind, raw } => format!("{kind} ({})", raw.trim()),
    }
}
