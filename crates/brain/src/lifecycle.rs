//! Brain lifecycle: the state machine and the zero-downtime transfer
//! protocol (`ready` / `clear` / `abort` over the bus plus a handoff note
//! in the store).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use bs_bus::{publish_json, subjects, Bus};
use bs_domain::config::BrainConfig;
use bs_domain::trace::TraceEvent;
use bs_domain::{Error, Result};
use bs_store::Store;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// State machine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrainState {
    Pending,
    Active,
    Draining,
    Shutdown,
}

impl BrainState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrainState::Pending => "pending",
            BrainState::Active => "active",
            BrainState::Draining => "draining",
            BrainState::Shutdown => "shutdown",
        }
    }
}

/// Legal transitions: `pending → active`, `active → draining`,
/// `draining → shutdown`, plus the abort path `draining → active`.
fn transition_is_legal(from: BrainState, to: BrainState) -> bool {
    matches!(
        (from, to),
        (BrainState::Pending, BrainState::Active)
            | (BrainState::Active, BrainState::Draining)
            | (BrainState::Draining, BrainState::Shutdown)
            | (BrainState::Draining, BrainState::Active)
    )
}

pub struct BrainStateMachine {
    state: RwLock<BrainState>,
    version: String,
    started_at: Instant,
    inflight_turns: AtomicUsize,
    shutdown_tx: watch::Sender<bool>,
}

/// Guard counting one in-flight agent turn; dropped when the turn ends.
pub struct TurnGuard {
    machine: Arc<BrainStateMachine>,
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        self.machine.inflight_turns.fetch_sub(1, Ordering::SeqCst);
    }
}

impl BrainStateMachine {
    pub fn new(initial: BrainState, version: impl Into<String>) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            state: RwLock::new(initial),
            version: version.into(),
            started_at: Instant::now(),
            inflight_turns: AtomicUsize::new(0),
            shutdown_tx,
        })
    }

    pub fn state(&self) -> BrainState {
        *self.state.read()
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state(), BrainState::Active | BrainState::Draining)
    }

    pub fn is_accepting_requests(&self) -> bool {
        self.state() == BrainState::Active
    }

    pub fn transition(&self, to: BrainState) -> Result<()> {
        let mut state = self.state.write();
        if !transition_is_legal(*state, to) {
            return Err(Error::Validation(format!(
                "illegal brain transition {} -> {}",
                state.as_str(),
                to.as_str()
            )));
        }
        tracing::info!(from = state.as_str(), to = to.as_str(), "brain state transition");
        TraceEvent::TransferPhase {
            phase: to.as_str().to_string(),
            version: self.version.clone(),
        }
        .emit();
        *state = to;
        if to == BrainState::Shutdown {
            let _ = self.shutdown_tx.send(true);
        }
        Ok(())
    }

    /// Count a turn in flight so draining can wait for zero.
    pub fn begin_turn(self: &Arc<Self>) -> TurnGuard {
        self.inflight_turns.fetch_add(1, Ordering::SeqCst);
        TurnGuard {
            machine: self.clone(),
        }
    }

    pub fn inflight_turns(&self) -> usize {
        self.inflight_turns.load(Ordering::SeqCst)
    }

    /// Wait until no turns are in flight, bounded by `deadline`. Returns
    /// `true` when the count reached zero.
    pub async fn wait_for_drain(&self, deadline: Duration) -> bool {
        let start = Instant::now();
        while self.inflight_turns() > 0 {
            if start.elapsed() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        true
    }

    /// Resolves when the machine reaches `shutdown`.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transfer wire payloads
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferReady {
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferClear {
    pub note_id: String,
    pub to_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferAbort {
    pub reason: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transfer handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct TransferHandler {
    machine: Arc<BrainStateMachine>,
    bus: Arc<dyn Bus>,
    store: Arc<Store>,
    config: BrainConfig,
}

impl TransferHandler {
    pub fn new(
        machine: Arc<BrainStateMachine>,
        bus: Arc<dyn Bus>,
        store: Arc<Store>,
        config: BrainConfig,
    ) -> Self {
        Self {
            machine,
            bus,
            store,
            config,
        }
    }

    /// Pending-brain protocol: announce readiness, wait for the outgoing
    /// brain to clear the handoff (or for the fresh-start timeout).
    pub async fn run_pending(&self) -> Result<()> {
        let mut clears = self.bus.subscribe(subjects::TRANSFER_CLEAR).await?;
        let mut aborts = self.bus.subscribe(subjects::TRANSFER_ABORT).await?;

        publish_json(
            self.bus.as_ref(),
            subjects::TRANSFER_READY,
            &TransferReady {
                version: self.machine.version().to_string(),
            },
        )
        .await?;
        tracing::info!(version = self.machine.version(), "transfer.ready published");

        let timeout = Duration::from_secs(self.config.ready_timeout_secs);
        loop {
            tokio::select! {
                clear = clears.next() => {
                    let Some(msg) = clear else { break };
                    match msg.json::<TransferClear>() {
                        Ok(clear) => {
                            match self.store.get_handoff_note(&clear.note_id) {
                                Ok(Some(note)) => {
                                    tracing::info!(
                                        note_id = %note.id,
                                        from_version = %note.from_version,
                                        "handoff note received"
                                    );
                                }
                                Ok(None) => {
                                    tracing::warn!(note_id = %clear.note_id, "handoff note missing");
                                }
                                Err(e) => {
                                    tracing::warn!(error = %e, "handoff note read failed");
                                }
                            }
                            self.machine.transition(BrainState::Active)?;
                            return Ok(());
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "bad transfer.clear payload");
                        }
                    }
                }
                abort = aborts.next() => {
                    let Some(msg) = abort else { break };
                    let reason = msg
                        .json::<TransferAbort>()
                        .map(|a| a.reason)
                        .unwrap_or_else(|_| "unknown".into());
                    tracing::warn!(reason = %reason, "transfer aborted, staying pending");
                    // The orchestrator retries; keep waiting.
                }
                _ = tokio::time::sleep(timeout) => {
                    tracing::info!(
                        waited_secs = timeout.as_secs(),
                        "no active brain answered, fresh start"
                    );
                    self.machine.transition(BrainState::Active)?;
                    return Ok(());
                }
            }
        }
        Err(Error::Bus("transfer subscription closed".into()))
    }

    /// Active-brain protocol: on `transfer.ready`, drain, write the handoff
    /// note, publish `clear`, shut down. Failures before `clear` publish
    /// `abort` and return to `active`.
    pub async fn run_active(&self) -> Result<()> {
        let mut readies = self.bus.subscribe(subjects::TRANSFER_READY).await?;
        while let Some(msg) = readies.next().await {
            let ready: TransferReady = match msg.json() {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(error = %e, "bad transfer.ready payload");
                    continue;
                }
            };
            tracing::info!(incoming_version = %ready.version, "transfer.ready received");

            match self.hand_off(&ready).await {
                Ok(()) => {
                    self.machine.transition(BrainState::Shutdown)?;
                    return Ok(());
                }
                Err(e) => {
                    tracing::error!(error = %e, "transfer failed, aborting");
                    let _ = publish_json(
                        self.bus.as_ref(),
                        subjects::TRANSFER_ABORT,
                        &TransferAbort {
                            reason: e.to_string(),
                        },
                    )
                    .await;
                    self.machine.transition(BrainState::Active)?;
                }
            }
        }
        Ok(())
    }

    /// Drain and publish `clear`. Any error before the publish aborts.
    async fn hand_off(&self, ready: &TransferReady) -> Result<()> {
        self.machine.transition(BrainState::Draining)?;

        let deadline = Duration::from_secs(self.config.drain_deadline_secs);
        if !self.machine.wait_for_drain(deadline).await {
            tracing::warn!(
                inflight = self.machine.inflight_turns(),
                "drain deadline hit with turns still in flight"
            );
        }

        let cutoff = (chrono::Utc::now() - chrono::Duration::hours(24))
            .to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        let active_conversations =
            serde_json::to_value(self.store.conversations_updated_since(&cutoff)?)?;
        let pending_schedules = serde_json::to_value(self.store.list_enabled_schedules()?)?;

        let note = self.store.insert_handoff_note(
            self.machine.version(),
            Some(&ready.version),
            &active_conversations,
            &pending_schedules,
            None,
        )?;

        publish_json(
            self.bus.as_ref(),
            subjects::TRANSFER_CLEAR,
            &TransferClear {
                note_id: note.id.clone(),
                to_version: ready.version.clone(),
            },
        )
        .await?;
        tracing::info!(note_id = %note.id, to_version = %ready.version, "transfer.clear published");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_and_illegal_transitions() {
        let m = BrainStateMachine::new(BrainState::Pending, "v1");
        assert!(m.transition(BrainState::Draining).is_err());
        m.transition(BrainState::Active).unwrap();
        assert!(m.is_ready());
        assert!(m.is_accepting_requests());

        m.transition(BrainState::Draining).unwrap();
        assert!(m.is_ready());
        assert!(!m.is_accepting_requests());

        // Abort path back to active, then drain and shut down.
        m.transition(BrainState::Active).unwrap();
        m.transition(BrainState::Draining).unwrap();
        m.transition(BrainState::Shutdown).unwrap();
        assert!(!m.is_ready());
        assert!(m.transition(BrainState::Active).is_err());
    }

    #[tokio::test]
    async fn inflight_guard_counts() {
        let m = BrainStateMachine::new(BrainState::Active, "v1");
        assert_eq!(m.inflight_turns(), 0);
        let g1 = m.begin_turn();
        let g2 = m.begin_turn();
        assert_eq!(m.inflight_turns(), 2);
        drop(g1);
        assert_eq!(m.inflight_turns(), 1);
        drop(g2);
        assert!(m.wait_for_drain(Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn drain_times_out_with_turns_in_flight() {
        let m = BrainStateMachine::new(BrainState::Active, "v1");
        let _guard = m.begin_turn();
        assert!(!m.wait_for_drain(Duration::from_millis(50)).await);
    }

    #[tokio::test]
    async fn shutdown_signal_fires() {
        let m = BrainStateMachine::new(BrainState::Active, "v1");
        let mut rx = m.shutdown_signal();
        m.transition(BrainState::Draining).unwrap();
        m.transition(BrainState::Shutdown).unwrap();
        rx.changed().await.unwrap();
        assert!(*rx.borrow());
    }
}
