use anyhow::{Context, Result};
use copter_proto::VehicleRuntime;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{FailsafeSequence, ModeStep};
use crate::state::{FailsafeAdmission, SharedState};

/// Cancellation is observed once per period, so a reconnect takes up to
/// this long to stop a running sequence.
pub const SAMPLE_PERIOD_S: i64 = 5;
const SAMPLE_PERIOD: Duration = Duration::from_secs(SAMPLE_PERIOD_S as u64);
/// Upper bound for one flight-mode change on the vehicle link.
pub const MODE_CALL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceOutcome {
    Completed,
    Cancelled,
    /// Nothing to run.
    Empty,
}

/// Walks the failsafe mode sequence on link loss: `Idle -> Running -> Idle`.
pub struct FailsafeSequencer {
    sequence: Arc<FailsafeSequence>,
    state: Arc<SharedState>,
    runtime: Arc<dyn VehicleRuntime>,
    token: CancellationToken,
}

impl FailsafeSequencer {
    pub fn new(
        sequence: FailsafeSequence,
        state: Arc<SharedState>,
        runtime: Arc<dyn VehicleRuntime>,
        token: CancellationToken,
    ) -> Self {
        Self { sequence: Arc::new(sequence), state, runtime, token }
    }

    /// Starts a run if admitted; the handle resolves when the run ends.
    pub fn on_network_disconnected(&self) -> Option<JoinHandle<SequenceOutcome>> {
        let final_mode = self.sequence.final_mode()?;

        match self.state.try_begin_failsafe(self.runtime.vehicle_mode(), final_mode) {
            FailsafeAdmission::Started => {}
            FailsafeAdmission::Disabled => return None,
            FailsafeAdmission::AtFinalMode => {
                info!("failsafe: vehicle already in {}, not starting", final_mode);
                return None;
            }
            FailsafeAdmission::AlreadyRunning => {
                // a stop requested by a reconnect still wins at the next boundary
                if self.state.failsafe_cancel_requested() {
                    warn!("failsafe: network lost again while the previous sequence is stopping, not restarting");
                } else {
                    info!("failsafe: sequence already running");
                }
                return None;
            }
        }

        info!("failsafe: network lost, starting mode sequence");
        let steps: VecDeque<ModeStep> = self.sequence.steps().iter().cloned().collect();
        let state = self.state.clone();
        let runtime = self.runtime.clone();
        let token = self.token.clone();
        Some(tokio::spawn(async move {
            let outcome = run_sequence(steps, &state, &runtime, &token).await;
            state.finish_failsafe();
            outcome
        }))
    }

    /// Returns true when a running sequence was asked to stop.
    pub fn on_network_reconnected(&self) -> bool {
        let stopping = self.state.request_failsafe_cancel();
        if stopping {
            info!("failsafe: network recovered, stopping mode sequence");
        }
        stopping
    }

    /// Best effort; the running task notices at its next sampling boundary.
    pub fn cancel(&self) {
        self.state.request_failsafe_cancel();
    }
}

async fn run_sequence(
    mut steps: VecDeque<ModeStep>,
    state: &SharedState,
    runtime: &Arc<dyn VehicleRuntime>,
    token: &CancellationToken,
) -> SequenceOutcome {
    let Some(ModeStep { mut mode, timeout_s: mut timeout }) = steps.pop_front() else {
        return SequenceOutcome::Empty;
    };

    loop {
        if state.failsafe_cancel_requested() || token.is_cancelled() {
            info!("failsafe: sequence stopped");
            return SequenceOutcome::Cancelled;
        }

        if timeout <= 0 {
            info!("failsafe: switching vehicle to {}", mode);
            match apply_mode(runtime, &mode).await {
                Ok(()) => state.record_mode(&mode),
                Err(e) => error!("failsafe: mode change to {} failed: {:#}", mode, e),
            }
            match steps.pop_front() {
                Some(next) => {
                    mode = next.mode;
                    timeout = next.timeout_s;
                    continue;
                }
                None => {
                    info!("failsafe: sequence complete");
                    return SequenceOutcome::Completed;
                }
            }
        }

        tokio::select! {
            _ = token.cancelled() => {}
            _ = tokio::time::sleep(SAMPLE_PERIOD) => {}
        }
        timeout -= SAMPLE_PERIOD_S;
    }
}

/// The mode command writes to the vehicle link, which may block.
async fn apply_mode(runtime: &Arc<dyn VehicleRuntime>, mode: &str) -> Result<()> {
    let runtime = runtime.clone();
    let target = mode.to_string();
    let task = tokio::task::spawn_blocking(move || runtime.set_vehicle_mode(&target));
    match tokio::time::timeout(MODE_CALL_TIMEOUT, task).await {
        Ok(joined) => joined.context("mode change task panicked")?,
        Err(_) => anyhow::bail!("mode change timed out after {:?}", MODE_CALL_TIMEOUT),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{assert_elapsed, FakeRuntime};
    use std::sync::Mutex;
    use serde_json::json;
    use tokio::time::Instant;

    fn rtl_land() -> FailsafeSequence {
        FailsafeSequence::parse(&[json!("RTL"), json!(10), json!("LAND"), json!(0)]).unwrap()
    }

    fn sequencer(seq: FailsafeSequence, rt: Arc<FakeRuntime>, enabled: bool) -> (FailsafeSequencer, Arc<SharedState>) {
        let state = Arc::new(SharedState::new(false, enabled));
        (FailsafeSequencer::new(seq, state.clone(), rt, CancellationToken::new()), state)
    }

    #[tokio::test(start_paused = true)]
    async fn walks_sequence_after_timeouts() {
        let rt = FakeRuntime::connected("AUTO");
        let (fs, state) = sequencer(rtl_land(), rt.clone(), true);

        let t0 = Instant::now();
        let run = fs.on_network_disconnected().expect("failsafe should start");
        assert!(state.snapshot().failsafe_running);

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert!(rt.applied().is_empty());

        assert_eq!(run.await.unwrap(), SequenceOutcome::Completed);
        assert_elapsed(t0, 10);
        assert_eq!(rt.applied(), vec!["RTL".to_string(), "LAND".to_string()]);

        let st = state.snapshot();
        assert!(!st.failsafe_running);
        assert_eq!(st.current_vehicle_mode.as_deref(), Some("LAND"));
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_before_first_timeout_applies_nothing() {
        let rt = FakeRuntime::connected("AUTO");
        let (fs, state) = sequencer(rtl_land(), rt.clone(), true);

        let t0 = Instant::now();
        let run = fs.on_network_disconnected().unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(fs.on_network_reconnected());

        assert_eq!(run.await.unwrap(), SequenceOutcome::Cancelled);
        // observed at the next sampling boundary
        assert_elapsed(t0, 5);
        assert!(rt.applied().is_empty());
        assert!(!state.snapshot().failsafe_running);
        assert!(!fs.on_network_reconnected());
    }

    #[tokio::test(start_paused = true)]
    async fn short_or_odd_sequences_never_run() {
        for items in [vec![], vec![json!("RTL"), json!(10)]] {
            let seq = FailsafeSequence::parse(&items).unwrap();
            let (fs, state) = sequencer(seq, FakeRuntime::connected("AUTO"), true);
            assert!(fs.on_network_disconnected().is_none());
            assert!(!state.snapshot().failsafe_running);
        }

        // odd lists are rejected while parsing and leave an empty sequence
        let seq = FailsafeSequence::parse(&[json!("RTL"), json!(10), json!("LAND")]).unwrap_or_default();
        let (fs, state) = sequencer(seq, FakeRuntime::connected("AUTO"), true);
        assert!(fs.on_network_disconnected().is_none());
        assert!(!state.snapshot().failsafe_running);
    }

    #[tokio::test(start_paused = true)]
    async fn admission_guards() {
        let (fs, _) = sequencer(rtl_land(), FakeRuntime::connected("AUTO"), false);
        assert!(fs.on_network_disconnected().is_none());

        let (fs, _) = sequencer(rtl_land(), FakeRuntime::connected("RTL"), true);
        assert!(fs.on_network_disconnected().is_none());

        let rt = FakeRuntime::connected("AUTO");
        let (fs, _) = sequencer(rtl_land(), rt.clone(), true);
        let run = fs.on_network_disconnected().unwrap();
        assert!(fs.on_network_disconnected().is_none());
        run.await.unwrap();
        assert_eq!(rt.applied().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn applied_modes_are_kept_on_cancel() {
        let seq = FailsafeSequence::parse(&[
            json!("LOITER"), json!(0), json!("RTL"), json!(20), json!("LAND"), json!(0),
        ])
        .unwrap();
        let rt = FakeRuntime::connected("AUTO");
        let (fs, _) = sequencer(seq, rt.clone(), true);

        let run = fs.on_network_disconnected().unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;
        fs.on_network_reconnected();
        assert_eq!(run.await.unwrap(), SequenceOutcome::Cancelled);
        assert_eq!(rt.applied(), vec!["LOITER".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn link_loss_while_stopping_does_not_restart() {
        let rt = FakeRuntime::connected("AUTO");
        let (fs, state) = sequencer(rtl_land(), rt.clone(), true);

        let run = fs.on_network_disconnected().unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(fs.on_network_reconnected());
        assert!(fs.on_network_disconnected().is_none());
        assert!(state.failsafe_cancel_requested());

        assert_eq!(run.await.unwrap(), SequenceOutcome::Cancelled);
        assert!(rt.applied().is_empty());
        assert!(!state.snapshot().failsafe_running);

        // the next link loss is admitted again
        let run = fs.on_network_disconnected().unwrap();
        assert_eq!(run.await.unwrap(), SequenceOutcome::Completed);
        assert_eq!(rt.applied(), vec!["RTL".to_string(), "LAND".to_string()]);
    }

    /// Fails every mode change by panicking inside the vehicle call.
    #[derive(Default)]
    struct BrokenLink {
        attempts: Mutex<Vec<String>>,
    }

    impl VehicleRuntime for BrokenLink {
        fn is_vehicle_connected(&self) -> bool {
            true
        }

        fn is_hmi_device_connected(&self) -> bool {
            false
        }

        fn vehicle_mode(&self) -> Option<String> {
            Some("AUTO".to_string())
        }

        fn set_vehicle_mode(&self, mode: &str) -> anyhow::Result<()> {
            self.attempts.lock().unwrap().push(mode.to_string());
            panic!("serial write failed");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failing_mode_changes_are_contained() {
        let link = Arc::new(BrokenLink::default());
        let state = Arc::new(SharedState::new(false, true));
        let fs = FailsafeSequencer::new(rtl_land(), state.clone(), link.clone(), CancellationToken::new());

        let run = fs.on_network_disconnected().unwrap();
        assert_eq!(run.await.unwrap(), SequenceOutcome::Completed);
        assert_eq!(*link.attempts.lock().unwrap(), vec!["RTL".to_string(), "LAND".to_string()]);

        let st = state.snapshot();
        assert!(!st.failsafe_running);
        assert_eq!(st.current_vehicle_mode.as_deref(), Some("AUTO"));
    }
}
