//! Speaker-protection calibration
//!
//! A dedicated background thread measures the loudspeaker's DC resistance at
//! a known temperature and persists the result. It only touches hardware
//! when no usecase is registered and the speaker has been idle long enough,
//! and any concurrent routing request cancels an in-flight attempt through
//! the two-condition-variable handshake in [`CancellableOperation`].
//!
//! The thread runs at most one successful calibration per process lifetime:
//! it exits permanently once the state reaches `Calibrated` or `Disabled`.
//!
//! [`CancellableOperation`]: super::sync::CancellableOperation

use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::config::CalibrationConfig;
use super::hal::{CalibStatus, CalibrationPersistence, SpeakerCalibration, ThermalClient};
use super::routing::{AudioContext, CalibPcms, RouteError};
use super::sync::WaitOutcome;

/// Lifecycle of the speaker-protection subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationState {
    /// Disabled by configuration; terminal
    Disabled,
    NotCalibrated,
    /// An attempt is touching hardware right now
    Calibrating,
    /// A valid calibration is installed; terminal
    Calibrated,
}

/// Outcome of one calibration attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttemptOutcome {
    Success(SpeakerCalibration),
    /// Preconditions not met; retry on the next thermal sample
    Busy,
    /// Cancelled by a routing request; not a failure
    Cancelled,
    Failed,
}

/// Temperature assumed when the thermal service cannot provide one.
const SAFE_DEFAULT_TEMP_C: i32 = 25;
/// Give up waiting for a thermal sample after this long and use the default.
const THERMAL_SAMPLE_TIMEOUT: Duration = Duration::from_secs(60);
/// Retry pacing when no thermal service is available at all.
const NO_THERMAL_RETRY_PAUSE: Duration = Duration::from_secs(5);
/// VI-feedback capture rate used during calibration.
const CALIB_SAMPLE_RATE: u32 = 8000;

const THERMAL_CLIENT_NAME: &str = "spkr_prot";

struct ProtectionState {
    state: CalibrationState,
    last_temp: Option<i32>,
}

/// The speaker-protection calibration subsystem.
pub struct SpeakerProtection {
    ctx: Arc<AudioContext>,
    thermal: Arc<dyn ThermalClient>,
    store: Arc<dyn CalibrationPersistence>,
    config: CalibrationConfig,
    state: Mutex<ProtectionState>,
    temp_cond: Condvar,
}

impl SpeakerProtection {
    pub fn new(
        ctx: Arc<AudioContext>,
        thermal: Arc<dyn ThermalClient>,
        store: Arc<dyn CalibrationPersistence>,
        config: CalibrationConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            thermal,
            store,
            config,
            state: Mutex::new(ProtectionState {
                state: CalibrationState::NotCalibrated,
                last_temp: None,
            }),
            temp_cond: Condvar::new(),
        })
    }

    /// Start the calibration thread. Returns its join handle; the thread
    /// exits on its own once a terminal state is reached.
    pub fn spawn(this: &Arc<Self>) -> thread::JoinHandle<()> {
        let run = Arc::clone(this);
        thread::Builder::new()
            .name("spkr-calib".into())
            .spawn(move || run.run())
            .expect("failed to spawn calibration thread")
    }

    pub fn state(&self) -> CalibrationState {
        self.state.lock().unwrap().state
    }

    fn set_state(&self, state: CalibrationState) {
        self.state.lock().unwrap().state = state;
    }

    fn on_temperature(&self, temp_c: i32) {
        let mut st = self.state.lock().unwrap();
        st.last_temp = Some(temp_c);
        self.temp_cond.notify_all();
    }

    fn run(self: Arc<Self>) {
        if !self.config.enabled {
            info!("speaker calibration disabled by configuration");
            self.set_state(CalibrationState::Disabled);
            return;
        }

        // A stored in-range calibration means this boot needs no hardware
        // access at all.
        match self.store.load() {
            Ok(Some(cal)) if cal.in_valid_range() => {
                if let Err(err) = self.ctx.calibration_loader().set_speaker_calibration(&cal) {
                    warn!("stored calibration rejected by loader: {}", err);
                } else {
                    info!("stored speaker calibration valid, skipping measurement");
                    self.set_state(CalibrationState::Calibrated);
                    return;
                }
            }
            Ok(Some(_)) => warn!("stored speaker calibration out of range, recalibrating"),
            Ok(None) => debug!("no stored speaker calibration"),
            Err(err) => warn!("calibration file read failed: {}", err),
        }

        let registered = {
            let weak = Arc::downgrade(&self);
            let registered = self.thermal.register(Box::new(move |temp_c| {
                if let Some(this) = weak.upgrade() {
                    this.on_temperature(temp_c);
                }
            }));
            if registered {
                self.thermal.request(THERMAL_CLIENT_NAME, true);
            } else {
                warn!("thermal service unavailable, using default temperature");
            }
            registered
        };

        let mut first_attempt = true;
        loop {
            let temp_c = self.next_temperature(registered, first_attempt);
            first_attempt = false;

            self.set_state(CalibrationState::Calibrating);
            match self.attempt(temp_c) {
                AttemptOutcome::Success(cal) => {
                    info!(
                        "speaker calibrated: r0 {:?} at t0 {:?}",
                        cal.r0, cal.t0
                    );
                    self.set_state(CalibrationState::Calibrated);
                    break;
                }
                AttemptOutcome::Busy => {
                    debug!("calibration preconditions not met, retrying");
                    self.set_state(CalibrationState::NotCalibrated);
                }
                AttemptOutcome::Cancelled => {
                    // Cancellation is not a failure; the speaker simply
                    // stays uncalibrated until the next quiet window.
                    info!("calibration cancelled by routing activity");
                    self.set_state(CalibrationState::NotCalibrated);
                }
                AttemptOutcome::Failed => {
                    warn!("calibration attempt failed, retrying");
                    self.set_state(CalibrationState::NotCalibrated);
                }
            }
        }

        if registered {
            self.thermal.request(THERMAL_CLIENT_NAME, false);
        }
    }

    /// Block until a temperature sample is available, or synthesize the
    /// safe default when the thermal service cannot provide one.
    fn next_temperature(&self, registered: bool, first_attempt: bool) -> i32 {
        if !registered {
            if !first_attempt {
                let st = self.state.lock().unwrap();
                let _ = self.temp_cond.wait_timeout(st, NO_THERMAL_RETRY_PAUSE).unwrap();
            }
            return SAFE_DEFAULT_TEMP_C;
        }

        let mut st = self.state.lock().unwrap();
        let deadline = Instant::now() + THERMAL_SAMPLE_TIMEOUT;
        loop {
            if let Some(temp) = st.last_temp.take() {
                return temp;
            }
            let now = Instant::now();
            if now >= deadline {
                warn!("no thermal sample within timeout, using default");
                return SAFE_DEFAULT_TEMP_C;
            }
            let (guard, _) = self.temp_cond.wait_timeout(st, deadline - now).unwrap();
            st = guard;
        }
    }

    /// One calibration attempt against live hardware.
    ///
    /// The cancellation gate is active for the whole attempt; its
    /// acknowledge fires only after the PCM handles are closed and the
    /// calibration usecases deregistered, so a cancelling router never races
    /// the teardown.
    fn attempt(&self, temp_c: i32) -> AttemptOutcome {
        let gate = Arc::clone(self.ctx.calibration_gate());
        gate.begin();

        let pcms = match self
            .ctx
            .try_start_calibration(self.config.min_speaker_idle(), CALIB_SAMPLE_RATE)
        {
            Ok(pcms) => pcms,
            Err(RouteError::Busy) => {
                gate.finish();
                return AttemptOutcome::Busy;
            }
            Err(err) => {
                warn!("calibration bring-up failed: {}", err);
                gate.finish();
                return AttemptOutcome::Failed;
            }
        };

        let t0_q6 = temp_c * (1 << 6);
        let loader = self.ctx.calibration_loader();

        let outcome = 'measure: {
            if let Err(err) = loader.start_speaker_calibration([t0_q6, t0_q6]) {
                warn!("start calibration failed: {}", err);
                break 'measure AttemptOutcome::Failed;
            }

            // Let the measurement tone run before the first status poll;
            // this wait is where cancellation usually lands.
            if gate.wait_cancellable(self.config.start_delay()) == WaitOutcome::Cancelled {
                break 'measure AttemptOutcome::Cancelled;
            }

            let mut polls = 0;
            loop {
                if gate.is_cancelled() {
                    break 'measure AttemptOutcome::Cancelled;
                }
                match loader.speaker_calibration_status() {
                    CalibStatus::Success(cal) => break 'measure AttemptOutcome::Success(cal),
                    CalibStatus::Failed => break 'measure AttemptOutcome::Failed,
                    CalibStatus::InProgress => {
                        polls += 1;
                        if polls >= self.config.max_polls {
                            warn!("calibration status polling exhausted");
                            break 'measure AttemptOutcome::Failed;
                        }
                        if gate.wait_cancellable(self.config.poll_interval())
                            == WaitOutcome::Cancelled
                        {
                            break 'measure AttemptOutcome::Cancelled;
                        }
                    }
                }
            }
        };

        // Teardown order matters: close the PCM nodes, deregister the
        // usecases (disabling their devices), persist, and only then
        // acknowledge the cancellation gate.
        let CalibPcms { mut rx, mut tx } = pcms;
        let _ = tx.stop();
        let _ = rx.stop();
        drop((rx, tx));
        self.ctx.end_calibration_usecases();

        if let AttemptOutcome::Success(cal) = &outcome {
            if let Err(err) = loader.set_speaker_calibration(cal) {
                warn!("installing calibration failed: {}", err);
            }
            match self.store.save(cal) {
                Ok(()) => info!("speaker calibration persisted"),
                // Non-fatal: the next boot recalibrates.
                Err(err) => warn!("persisting calibration failed: {}", err),
            }
        }

        gate.finish();
        outcome
    }
}
