//! Stub mixer, PCM and calibration backends
//!
//! Operation-recording implementations used by the demo binary and the
//! integration tests. They honor the core engine's ordering contracts and
//! expose enough introspection to assert on them.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

use soundpath_core::domain::device::SoundDevice;
use soundpath_core::domain::hal::{
    CalType, CalibStatus, CalibrationLoader, Direction, EchoReference, HalError,
    MixerPathControl, PcmConfig, PcmDriver, PcmHandle, Result, SpeakerCalibration,
};
use soundpath_core::domain::pcm::PcmDeviceId;

/// One recorded mixer operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MixerOp {
    EnableDevice(SoundDevice),
    DisableDevice(SoundDevice),
    ApplyRoute(String),
    RemoveRoute(String),
}

/// Mixer-path backend that records every operation in order.
#[derive(Default)]
pub struct StubMixer {
    ops: Mutex<Vec<MixerOp>>,
    enabled: Mutex<HashSet<SoundDevice>>,
    echo_reference: AtomicBool,
}

impl StubMixer {
    pub fn new() -> Self {
        Self::default()
    }

    /// All operations recorded so far, in order.
    pub fn ops(&self) -> Vec<MixerOp> {
        self.ops.lock().unwrap().clone()
    }

    pub fn clear_ops(&self) {
        self.ops.lock().unwrap().clear();
    }

    /// Devices whose mixer path is currently enabled.
    pub fn enabled_devices(&self) -> Vec<SoundDevice> {
        self.enabled.lock().unwrap().iter().copied().collect()
    }

    pub fn is_enabled(&self, device: SoundDevice) -> bool {
        self.enabled.lock().unwrap().contains(&device)
    }

    pub fn echo_reference_enabled(&self) -> bool {
        self.echo_reference.load(Ordering::SeqCst)
    }
}

impl MixerPathControl for StubMixer {
    fn enable_device(&self, device: SoundDevice) -> Result<()> {
        debug!("mixer: enable {:?}", device);
        self.enabled.lock().unwrap().insert(device);
        self.ops.lock().unwrap().push(MixerOp::EnableDevice(device));
        Ok(())
    }

    fn disable_device(&self, device: SoundDevice) -> Result<()> {
        debug!("mixer: disable {:?}", device);
        self.enabled.lock().unwrap().remove(&device);
        self.ops.lock().unwrap().push(MixerOp::DisableDevice(device));
        Ok(())
    }

    fn apply_route(&self, name: &str) -> Result<()> {
        debug!("mixer: apply '{}'", name);
        self.ops.lock().unwrap().push(MixerOp::ApplyRoute(name.to_string()));
        Ok(())
    }

    fn remove_route(&self, name: &str) -> Result<()> {
        debug!("mixer: remove '{}'", name);
        self.ops.lock().unwrap().push(MixerOp::RemoveRoute(name.to_string()));
        Ok(())
    }
}

impl EchoReference for StubMixer {
    fn set_echo_reference(&self, enabled: bool) {
        debug!("mixer: echo reference {}", enabled);
        self.echo_reference.store(enabled, Ordering::SeqCst);
    }
}

struct StubPcmHandle {
    device: PcmDeviceId,
    direction: Direction,
    started: bool,
    live: Arc<AtomicI64>,
}

impl Drop for StubPcmHandle {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
        debug!("pcm: closed {:?}/{:?}", self.device, self.direction);
    }
}

impl PcmHandle for StubPcmHandle {
    fn start(&mut self) -> Result<()> {
        self.started = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.started = false;
        Ok(())
    }

    fn write(&mut self, frames: &[u8]) -> Result<usize> {
        if !self.started {
            return Err(HalError::Pcm("write on stopped pcm".into()));
        }
        Ok(frames.len())
    }
}

/// PCM driver whose opens always succeed unless failure-injected.
#[derive(Default)]
pub struct StubPcmDriver {
    live: Arc<AtomicI64>,
    fail_all: AtomicBool,
    fail_devices: Mutex<HashSet<PcmDeviceId>>,
    opened: Mutex<Vec<(PcmDeviceId, Direction)>>,
}

impl StubPcmDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of handles currently open.
    pub fn live_handles(&self) -> i64 {
        self.live.load(Ordering::SeqCst)
    }

    /// Every (device, direction) pair ever opened.
    pub fn opened(&self) -> Vec<(PcmDeviceId, Direction)> {
        self.opened.lock().unwrap().clone()
    }

    /// Make every subsequent open fail.
    pub fn fail_all(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    /// Make opens of one PCM device fail.
    pub fn fail_device(&self, device: PcmDeviceId) {
        self.fail_devices.lock().unwrap().insert(device);
    }
}

impl PcmDriver for StubPcmDriver {
    fn open(
        &self,
        device: PcmDeviceId,
        direction: Direction,
        _config: &PcmConfig,
    ) -> Result<Box<dyn PcmHandle>> {
        if self.fail_all.load(Ordering::SeqCst)
            || self.fail_devices.lock().unwrap().contains(&device)
        {
            return Err(HalError::Pcm(format!("cannot open pcm {}", device.0)));
        }
        debug!("pcm: open {:?}/{:?}", device, direction);
        self.opened.lock().unwrap().push((device, direction));
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(StubPcmHandle {
            device,
            direction,
            started: false,
            live: Arc::clone(&self.live),
        }))
    }
}

/// Stands in when no vendor calibration library is present: blob fetches
/// return nothing and speaker calibration cannot run.
#[derive(Default)]
pub struct NullCalibrationLoader;

impl CalibrationLoader for NullCalibrationLoader {
    fn get_calibration(&self, _cal: CalType) -> Option<Vec<u8>> {
        None
    }

    fn send_calibration(&self, _acdb_id: u32, _app_type: u32, _sample_rate: u32) {}

    fn set_speaker_calibration(&self, _cal: &SpeakerCalibration) -> Result<()> {
        Ok(())
    }

    fn start_speaker_calibration(&self, _t0: [i32; 2]) -> Result<()> {
        Err(HalError::Unavailable("calibration library"))
    }

    fn speaker_calibration_status(&self) -> CalibStatus {
        CalibStatus::Failed
    }
}

/// Calibration loader with a scriptable status sequence, recording
/// everything pushed at it.
#[derive(Default)]
pub struct ScriptedCalibrationLoader {
    sent: Mutex<Vec<(u32, u32, u32)>>,
    statuses: Mutex<VecDeque<CalibStatus>>,
    started: Mutex<Vec<[i32; 2]>>,
    installed: Mutex<Option<SpeakerCalibration>>,
}

impl ScriptedCalibrationLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the statuses returned by successive status polls.
    pub fn script_statuses(&self, statuses: impl IntoIterator<Item = CalibStatus>) {
        self.statuses.lock().unwrap().extend(statuses);
    }

    pub fn sent_calibrations(&self) -> Vec<(u32, u32, u32)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn started_with(&self) -> Vec<[i32; 2]> {
        self.started.lock().unwrap().clone()
    }

    pub fn installed(&self) -> Option<SpeakerCalibration> {
        *self.installed.lock().unwrap()
    }
}

impl CalibrationLoader for ScriptedCalibrationLoader {
    fn get_calibration(&self, _cal: CalType) -> Option<Vec<u8>> {
        None
    }

    fn send_calibration(&self, acdb_id: u32, app_type: u32, sample_rate: u32) {
        self.sent.lock().unwrap().push((acdb_id, app_type, sample_rate));
    }

    fn set_speaker_calibration(&self, cal: &SpeakerCalibration) -> Result<()> {
        *self.installed.lock().unwrap() = Some(*cal);
        Ok(())
    }

    fn start_speaker_calibration(&self, t0: [i32; 2]) -> Result<()> {
        self.started.lock().unwrap().push(t0);
        Ok(())
    }

    fn speaker_calibration_status(&self) -> CalibStatus {
        self.statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(CalibStatus::InProgress)
    }
}
