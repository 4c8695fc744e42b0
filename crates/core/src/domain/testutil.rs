//! Shared test doubles for the routing and calibration tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use super::config::PlatformConfig;
use super::device::SoundDevice;
use super::hal::{
    CalType, CalibStatus, CalibrationLoader, CalibrationPersistence, Direction, EchoReference,
    HalError, MixerPathControl, PcmConfig, PcmDriver, PcmHandle, Result, SpeakerCalibration,
    TempCallback, ThermalClient,
};
use super::pcm::PcmDeviceId;
use super::routing::AudioContext;

/// Mixer double recording every operation in order.
#[derive(Default)]
pub(crate) struct TestMixer {
    pub ops: Mutex<Vec<String>>,
}

impl TestMixer {
    pub fn ops(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }
}

impl MixerPathControl for TestMixer {
    fn enable_device(&self, device: SoundDevice) -> Result<()> {
        self.ops.lock().unwrap().push(format!("+dev {device:?}"));
        Ok(())
    }

    fn disable_device(&self, device: SoundDevice) -> Result<()> {
        self.ops.lock().unwrap().push(format!("-dev {device:?}"));
        Ok(())
    }

    fn apply_route(&self, name: &str) -> Result<()> {
        self.ops.lock().unwrap().push(format!("+route {name}"));
        Ok(())
    }

    fn remove_route(&self, name: &str) -> Result<()> {
        self.ops.lock().unwrap().push(format!("-route {name}"));
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct NullEcho;

impl EchoReference for NullEcho {
    fn set_echo_reference(&self, _enabled: bool) {}
}

/// Calibration loader double with a scriptable status sequence.
#[derive(Default)]
pub(crate) struct TestCal {
    pub sent: Mutex<Vec<(u32, u32, u32)>>,
    pub statuses: Mutex<VecDeque<CalibStatus>>,
    pub started: Mutex<Vec<[i32; 2]>>,
    pub installed: Mutex<Option<SpeakerCalibration>>,
    pub fail_start: AtomicBool,
}

impl TestCal {
    pub fn script_statuses(&self, statuses: impl IntoIterator<Item = CalibStatus>) {
        self.statuses.lock().unwrap().extend(statuses);
    }
}

impl CalibrationLoader for TestCal {
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
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(HalError::Calibration("start rejected".into()));
        }
        self.started.lock().unwrap().push(t0);
        Ok(())
    }

    fn speaker_calibration_status(&self) -> CalibStatus {
        self.statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(CalibStatus::Failed)
    }
}

pub(crate) struct TestPcmHandle {
    live: Arc<AtomicI64>,
}

impl Drop for TestPcmHandle {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl PcmHandle for TestPcmHandle {
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    fn write(&mut self, frames: &[u8]) -> Result<usize> {
        Ok(frames.len())
    }
}

/// PCM driver double counting live handles; `fail` makes opens error.
#[derive(Default)]
pub(crate) struct TestPcm {
    pub fail: AtomicBool,
    pub live: Arc<AtomicI64>,
}

impl TestPcm {
    pub fn live_handles(&self) -> i64 {
        self.live.load(Ordering::SeqCst)
    }
}

impl PcmDriver for TestPcm {
    fn open(
        &self,
        _device: PcmDeviceId,
        _direction: Direction,
        _config: &PcmConfig,
    ) -> Result<Box<dyn PcmHandle>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(HalError::Pcm("open failed".into()));
        }
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(TestPcmHandle {
            live: Arc::clone(&self.live),
        }))
    }
}

/// Thermal client double; `emit` drives the registered callback.
pub(crate) struct TestThermal {
    pub available: bool,
    callback: Mutex<Option<TempCallback>>,
}

impl TestThermal {
    pub fn new(available: bool) -> Self {
        Self {
            available,
            callback: Mutex::new(None),
        }
    }

    pub fn emit(&self, temp_c: i32) {
        if let Some(cb) = self.callback.lock().unwrap().as_ref() {
            cb(temp_c);
        }
    }

    pub fn has_callback(&self) -> bool {
        self.callback.lock().unwrap().is_some()
    }
}

impl ThermalClient for TestThermal {
    fn register(&self, callback: TempCallback) -> bool {
        if !self.available {
            return false;
        }
        *self.callback.lock().unwrap() = Some(callback);
        true
    }

    fn request(&self, _client_name: &str, _enable: bool) -> bool {
        self.available
    }
}

/// In-memory calibration persistence.
#[derive(Default)]
pub(crate) struct TestStore {
    pub cell: Mutex<Option<SpeakerCalibration>>,
}

impl CalibrationPersistence for TestStore {
    fn load(&self) -> std::io::Result<Option<SpeakerCalibration>> {
        Ok(*self.cell.lock().unwrap())
    }

    fn save(&self, cal: &SpeakerCalibration) -> std::io::Result<()> {
        *self.cell.lock().unwrap() = Some(*cal);
        Ok(())
    }
}

pub(crate) struct TestHarness {
    pub ctx: Arc<AudioContext>,
    pub mixer: Arc<TestMixer>,
    pub cal: Arc<TestCal>,
    pub pcm: Arc<TestPcm>,
}

pub(crate) fn harness() -> TestHarness {
    let mixer = Arc::new(TestMixer::default());
    let cal = Arc::new(TestCal::default());
    let pcm = Arc::new(TestPcm::default());
    let ctx = AudioContext::new(
        &PlatformConfig::default(),
        Arc::clone(&mixer) as Arc<dyn MixerPathControl>,
        Arc::new(NullEcho),
        Arc::clone(&cal) as Arc<dyn CalibrationLoader>,
        Arc::clone(&pcm) as Arc<dyn PcmDriver>,
    )
    .unwrap();
    TestHarness { ctx, mixer, cal, pcm }
}
