//! Hardware collaborator interfaces
//!
//! The router reaches every piece of vendor hardware through these traits:
//! mixer path control, the calibration loader, the thermal service and the
//! PCM driver. Implementations are injected when the [`AudioContext`] is
//! built; a null implementation stands in when a service is unavailable.
//!
//! [`AudioContext`]: super::routing::AudioContext

use thiserror::Error;

use super::device::SoundDevice;
use super::pcm::PcmDeviceId;

/// Errors surfaced by hardware collaborators
#[derive(Debug, Error)]
pub enum HalError {
    #[error("Mixer control failed: {0}")]
    Mixer(String),

    #[error("PCM error: {0}")]
    Pcm(String),

    #[error("Calibration service error: {0}")]
    Calibration(String),

    #[error("Service unavailable: {0}")]
    Unavailable(&'static str),
}

pub type Result<T> = std::result::Result<T, HalError>;

/// Control surface of the mixer-path layer.
///
/// Route names are derived from the sound-device table. The engine
/// guarantees enable-before-apply and remove-before-disable ordering.
pub trait MixerPathControl: Send + Sync {
    fn enable_device(&self, device: SoundDevice) -> Result<()>;
    fn disable_device(&self, device: SoundDevice) -> Result<()>;
    fn apply_route(&self, name: &str) -> Result<()>;
    fn remove_route(&self, name: &str) -> Result<()>;
}

/// Echo-reference route toggle, the device selector's one permitted side
/// effect.
pub trait EchoReference: Send + Sync {
    fn set_echo_reference(&self, enabled: bool);
}

/// Calibration blob categories held by the vendor store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalType {
    Anc,
    Mbhc,
    Mad,
    SpeakerProtection,
}

/// Per-channel speaker calibration result.
///
/// `t0` is the calibration temperature in Q6 fixed point (degrees Celsius ×
/// 64); `r0` the DC resistance in Q24 fixed point (ohms × 2^24).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeakerCalibration {
    pub t0: [i32; 2],
    pub r0: [i32; 2],
}

impl SpeakerCalibration {
    pub const MIN_T0_Q6: i32 = -30 * (1 << 6);
    pub const MAX_T0_Q6: i32 = 80 * (1 << 6);
    pub const MIN_R0_Q24: i32 = 2 * (1 << 24);
    pub const MAX_R0_Q24: i32 = 40 * (1 << 24);

    /// True when every channel's values fall inside the platform's valid
    /// ranges; out-of-range stored data forces a recalibration.
    pub fn in_valid_range(&self) -> bool {
        self.t0
            .iter()
            .all(|&t| (Self::MIN_T0_Q6..=Self::MAX_T0_Q6).contains(&t))
            && self
                .r0
                .iter()
                .all(|&r| (Self::MIN_R0_Q24..=Self::MAX_R0_Q24).contains(&r))
    }
}

/// Outcome of one hardware calibration status poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibStatus {
    /// Calibration finished; result attached
    Success(SpeakerCalibration),
    /// Still measuring, poll again
    InProgress,
    /// Hardware reported failure
    Failed,
}

/// Vendor calibration library (ACDB-style), injected at construction.
pub trait CalibrationLoader: Send + Sync {
    /// Fetch a stored calibration blob, `None` when absent.
    fn get_calibration(&self, cal: CalType) -> Option<Vec<u8>>;

    /// Push per-device calibration to the DSP for an active path.
    fn send_calibration(&self, acdb_id: u32, app_type: u32, sample_rate: u32);

    /// Install a speaker-protection calibration result.
    fn set_speaker_calibration(&self, cal: &SpeakerCalibration) -> Result<()>;

    /// Kick off a hardware calibration run at the given temperatures (Q6).
    fn start_speaker_calibration(&self, t0: [i32; 2]) -> Result<()>;

    /// Poll the hardware for the calibration outcome.
    fn speaker_calibration_status(&self) -> CalibStatus;
}

/// Callback delivering temperature samples in degrees Celsius.
pub type TempCallback = Box<dyn Fn(i32) + Send + Sync>;

/// Thermal service client.
pub trait ThermalClient: Send + Sync {
    /// Register for temperature callbacks; false when the service is absent.
    fn register(&self, callback: TempCallback) -> bool;

    /// Enable or disable sampling for a named client.
    fn request(&self, client_name: &str, enable: bool) -> bool;
}

/// Direction of a PCM device node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Playback,
    Capture,
}

/// Open parameters for a PCM node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmConfig {
    pub channels: u16,
    pub rate: u32,
    pub period_size: u32,
    pub period_count: u32,
}

impl Default for PcmConfig {
    fn default() -> Self {
        Self {
            channels: 2,
            rate: 48000,
            period_size: 256,
            period_count: 4,
        }
    }
}

/// An opened PCM node. Dropping the handle closes it.
pub trait PcmHandle: Send {
    fn start(&mut self) -> Result<()>;
    fn stop(&mut self) -> Result<()>;

    /// Write frames of audio; only the keep-alive worker uses this.
    fn write(&mut self, frames: &[u8]) -> Result<usize>;
}

/// PCM device opener. Open fails fast and never blocks the control thread.
pub trait PcmDriver: Send + Sync {
    fn open(
        &self,
        device: PcmDeviceId,
        direction: Direction,
        config: &PcmConfig,
    ) -> Result<Box<dyn PcmHandle>>;
}

/// Persistence of speaker calibration results across boots.
pub trait CalibrationPersistence: Send + Sync {
    /// Read the stored calibration; `Ok(None)` when no file exists yet.
    fn load(&self) -> std::io::Result<Option<SpeakerCalibration>>;

    /// Persist a successful calibration.
    fn save(&self, cal: &SpeakerCalibration) -> std::io::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_range_check() {
        let good = SpeakerCalibration {
            t0: [40 * (1 << 6), 40 * (1 << 6)],
            r0: [8 * (1 << 24), 8 * (1 << 24)],
        };
        assert!(good.in_valid_range());

        let cold = SpeakerCalibration {
            t0: [-40 * (1 << 6), 40 * (1 << 6)],
            r0: [8 * (1 << 24), 8 * (1 << 24)],
        };
        assert!(!cold.in_valid_range());

        let open_circuit = SpeakerCalibration {
            t0: [40 * (1 << 6), 40 * (1 << 6)],
            r0: [41 * (1 << 24), 8 * (1 << 24)],
        };
        assert!(!open_circuit.in_valid_range());
    }

    #[test]
    fn test_range_bounds_inclusive() {
        let edge = SpeakerCalibration {
            t0: [SpeakerCalibration::MIN_T0_Q6, SpeakerCalibration::MAX_T0_Q6],
            r0: [SpeakerCalibration::MIN_R0_Q24, SpeakerCalibration::MAX_R0_Q24],
        };
        assert!(edge.in_valid_range());
    }
}
