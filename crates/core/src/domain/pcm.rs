//! PCM device and backend resolution
//!
//! Maps (usecase kind, direction) to the physical PCM device node. Platforms
//! with an external codec use an overlay table for a small fixed set of
//! usecases.

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::hal::Direction;
use super::usecase::UsecaseKind;

/// Index of a PCM device node on the sound card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PcmDeviceId(pub u32);

const DEEP_BUFFER_PCM_DEVICE: u32 = 0;
const MULTIMEDIA2_PCM_DEVICE: u32 = 1;
const VOICE_CALL_PCM_DEVICE: u32 = 2;
const FM_PLAYBACK_PCM_DEVICE: u32 = 5;
const FM_CAPTURE_PCM_DEVICE: u32 = 6;
const AUDIO_RECORD_PCM_DEVICE: u32 = 0;
const LOWLATENCY_PCM_DEVICE: u32 = 15;
const HOTWORD_PCM_DEVICE: u32 = 17;
const HOTWORD_EXT_CODEC_PCM_DEVICE: u32 = 16;
const SPKR_CALIB_RX_PCM_DEVICE: u32 = 5;
const SPKR_CALIB_TX_PCM_DEVICE: u32 = 25;

/// Usecases whose PCM device differs between internal and external codecs.
const MISC_USECASES: &[UsecaseKind] = &[UsecaseKind::HotwordCapture];

/// Resolves usecases to PCM device nodes for the detected codec topology.
#[derive(Debug, Clone, Copy)]
pub struct PcmDeviceResolver {
    external_codec: bool,
}

impl PcmDeviceResolver {
    pub fn new(external_codec: bool) -> Self {
        Self { external_codec }
    }

    pub fn external_codec(&self) -> bool {
        self.external_codec
    }

    /// PCM device node for a (kind, direction) pair; `None` means the pair
    /// is unroutable on this platform. Callers treat that as a
    /// configuration problem, never a crash.
    pub fn resolve(&self, kind: UsecaseKind, direction: Direction) -> Option<PcmDeviceId> {
        if self.external_codec && MISC_USECASES.contains(&kind) {
            if let Some(id) = Self::ext_codec_overlay(kind, direction) {
                return Some(id);
            }
        }
        let id = Self::base_table(kind, direction);
        if id.is_none() {
            warn!("no pcm device for {:?}/{:?}", kind, direction);
        }
        id
    }

    fn base_table(kind: UsecaseKind, direction: Direction) -> Option<PcmDeviceId> {
        use Direction::*;
        use UsecaseKind::*;
        let id = match (kind, direction) {
            (PrimaryPlayback, Playback) => DEEP_BUFFER_PCM_DEVICE,
            (DeepBufferPlayback, Playback) => DEEP_BUFFER_PCM_DEVICE,
            (LowLatencyPlayback, Playback) => LOWLATENCY_PCM_DEVICE,
            (MultiChannelPlayback, Playback) => MULTIMEDIA2_PCM_DEVICE,
            (FmPlayback, Playback) => FM_PLAYBACK_PCM_DEVICE,
            (FmPlayback, Direction::Capture) => FM_CAPTURE_PCM_DEVICE,
            (UsecaseKind::Capture, Direction::Capture) => AUDIO_RECORD_PCM_DEVICE,
            (LowLatencyCapture, Direction::Capture) => LOWLATENCY_PCM_DEVICE,
            (HotwordCapture, Direction::Capture) => HOTWORD_PCM_DEVICE,
            (VoiceCall, _) => VOICE_CALL_PCM_DEVICE,
            (SpeakerCalibRx, Playback) => SPKR_CALIB_RX_PCM_DEVICE,
            (SpeakerCalibTx, Direction::Capture) => SPKR_CALIB_TX_PCM_DEVICE,
            _ => return None,
        };
        Some(PcmDeviceId(id))
    }

    fn ext_codec_overlay(kind: UsecaseKind, direction: Direction) -> Option<PcmDeviceId> {
        use UsecaseKind::*;
        match (kind, direction) {
            (HotwordCapture, Direction::Capture) => Some(PcmDeviceId(HOTWORD_EXT_CODEC_PCM_DEVICE)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_playback_and_capture_lookup() {
        let r = PcmDeviceResolver::new(false);
        assert_eq!(
            r.resolve(UsecaseKind::DeepBufferPlayback, Direction::Playback),
            Some(PcmDeviceId(0))
        );
        assert_eq!(
            r.resolve(UsecaseKind::Capture, Direction::Capture),
            Some(PcmDeviceId(0))
        );
        assert_eq!(
            r.resolve(UsecaseKind::LowLatencyPlayback, Direction::Playback),
            Some(PcmDeviceId(15))
        );
    }

    #[test]
    fn test_voice_is_bidirectional() {
        let r = PcmDeviceResolver::new(false);
        assert_eq!(
            r.resolve(UsecaseKind::VoiceCall, Direction::Playback),
            r.resolve(UsecaseKind::VoiceCall, Direction::Capture)
        );
    }

    #[test]
    fn test_calibration_usecases_single_direction() {
        let r = PcmDeviceResolver::new(false);
        assert!(r.resolve(UsecaseKind::SpeakerCalibRx, Direction::Playback).is_some());
        assert!(r.resolve(UsecaseKind::SpeakerCalibRx, Direction::Capture).is_none());
        assert!(r.resolve(UsecaseKind::SpeakerCalibTx, Direction::Capture).is_some());
        assert!(r.resolve(UsecaseKind::SpeakerCalibTx, Direction::Playback).is_none());
    }

    #[test]
    fn test_external_codec_overlay() {
        let internal = PcmDeviceResolver::new(false);
        let external = PcmDeviceResolver::new(true);
        assert_eq!(
            internal.resolve(UsecaseKind::HotwordCapture, Direction::Capture),
            Some(PcmDeviceId(17))
        );
        assert_eq!(
            external.resolve(UsecaseKind::HotwordCapture, Direction::Capture),
            Some(PcmDeviceId(16))
        );
        // Non-misc usecases are unaffected by the overlay.
        assert_eq!(
            external.resolve(UsecaseKind::Capture, Direction::Capture),
            internal.resolve(UsecaseKind::Capture, Direction::Capture)
        );
    }

    #[test]
    fn test_unmapped_pair_is_none() {
        let r = PcmDeviceResolver::new(false);
        assert_eq!(r.resolve(UsecaseKind::Capture, Direction::Playback), None);
    }
}
