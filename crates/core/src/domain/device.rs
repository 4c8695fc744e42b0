//! Sound device enumeration and the sound-device table
//!
//! Every physical hardware path the router can enable is identified by a
//! [`SoundDevice`]. The per-device attributes (mixer route name, calibration
//! id, backend, bit width) live in one [`DeviceSpec`] per variant, with a
//! runtime override layer applied once at platform init.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use std::collections::HashMap;

/// Errors raised by sound-device table operations
#[derive(Debug, Error)]
pub enum DeviceError {
    /// Route name does not match any known sound device
    #[error("Unknown sound device: {0}")]
    UnknownDevice(String),

    /// Override applied to the sentinel device
    #[error("Cannot override SoundDevice::None")]
    NoneOverride,
}

/// Direction class of a sound device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceClass {
    Output,
    Input,
}

/// Identifier for one enabled hardware path.
///
/// Playback devices first, capture devices second; `None` is the sentinel for
/// "no device" (never registered, never reference counted).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SoundDevice {
    None,

    // Playback
    OutHandset,
    OutSpeaker,
    OutSpeakerReverse,
    OutHeadphones,
    OutSpeakerAndHeadphones,
    OutSpeakerAndAncHeadset,
    OutSpeakerAndHdmi,
    OutSpeakerAndUsbHeadset,
    OutVoiceHandset,
    OutVoiceHacHandset,
    OutVoiceSpeaker,
    OutVoiceHeadphones,
    OutVoiceTtyFullHeadphones,
    OutVoiceTtyVcoHeadphones,
    OutVoiceTtyHcoHandset,
    OutHdmi,
    OutBtSco,
    OutBtScoWb,
    OutUsbHeadset,
    OutTransmissionFm,
    OutAfeProxy,
    OutAncHeadset,
    OutVoiceAncHeadset,
    OutSpeakerProtected,

    // Capture
    InHandsetMic,
    InHandsetMicAec,
    InHandsetMicNs,
    InHandsetMicAecNs,
    InHandsetDmic,
    InHandsetDmicAec,
    InHandsetDmicNs,
    InHandsetDmicAecNs,
    InHandsetDmicStereo,
    InSpeakerMic,
    InSpeakerMicAec,
    InSpeakerMicNs,
    InSpeakerMicAecNs,
    InSpeakerDmic,
    InSpeakerDmicAec,
    InSpeakerDmicNs,
    InSpeakerDmicAecNs,
    InHeadsetMic,
    InHeadsetMicAec,
    InCamcorderMic,
    InVoiceRecMic,
    InVoiceRecMicAec,
    InVoiceRecMicNs,
    InVoiceRecDmicFluence,
    InVoiceRecDmicStereo,
    InVoiceDmic,
    InVoiceSpeakerMic,
    InVoiceSpeakerDmic,
    InVoiceHeadsetMic,
    InVoiceTtyFullHeadsetMic,
    InVoiceTtyVcoHandsetMic,
    InVoiceTtyHcoHeadsetMic,
    InBtScoMic,
    InBtScoMicNrec,
    InBtScoMicWb,
    InBtScoMicWbNrec,
    InCaptureFm,
    InCaptureViFeedback,
    InUsbHeadsetMic,
}

/// Static attributes of one sound device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceSpec {
    /// Mixer route name
    pub route: &'static str,
    /// Vendor calibration identifier
    pub acdb_id: u32,
    /// Hardware backend the path is wired to, if any
    pub backend: Option<&'static str>,
    /// Sample bit width on this path
    pub bit_width: u16,
}

impl DeviceSpec {
    const fn new(route: &'static str, acdb_id: u32) -> Self {
        Self {
            route,
            acdb_id,
            backend: None,
            bit_width: 16,
        }
    }

    const fn with_backend(route: &'static str, acdb_id: u32, backend: &'static str) -> Self {
        Self {
            route,
            acdb_id,
            backend: Some(backend),
            bit_width: 16,
        }
    }
}

impl SoundDevice {
    /// All real devices, playback range first then capture range.
    pub const ALL: &'static [SoundDevice] = &[
        SoundDevice::OutHandset,
        SoundDevice::OutSpeaker,
        SoundDevice::OutSpeakerReverse,
        SoundDevice::OutHeadphones,
        SoundDevice::OutSpeakerAndHeadphones,
        SoundDevice::OutSpeakerAndAncHeadset,
        SoundDevice::OutSpeakerAndHdmi,
        SoundDevice::OutSpeakerAndUsbHeadset,
        SoundDevice::OutVoiceHandset,
        SoundDevice::OutVoiceHacHandset,
        SoundDevice::OutVoiceSpeaker,
        SoundDevice::OutVoiceHeadphones,
        SoundDevice::OutVoiceTtyFullHeadphones,
        SoundDevice::OutVoiceTtyVcoHeadphones,
        SoundDevice::OutVoiceTtyHcoHandset,
        SoundDevice::OutHdmi,
        SoundDevice::OutBtSco,
        SoundDevice::OutBtScoWb,
        SoundDevice::OutUsbHeadset,
        SoundDevice::OutTransmissionFm,
        SoundDevice::OutAfeProxy,
        SoundDevice::OutAncHeadset,
        SoundDevice::OutVoiceAncHeadset,
        SoundDevice::OutSpeakerProtected,
        SoundDevice::InHandsetMic,
        SoundDevice::InHandsetMicAec,
        SoundDevice::InHandsetMicNs,
        SoundDevice::InHandsetMicAecNs,
        SoundDevice::InHandsetDmic,
        SoundDevice::InHandsetDmicAec,
        SoundDevice::InHandsetDmicNs,
        SoundDevice::InHandsetDmicAecNs,
        SoundDevice::InHandsetDmicStereo,
        SoundDevice::InSpeakerMic,
        SoundDevice::InSpeakerMicAec,
        SoundDevice::InSpeakerMicNs,
        SoundDevice::InSpeakerMicAecNs,
        SoundDevice::InSpeakerDmic,
        SoundDevice::InSpeakerDmicAec,
        SoundDevice::InSpeakerDmicNs,
        SoundDevice::InSpeakerDmicAecNs,
        SoundDevice::InHeadsetMic,
        SoundDevice::InHeadsetMicAec,
        SoundDevice::InCamcorderMic,
        SoundDevice::InVoiceRecMic,
        SoundDevice::InVoiceRecMicAec,
        SoundDevice::InVoiceRecMicNs,
        SoundDevice::InVoiceRecDmicFluence,
        SoundDevice::InVoiceRecDmicStereo,
        SoundDevice::InVoiceDmic,
        SoundDevice::InVoiceSpeakerMic,
        SoundDevice::InVoiceSpeakerDmic,
        SoundDevice::InVoiceHeadsetMic,
        SoundDevice::InVoiceTtyFullHeadsetMic,
        SoundDevice::InVoiceTtyVcoHandsetMic,
        SoundDevice::InVoiceTtyHcoHeadsetMic,
        SoundDevice::InBtScoMic,
        SoundDevice::InBtScoMicNrec,
        SoundDevice::InBtScoMicWb,
        SoundDevice::InBtScoMicWbNrec,
        SoundDevice::InCaptureFm,
        SoundDevice::InCaptureViFeedback,
        SoundDevice::InUsbHeadsetMic,
    ];

    /// Direction class, `None` for the sentinel.
    pub fn class(self) -> Option<DeviceClass> {
        use SoundDevice::*;
        match self {
            None => Option::None,
            OutHandset | OutSpeaker | OutSpeakerReverse | OutHeadphones
            | OutSpeakerAndHeadphones | OutSpeakerAndAncHeadset | OutSpeakerAndHdmi
            | OutSpeakerAndUsbHeadset | OutVoiceHandset | OutVoiceHacHandset
            | OutVoiceSpeaker | OutVoiceHeadphones | OutVoiceTtyFullHeadphones
            | OutVoiceTtyVcoHeadphones | OutVoiceTtyHcoHandset | OutHdmi | OutBtSco
            | OutBtScoWb | OutUsbHeadset | OutTransmissionFm | OutAfeProxy
            | OutAncHeadset | OutVoiceAncHeadset | OutSpeakerProtected => {
                Some(DeviceClass::Output)
            }
            _ => Some(DeviceClass::Input),
        }
    }

    pub fn is_output(self) -> bool {
        self.class() == Some(DeviceClass::Output)
    }

    pub fn is_input(self) -> bool {
        self.class() == Some(DeviceClass::Input)
    }

    /// True for every path that drives the loudspeaker, including combos.
    /// The calibration subsystem keys its idle check on these.
    pub fn uses_speaker(self) -> bool {
        use SoundDevice::*;
        matches!(
            self,
            OutSpeaker
                | OutSpeakerReverse
                | OutSpeakerAndHeadphones
                | OutSpeakerAndAncHeadset
                | OutSpeakerAndHdmi
                | OutSpeakerAndUsbHeadset
                | OutVoiceSpeaker
                | OutSpeakerProtected
        )
    }

    /// Paths driving active noise cancellation; these need the ANC
    /// calibration blob pushed when enabled.
    pub fn uses_anc(self) -> bool {
        use SoundDevice::*;
        matches!(
            self,
            OutAncHeadset | OutVoiceAncHeadset | OutSpeakerAndAncHeadset
        )
    }

    /// Built-in route/calibration attributes, before runtime overrides.
    pub fn default_spec(self) -> Option<DeviceSpec> {
        use SoundDevice::*;
        let spec = match self {
            None => return Option::None,
            OutHandset => DeviceSpec::new("handset", 7),
            OutSpeaker => DeviceSpec::new("speaker", 14),
            OutSpeakerReverse => DeviceSpec::new("speaker-reverse", 14),
            OutHeadphones => DeviceSpec::new("headphones", 10),
            OutSpeakerAndHeadphones => DeviceSpec::new("speaker-and-headphones", 10),
            OutSpeakerAndAncHeadset => DeviceSpec::new("speaker-and-anc-headphones", 26),
            OutSpeakerAndHdmi => DeviceSpec::new("speaker-and-hdmi", 14),
            OutSpeakerAndUsbHeadset => DeviceSpec::new("speaker-and-usb-headphones", 14),
            OutVoiceHandset => DeviceSpec::new("voice-handset", 7),
            OutVoiceHacHandset => DeviceSpec::new("voice-hac-handset", 53),
            OutVoiceSpeaker => DeviceSpec::new("voice-speaker", 14),
            OutVoiceHeadphones => DeviceSpec::new("voice-headphones", 10),
            OutVoiceTtyFullHeadphones => DeviceSpec::new("voice-tty-full-headphones", 17),
            OutVoiceTtyVcoHeadphones => DeviceSpec::new("voice-tty-vco-headphones", 17),
            OutVoiceTtyHcoHandset => DeviceSpec::new("voice-tty-hco-handset", 37),
            OutHdmi => DeviceSpec::with_backend("hdmi", 18, "hdmi"),
            OutBtSco => DeviceSpec::with_backend("bt-sco-headset", 22, "bt-sco"),
            OutBtScoWb => DeviceSpec::with_backend("bt-sco-headset-wb", 39, "bt-sco-wb"),
            OutUsbHeadset => DeviceSpec::with_backend("usb-headphones", 45, "usb"),
            OutTransmissionFm => DeviceSpec::new("transmission-fm", 0),
            OutAfeProxy => DeviceSpec::with_backend("afe-proxy", 0, "afe-proxy"),
            OutAncHeadset => DeviceSpec::new("anc-headphones", 26),
            OutVoiceAncHeadset => DeviceSpec::new("voice-anc-headphones", 26),
            OutSpeakerProtected => DeviceSpec::new("speaker-protected", 101),

            InHandsetMic => DeviceSpec::new("handset-mic", 4),
            InHandsetMicAec => DeviceSpec::new("handset-mic-aec", 106),
            InHandsetMicNs => DeviceSpec::new("handset-mic-ns", 107),
            InHandsetMicAecNs => DeviceSpec::new("handset-mic-aec-ns", 108),
            InHandsetDmic => DeviceSpec::new("dmic-endfire", 41),
            InHandsetDmicAec => DeviceSpec::new("dmic-endfire-aec", 109),
            InHandsetDmicNs => DeviceSpec::new("dmic-endfire-ns", 110),
            InHandsetDmicAecNs => DeviceSpec::new("dmic-endfire-aec-ns", 111),
            InHandsetDmicStereo => DeviceSpec::new("handset-stereo-dmic-ef", 34),
            InSpeakerMic => DeviceSpec::new("speaker-mic", 11),
            InSpeakerMicAec => DeviceSpec::new("speaker-mic-aec", 112),
            InSpeakerMicNs => DeviceSpec::new("speaker-mic-ns", 113),
            InSpeakerMicAecNs => DeviceSpec::new("speaker-mic-aec-ns", 114),
            InSpeakerDmic => DeviceSpec::new("speaker-dmic-endfire", 43),
            InSpeakerDmicAec => DeviceSpec::new("speaker-dmic-aec", 115),
            InSpeakerDmicNs => DeviceSpec::new("speaker-dmic-ns", 116),
            InSpeakerDmicAecNs => DeviceSpec::new("speaker-dmic-aec-ns", 117),
            InHeadsetMic => DeviceSpec::new("headset-mic", 8),
            InHeadsetMicAec => DeviceSpec::new("headset-mic-aec", 8),
            InCamcorderMic => DeviceSpec::new("camcorder-mic", 4),
            InVoiceRecMic => DeviceSpec::new("voice-rec-mic", 4),
            InVoiceRecMicAec => DeviceSpec::new("voice-rec-mic-aec", 112),
            InVoiceRecMicNs => DeviceSpec::new("voice-rec-mic-ns", 107),
            InVoiceRecDmicFluence => DeviceSpec::new("voice-rec-dmic-ef-fluence", 41),
            InVoiceRecDmicStereo => DeviceSpec::new("voice-rec-dmic-ef", 34),
            InVoiceDmic => DeviceSpec::new("voice-dmic-ef", 41),
            InVoiceSpeakerMic => DeviceSpec::new("voice-speaker-mic", 11),
            InVoiceSpeakerDmic => DeviceSpec::new("voice-speaker-dmic-ef", 43),
            InVoiceHeadsetMic => DeviceSpec::new("voice-headset-mic", 8),
            InVoiceTtyFullHeadsetMic => DeviceSpec::new("voice-tty-full-headset-mic", 16),
            InVoiceTtyVcoHandsetMic => DeviceSpec::new("voice-tty-vco-handset-mic", 36),
            InVoiceTtyHcoHeadsetMic => DeviceSpec::new("voice-tty-hco-headset-mic", 16),
            InBtScoMic => DeviceSpec::with_backend("bt-sco-mic", 21, "bt-sco"),
            InBtScoMicNrec => DeviceSpec::with_backend("bt-sco-mic", 122, "bt-sco"),
            InBtScoMicWb => DeviceSpec::with_backend("bt-sco-mic-wb", 38, "bt-sco-wb"),
            InBtScoMicWbNrec => DeviceSpec::with_backend("bt-sco-mic-wb", 123, "bt-sco-wb"),
            InCaptureFm => DeviceSpec::new("capture-fm", 0),
            InCaptureViFeedback => DeviceSpec::new("vi-feedback", 102),
            InUsbHeadsetMic => DeviceSpec::with_backend("usb-headset-mic", 44, "usb"),
        };
        Some(spec)
    }

    /// Reverse lookup by route name, used by configuration loading.
    pub fn from_route(route: &str) -> Option<SoundDevice> {
        SoundDevice::ALL
            .iter()
            .copied()
            .find(|d| d.default_spec().map(|s| s.route) == Some(route))
    }
}

/// Runtime patch for one device, layered over [`DeviceSpec`]
#[derive(Debug, Clone, Default)]
struct DeviceOverride {
    acdb_id: Option<u32>,
    backend: Option<String>,
    bit_width: Option<u16>,
}

/// Fully resolved attributes after overrides
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSpec {
    pub route: &'static str,
    pub acdb_id: u32,
    pub backend: Option<String>,
    pub bit_width: u16,
}

/// The sound-device table: built-in specs plus the override layer.
///
/// Overrides are applied during platform init only; afterwards the table is
/// shared read-only across threads.
#[derive(Debug, Default)]
pub struct SoundDeviceTable {
    overrides: HashMap<SoundDevice, DeviceOverride>,
}

impl SoundDeviceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_acdb_id(&mut self, device: SoundDevice, acdb_id: u32) -> Result<(), DeviceError> {
        if device == SoundDevice::None {
            return Err(DeviceError::NoneOverride);
        }
        tracing::debug!("acdb override: {:?} -> {}", device, acdb_id);
        self.overrides.entry(device).or_default().acdb_id = Some(acdb_id);
        Ok(())
    }

    pub fn set_backend(&mut self, device: SoundDevice, backend: &str) -> Result<(), DeviceError> {
        if device == SoundDevice::None {
            return Err(DeviceError::NoneOverride);
        }
        tracing::debug!("backend override: {:?} -> {}", device, backend);
        self.overrides.entry(device).or_default().backend = Some(backend.to_string());
        Ok(())
    }

    pub fn set_bit_width(&mut self, device: SoundDevice, bit_width: u16) -> Result<(), DeviceError> {
        if device == SoundDevice::None {
            return Err(DeviceError::NoneOverride);
        }
        self.overrides.entry(device).or_default().bit_width = Some(bit_width);
        Ok(())
    }

    /// Resolved attributes for a device; `None` only for the sentinel.
    pub fn spec(&self, device: SoundDevice) -> Option<ResolvedSpec> {
        let base = device.default_spec()?;
        let ov = self.overrides.get(&device);
        Some(ResolvedSpec {
            route: base.route,
            acdb_id: ov.and_then(|o| o.acdb_id).unwrap_or(base.acdb_id),
            backend: ov
                .and_then(|o| o.backend.clone())
                .or_else(|| base.backend.map(str::to_string)),
            bit_width: ov.and_then(|o| o.bit_width).unwrap_or(base.bit_width),
        })
    }

    pub fn acdb_id(&self, device: SoundDevice) -> Option<u32> {
        self.spec(device).map(|s| s.acdb_id)
    }

    /// Mixer path name handed to `apply_route`/`remove_route`.
    ///
    /// A backend override produces a suffixed path, matching how mixer XML
    /// names backend-specific variants of the same route.
    pub fn route_name(&self, device: SoundDevice) -> Option<String> {
        let base = device.default_spec()?;
        let ov_backend = self.overrides.get(&device).and_then(|o| o.backend.as_deref());
        Some(match ov_backend {
            Some(backend) => format!("{} {}", base.route, backend),
            Option::None => base.route.to_string(),
        })
    }

    /// True when both devices sit on the same hardware backend; such pairs
    /// cannot be active simultaneously during a device switch.
    pub fn shares_backend(&self, a: SoundDevice, b: SoundDevice) -> bool {
        match (self.spec(a), self.spec(b)) {
            (Some(sa), Some(sb)) => match (&sa.backend, &sb.backend) {
                (Some(ba), Some(bb)) => ba == bb,
                // Devices without an explicit backend share the codec's
                // primary interface.
                (Option::None, Option::None) => true,
                _ => false,
            },
            _ => false,
        }
    }
}
