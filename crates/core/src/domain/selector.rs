//! Device selection
//!
//! Pure mapping from requested logical devices, audio mode, active-input
//! characteristics and feature toggles to a single sound device per
//! direction. Combination requests go through an explicit combo table;
//! single-device resolution is short-circuit priority (TTY, then ANC, then
//! physical device class). The one permitted side effect is toggling the
//! echo-reference route through the [`EchoReference`] collaborator.

use tracing::{error, trace};

use super::config::{FeatureFlags, TtyMode};
use super::device::SoundDevice;
use super::hal::EchoReference;

/// Requested logical output endpoints, as a bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OutputDevices(u32);

impl OutputDevices {
    pub const NONE: Self = Self(0);
    pub const EARPIECE: Self = Self(1 << 0);
    pub const SPEAKER: Self = Self(1 << 1);
    pub const WIRED_HEADSET: Self = Self(1 << 2);
    pub const WIRED_HEADPHONE: Self = Self(1 << 3);
    pub const HDMI: Self = Self(1 << 4);
    pub const USB_HEADSET: Self = Self(1 << 5);
    pub const BT_SCO: Self = Self(1 << 6);
    pub const FM_TX: Self = Self(1 << 7);
    pub const PROXY: Self = Self(1 << 8);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_exactly(self, other: Self) -> bool {
        self.0 == other.0
    }

    pub fn count(self) -> u32 {
        self.0.count_ones()
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

impl std::ops::BitOr for OutputDevices {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Requested logical input endpoints, as a bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InputDevices(u32);

impl InputDevices {
    pub const NONE: Self = Self(0);
    pub const BUILTIN_MIC: Self = Self(1 << 0);
    pub const BACK_MIC: Self = Self(1 << 1);
    pub const HEADSET_MIC: Self = Self(1 << 2);
    pub const BT_SCO_MIC: Self = Self(1 << 3);
    pub const FM_TUNER: Self = Self(1 << 4);
    pub const USB_MIC: Self = Self(1 << 5);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

impl std::ops::BitOr for InputDevices {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Operating mode of the audio device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioMode {
    #[default]
    Normal,
    Ringtone,
    InCall,
    InCommunication,
}

/// Source hint attached to an active capture stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureSource {
    #[default]
    Default,
    Mic,
    Camcorder,
    VoiceRecognition,
    VoiceCommunication,
    FmTuner,
}

/// Characteristics of the currently active input stream.
#[derive(Debug, Clone, Copy)]
pub struct ActiveInput {
    pub source: CaptureSource,
    pub devices: InputDevices,
    pub channels: u16,
    pub aec: bool,
    pub ns: bool,
}

impl Default for ActiveInput {
    fn default() -> Self {
        Self {
            source: CaptureSource::Default,
            devices: InputDevices::NONE,
            channels: 1,
            aec: false,
            ns: false,
        }
    }
}

/// Immutable view of the state the selector depends on.
#[derive(Debug, Clone, Copy)]
pub struct SelectionContext<'a> {
    pub mode: AudioMode,
    pub tty_mode: TtyMode,
    pub hac: bool,
    pub flags: &'a FeatureFlags,
}

impl SelectionContext<'_> {
    fn in_call(&self) -> bool {
        self.mode == AudioMode::InCall
    }
}

/// Resolve the output sound device for a requested device mask.
///
/// Unknown two-device combinations are logged and fall through to the
/// single-device priority chain, degrading to whichever single endpoint
/// matches first.
pub fn select_output_device(req: OutputDevices, ctx: &SelectionContext) -> SoundDevice {
    trace!("select output: devices {:#x}", req.bits());

    if req.is_empty() {
        return SoundDevice::None;
    }

    if req.count() == 2 {
        if let Some(combo) = combo_device(req, ctx) {
            return combo;
        }
        error!("invalid combo device ({:#x})", req.bits());
        // Known degraded behavior: continue with the single-device chain.
    } else if req.count() > 2 {
        error!("invalid output devices ({:#x})", req.bits());
        return SoundDevice::None;
    }

    if ctx.in_call() {
        if let Some(device) = voice_output_device(req, ctx) {
            return device;
        }
    }

    if req.contains(OutputDevices::WIRED_HEADSET) {
        if ctx.flags.anc_enabled {
            SoundDevice::OutAncHeadset
        } else {
            SoundDevice::OutHeadphones
        }
    } else if req.contains(OutputDevices::WIRED_HEADPHONE) {
        SoundDevice::OutHeadphones
    } else if req.contains(OutputDevices::SPEAKER) {
        if ctx.flags.speaker_lr_swap {
            SoundDevice::OutSpeakerReverse
        } else {
            SoundDevice::OutSpeaker
        }
    } else if req.contains(OutputDevices::BT_SCO) {
        if ctx.flags.bt_wb_speech {
            SoundDevice::OutBtScoWb
        } else {
            SoundDevice::OutBtSco
        }
    } else if req.contains(OutputDevices::HDMI) {
        SoundDevice::OutHdmi
    } else if req.contains(OutputDevices::EARPIECE) {
        if ctx.hac {
            SoundDevice::OutVoiceHacHandset
        } else {
            SoundDevice::OutHandset
        }
    } else if req.contains(OutputDevices::USB_HEADSET) {
        SoundDevice::OutUsbHeadset
    } else if req.contains(OutputDevices::FM_TX) {
        SoundDevice::OutTransmissionFm
    } else if req.contains(OutputDevices::PROXY) {
        SoundDevice::OutAfeProxy
    } else {
        error!("unknown output device(s) {:#x}", req.bits());
        SoundDevice::None
    }
}

/// Two-device combinations with a dedicated hardware path.
fn combo_device(req: OutputDevices, ctx: &SelectionContext) -> Option<SoundDevice> {
    if req.is_exactly(OutputDevices::SPEAKER | OutputDevices::WIRED_HEADPHONE) {
        Some(SoundDevice::OutSpeakerAndHeadphones)
    } else if req.is_exactly(OutputDevices::SPEAKER | OutputDevices::WIRED_HEADSET) {
        if ctx.flags.anc_enabled {
            Some(SoundDevice::OutSpeakerAndAncHeadset)
        } else {
            Some(SoundDevice::OutSpeakerAndHeadphones)
        }
    } else if req.is_exactly(OutputDevices::SPEAKER | OutputDevices::HDMI) {
        Some(SoundDevice::OutSpeakerAndHdmi)
    } else if req.is_exactly(OutputDevices::SPEAKER | OutputDevices::USB_HEADSET) {
        Some(SoundDevice::OutSpeakerAndUsbHeadset)
    } else {
        None
    }
}

/// Voice-call output priority: TTY paths first, then class dispatch.
fn voice_output_device(req: OutputDevices, ctx: &SelectionContext) -> Option<SoundDevice> {
    let on_headset =
        req.contains(OutputDevices::WIRED_HEADSET) || req.contains(OutputDevices::WIRED_HEADPHONE);

    if on_headset {
        let device = match ctx.tty_mode {
            TtyMode::Full => SoundDevice::OutVoiceTtyFullHeadphones,
            TtyMode::Vco => SoundDevice::OutVoiceTtyVcoHeadphones,
            TtyMode::Hco => SoundDevice::OutVoiceTtyHcoHandset,
            TtyMode::Off => {
                if ctx.flags.anc_enabled && req.contains(OutputDevices::WIRED_HEADSET) {
                    SoundDevice::OutVoiceAncHeadset
                } else {
                    SoundDevice::OutVoiceHeadphones
                }
            }
        };
        return Some(device);
    }

    if req.contains(OutputDevices::BT_SCO) {
        Some(if ctx.flags.bt_wb_speech {
            SoundDevice::OutBtScoWb
        } else {
            SoundDevice::OutBtSco
        })
    } else if req.contains(OutputDevices::SPEAKER) {
        Some(SoundDevice::OutVoiceSpeaker)
    } else if req.contains(OutputDevices::EARPIECE) {
        Some(if ctx.hac {
            SoundDevice::OutVoiceHacHandset
        } else {
            SoundDevice::OutVoiceHandset
        })
    } else {
        None
    }
}

/// Resolve the input sound device.
///
/// Returns [`SoundDevice::None`] when no input is active. Branches on the
/// capture source first, each with its own fluence/AEC/NS rules, then falls
/// back to device-class dispatch.
pub fn select_input_device(
    out: OutputDevices,
    active: Option<&ActiveInput>,
    ctx: &SelectionContext,
    echo: &dyn EchoReference,
) -> SoundDevice {
    let input = active.copied().unwrap_or_default();
    let source = input.source;

    trace!(
        "select input: out {:#x} in {:#x} source {:?} channels {}",
        out.bits(),
        input.devices.bits(),
        source,
        input.channels
    );

    if !out.is_empty() && ctx.in_call() {
        if let Some(device) = voice_input_device(out, ctx, echo) {
            return device;
        }
    } else {
        let selected = match source {
            CaptureSource::Camcorder => camcorder_input_device(&input, ctx),
            CaptureSource::VoiceRecognition => {
                voice_recognition_input_device(&input, ctx, echo)
            }
            CaptureSource::VoiceCommunication => {
                communication_input_device(out, &input, ctx, echo)
            }
            CaptureSource::FmTuner => Some(SoundDevice::InCaptureFm),
            CaptureSource::Default => return SoundDevice::None,
            CaptureSource::Mic => None,
        };
        if let Some(device) = selected {
            return device;
        }
        // In-communication mode applies the communication rules regardless
        // of the tagged source.
        if ctx.mode == AudioMode::InCommunication {
            if let Some(device) = communication_input_device(out, &input, ctx, echo) {
                return device;
            }
        }
    }

    default_input_device(out, &input, ctx, echo)
}

fn voice_input_device(
    out: OutputDevices,
    ctx: &SelectionContext,
    echo: &dyn EchoReference,
) -> Option<SoundDevice> {
    let fluence = &ctx.flags.fluence;
    let on_headset =
        out.contains(OutputDevices::WIRED_HEADSET) || out.contains(OutputDevices::WIRED_HEADPHONE);

    if ctx.tty_mode != TtyMode::Off && on_headset {
        return Some(match ctx.tty_mode {
            TtyMode::Full => SoundDevice::InVoiceTtyFullHeadsetMic,
            TtyMode::Vco => SoundDevice::InVoiceTtyVcoHandsetMic,
            TtyMode::Hco => SoundDevice::InVoiceTtyHcoHeadsetMic,
            TtyMode::Off => unreachable!(),
        });
    }

    if out.contains(OutputDevices::EARPIECE) {
        Some(if fluence.in_voice_call && fluence.dual_mic {
            SoundDevice::InVoiceDmic
        } else {
            SoundDevice::InHandsetMic
        })
    } else if out.contains(OutputDevices::WIRED_HEADSET) {
        Some(SoundDevice::InVoiceHeadsetMic)
    } else if out.contains(OutputDevices::BT_SCO) {
        Some(bt_sco_mic(ctx.flags))
    } else if out.contains(OutputDevices::SPEAKER)
        || out.contains(OutputDevices::WIRED_HEADPHONE)
    {
        if fluence.in_voice_call && fluence.in_speaker_mode && fluence.dual_mic {
            Some(SoundDevice::InVoiceSpeakerDmic)
        } else {
            // Hands-free path: the downlink is fed back as echo reference.
            echo.set_echo_reference(true);
            Some(SoundDevice::InVoiceSpeakerMic)
        }
    } else {
        None
    }
}

fn camcorder_input_device(input: &ActiveInput, ctx: &SelectionContext) -> Option<SoundDevice> {
    if input
        .devices
        .contains(InputDevices::BUILTIN_MIC | InputDevices::BACK_MIC)
    {
        if ctx.flags.fluence.dual_mic && input.channels == 2 {
            Some(SoundDevice::InHandsetDmicStereo)
        } else {
            Some(SoundDevice::InCamcorderMic)
        }
    } else {
        None
    }
}

fn voice_recognition_input_device(
    input: &ActiveInput,
    ctx: &SelectionContext,
    echo: &dyn EchoReference,
) -> Option<SoundDevice> {
    let fluence = &ctx.flags.fluence;

    if input.devices.contains(InputDevices::BUILTIN_MIC) {
        if fluence.in_voice_rec && fluence.dual_mic && input.channels == 1 {
            return Some(if input.aec {
                echo.set_echo_reference(true);
                SoundDevice::InHandsetDmicAec
            } else {
                SoundDevice::InVoiceRecDmicFluence
            });
        }
        if fluence.dual_mic && input.channels == 2 {
            return Some(SoundDevice::InVoiceRecDmicStereo);
        }
        Some(if input.ns {
            SoundDevice::InVoiceRecMicNs
        } else if input.aec {
            echo.set_echo_reference(true);
            SoundDevice::InVoiceRecMicAec
        } else {
            SoundDevice::InVoiceRecMic
        })
    } else if input.devices.contains(InputDevices::HEADSET_MIC) {
        Some(SoundDevice::InHeadsetMic)
    } else {
        None
    }
}

fn communication_input_device(
    out: OutputDevices,
    input: &ActiveInput,
    ctx: &SelectionContext,
    echo: &dyn EchoReference,
) -> Option<SoundDevice> {
    let fluence = &ctx.flags.fluence;
    // Speakerphone communication captures through the back mic.
    let devices = if out.contains(OutputDevices::SPEAKER) {
        InputDevices::BACK_MIC
    } else {
        input.devices
    };
    let fluence_spkr = fluence.in_voice_comm && fluence.in_speaker_mode && fluence.dual_mic;
    let fluence_handset = fluence.in_voice_comm && fluence.dual_mic;

    let device = if input.aec && input.ns {
        if devices.contains(InputDevices::BACK_MIC) {
            Some(if fluence_spkr {
                SoundDevice::InSpeakerDmicAecNs
            } else {
                SoundDevice::InSpeakerMicAecNs
            })
        } else if devices.contains(InputDevices::BUILTIN_MIC) {
            Some(if fluence_handset {
                SoundDevice::InHandsetDmicAecNs
            } else {
                SoundDevice::InHandsetMicAecNs
            })
        } else if devices.contains(InputDevices::HEADSET_MIC) {
            Some(SoundDevice::InHeadsetMicAec)
        } else {
            None
        }
    } else if input.aec {
        if devices.contains(InputDevices::BACK_MIC) {
            Some(if fluence_spkr {
                SoundDevice::InSpeakerDmicAec
            } else {
                SoundDevice::InSpeakerMicAec
            })
        } else if devices.contains(InputDevices::BUILTIN_MIC) {
            Some(if fluence_handset {
                SoundDevice::InHandsetDmicAec
            } else {
                SoundDevice::InHandsetMicAec
            })
        } else if devices.contains(InputDevices::HEADSET_MIC) {
            Some(SoundDevice::InHeadsetMicAec)
        } else {
            None
        }
    } else if input.ns {
        if devices.contains(InputDevices::BACK_MIC) {
            Some(if fluence_spkr {
                SoundDevice::InSpeakerDmicNs
            } else {
                SoundDevice::InSpeakerMicNs
            })
        } else if devices.contains(InputDevices::BUILTIN_MIC) {
            Some(if fluence_handset {
                SoundDevice::InHandsetDmicNs
            } else {
                SoundDevice::InHandsetMicNs
            })
        } else {
            None
        }
    } else {
        None
    };

    if device.is_some() && input.aec {
        echo.set_echo_reference(true);
    }
    device
}

fn default_input_device(
    out: OutputDevices,
    input: &ActiveInput,
    ctx: &SelectionContext,
    echo: &dyn EchoReference,
) -> SoundDevice {
    let devices = input.devices;

    if !devices.is_empty() {
        if devices.contains(InputDevices::BUILTIN_MIC) {
            // Concurrent record+playback prefers an echo-cancelling path so
            // the capture does not pick up the live downlink.
            if ctx.flags.rec_play_concurrency && !out.is_empty() {
                echo.set_echo_reference(true);
                return SoundDevice::InHandsetMicAec;
            }
            if ctx.flags.fluence.dual_mic && input.channels == 2 {
                SoundDevice::InHandsetDmicStereo
            } else {
                SoundDevice::InHandsetMic
            }
        } else if devices.contains(InputDevices::BACK_MIC) {
            SoundDevice::InSpeakerMic
        } else if devices.contains(InputDevices::HEADSET_MIC) {
            SoundDevice::InHeadsetMic
        } else if devices.contains(InputDevices::BT_SCO_MIC) {
            bt_sco_mic(ctx.flags)
        } else if devices.contains(InputDevices::FM_TUNER) {
            SoundDevice::InCaptureFm
        } else if devices.contains(InputDevices::USB_MIC) {
            SoundDevice::InUsbHeadsetMic
        } else {
            error!("unknown input device(s) {:#x}", devices.bits());
            SoundDevice::None
        }
    } else if !out.is_empty() {
        // Derive from the output side when the input side gave no hint.
        if out.contains(OutputDevices::EARPIECE) || out.contains(OutputDevices::PROXY) {
            SoundDevice::InHandsetMic
        } else if out.contains(OutputDevices::SPEAKER) {
            SoundDevice::InSpeakerMic
        } else if out.contains(OutputDevices::WIRED_HEADSET) {
            SoundDevice::InHeadsetMic
        } else if out.contains(OutputDevices::BT_SCO) {
            bt_sco_mic(ctx.flags)
        } else {
            SoundDevice::InHandsetMic
        }
    } else {
        SoundDevice::None
    }
}

fn bt_sco_mic(flags: &FeatureFlags) -> SoundDevice {
    match (flags.bt_wb_speech, flags.bt_nrec) {
        (true, true) => SoundDevice::InBtScoMicWbNrec,
        (true, false) => SoundDevice::InBtScoMicWb,
        (false, true) => SoundDevice::InBtScoMicNrec,
        (false, false) => SoundDevice::InBtScoMic,
    }
}
