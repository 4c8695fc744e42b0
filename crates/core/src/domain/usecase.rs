//! Active usecases and the usecase registry
//!
//! A usecase is one concurrently active audio activity (a playback stream, a
//! capture stream, a voice call, a calibration run) together with the sound
//! devices currently serving it. The registry is the single source of truth
//! for "is any hardware in use".

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::device::SoundDevice;

/// Errors raised by registry mutations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// A usecase of this kind is already registered
    #[error("Usecase {0:?} is already active")]
    KindActive(UsecaseKind),

    /// The stream already owns another active usecase
    #[error("Stream {0:?} already has an active usecase")]
    StreamBusy(StreamId),
}

/// Identifier of the stream object owning a usecase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamId(u64);

impl StreamId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Distinct audio activities; at most one usecase per kind may be active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UsecaseKind {
    PrimaryPlayback,
    DeepBufferPlayback,
    LowLatencyPlayback,
    MultiChannelPlayback,
    FmPlayback,
    Capture,
    LowLatencyCapture,
    HotwordCapture,
    VoiceCall,
    SpeakerCalibRx,
    SpeakerCalibTx,
}

impl UsecaseKind {
    pub fn usecase_type(self) -> UsecaseType {
        use UsecaseKind::*;
        match self {
            PrimaryPlayback | DeepBufferPlayback | LowLatencyPlayback
            | MultiChannelPlayback | FmPlayback => UsecaseType::Playback,
            Capture | LowLatencyCapture | HotwordCapture => UsecaseType::Capture,
            VoiceCall => UsecaseType::Voice,
            SpeakerCalibRx | SpeakerCalibTx => UsecaseType::Calibration,
        }
    }
}

/// Broad type of a usecase; determines direction handling and which
/// calibration app type is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UsecaseType {
    Playback,
    Capture,
    Voice,
    Calibration,
}

impl UsecaseType {
    /// Calibration app type sent along with per-device calibration data.
    pub fn app_type(self) -> u32 {
        match self {
            UsecaseType::Playback | UsecaseType::Voice | UsecaseType::Calibration => 0x11130,
            UsecaseType::Capture => 0x11132,
        }
    }

    pub fn has_output(self) -> bool {
        matches!(self, UsecaseType::Playback | UsecaseType::Voice)
    }

    pub fn has_input(self) -> bool {
        matches!(self, UsecaseType::Capture | UsecaseType::Voice)
    }
}

/// Routing lifecycle of a usecase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteState {
    Unrouted,
    Routing,
    Routed,
    Unrouting,
}

/// One active audio activity and the devices serving it.
///
/// Owned by the registry; `stream` refers back to the owning stream object.
/// Devices are `SoundDevice::None` only transiently during a switch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usecase {
    pub kind: UsecaseKind,
    pub stream: StreamId,
    pub out_device: SoundDevice,
    pub in_device: SoundDevice,
    pub state: RouteState,
}

impl Usecase {
    pub fn new(kind: UsecaseKind, stream: StreamId) -> Self {
        Self {
            kind,
            stream,
            out_device: SoundDevice::None,
            in_device: SoundDevice::None,
            state: RouteState::Unrouted,
        }
    }

    pub fn usecase_type(&self) -> UsecaseType {
        self.kind.usecase_type()
    }

    /// The non-sentinel devices currently assigned, output first.
    pub fn devices(&self) -> impl Iterator<Item = SoundDevice> {
        [self.out_device, self.in_device]
            .into_iter()
            .filter(|&d| d != SoundDevice::None)
    }
}

/// Insertion-ordered collection of active usecases, guarded by the device
/// lock of the owning context.
#[derive(Debug, Default, Clone)]
pub struct UsecaseRegistry {
    entries: Vec<Usecase>,
}

impl UsecaseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new usecase. One per kind, one per stream.
    pub fn register(&mut self, usecase: Usecase) -> Result<(), RegistryError> {
        if self.get(usecase.kind).is_some() {
            return Err(RegistryError::KindActive(usecase.kind));
        }
        if self.entries.iter().any(|u| u.stream == usecase.stream) {
            return Err(RegistryError::StreamBusy(usecase.stream));
        }
        debug!("registering usecase {:?}", usecase.kind);
        self.entries.push(usecase);
        Ok(())
    }

    pub fn remove(&mut self, kind: UsecaseKind) -> Option<Usecase> {
        let idx = self.entries.iter().position(|u| u.kind == kind)?;
        debug!("removing usecase {:?}", kind);
        Some(self.entries.remove(idx))
    }

    pub fn get(&self, kind: UsecaseKind) -> Option<&Usecase> {
        self.entries.iter().find(|u| u.kind == kind)
    }

    pub fn get_mut(&mut self, kind: UsecaseKind) -> Option<&mut Usecase> {
        self.entries.iter_mut().find(|u| u.kind == kind)
    }

    pub fn by_stream(&self, stream: StreamId) -> Option<&Usecase> {
        self.entries.iter().find(|u| u.stream == stream)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Usecase> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// The hardware-in-use check used by the calibration preconditions.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn any_of_type(&self, utype: UsecaseType) -> bool {
        self.entries.iter().any(|u| u.usecase_type() == utype)
    }
}
