//! Domain entities and routing rules

pub mod calibration;
pub mod config;
pub mod device;
pub mod hal;
pub mod pcm;
pub mod routing;
pub mod selector;
pub mod sync;
pub mod usecase;

#[cfg(test)]
pub(crate) mod testutil;

// Re-export specific items to avoid ambiguous glob imports
pub use calibration::{CalibrationState, SpeakerProtection};
pub use config::{
    CalibrationConfig, ConfigError, DeviceOverrideConfig, FeatureFlags, FluenceConfig,
    PlatformConfig, TtyMode,
};
pub use device::{DeviceClass, DeviceError, DeviceSpec, ResolvedSpec, SoundDevice, SoundDeviceTable};
pub use hal::{
    CalType, CalibStatus, CalibrationLoader, CalibrationPersistence, Direction, EchoReference,
    HalError, MixerPathControl, PcmConfig, PcmDriver, PcmHandle, SpeakerCalibration, TempCallback,
    ThermalClient,
};
pub use pcm::{PcmDeviceId, PcmDeviceResolver};
pub use routing::{AudioContext, RouteError, RouteRequest, RoutedDevices};
pub use selector::{
    ActiveInput, AudioMode, CaptureSource, InputDevices, OutputDevices, SelectionContext,
    select_input_device, select_output_device,
};
pub use sync::{CancellableOperation, OrderedMutex, WaitOutcome, lock_rank};
pub use usecase::{
    RouteState, StreamId, Usecase, UsecaseKind, UsecaseRegistry, UsecaseType,
};
