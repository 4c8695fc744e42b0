//! Usecase routing and hardware path activation
//!
//! [`AudioContext`] owns the usecase registry, the per-device reference
//! counts and the collaborator handles, and drives every transition between
//! a stream's requested devices and the physical mixer paths. A shared
//! device's path is enabled on the 0→1 reference transition and disabled on
//! 1→0; enable precedes path activation, path removal precedes disable, and
//! calibration data is re-applied on every routing transition.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::config::{ConfigError, PlatformConfig, FeatureFlags, TtyMode};
use super::device::{SoundDevice, SoundDeviceTable};
use super::hal::{
    CalType, CalibrationLoader, Direction, EchoReference, HalError, MixerPathControl,
    PcmConfig, PcmDriver, PcmHandle,
};
use super::pcm::PcmDeviceResolver;
use super::selector::{self, ActiveInput, AudioMode, InputDevices, OutputDevices, SelectionContext};
use super::sync::{lock_rank, CancellableOperation, OrderedMutex};
use super::usecase::{
    RegistryError, RouteState, StreamId, Usecase, UsecaseKind, UsecaseRegistry, UsecaseType,
};

pub type Result<T> = std::result::Result<T, RouteError>;

/// Errors surfaced by routing operations
#[derive(Debug, Error)]
pub enum RouteError {
    /// Selection produced no usable sound device
    #[error("No routable sound device for the requested devices")]
    NoDevice,

    /// No PCM node is mapped for this usecase on this platform
    #[error("Usecase {0:?} has no PCM mapping")]
    Unroutable(UsecaseKind),

    /// The usecase is not currently registered
    #[error("Usecase {0:?} is not active")]
    NotActive(UsecaseKind),

    /// Hardware is busy; the caller should retry later
    #[error("Hardware busy")]
    Busy,

    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// PCM or mixer I/O failure; any partial state has been rolled back
    #[error(transparent)]
    Hardware(#[from] HalError),
}

/// Devices resolved for a routed usecase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutedDevices {
    pub output: SoundDevice,
    pub input: SoundDevice,
}

/// A routing request from the stream layer.
#[derive(Debug, Clone, Copy)]
pub struct RouteRequest {
    pub outputs: OutputDevices,
    pub inputs: InputDevices,
    pub sample_rate: u32,
}

impl RouteRequest {
    pub fn playback(outputs: OutputDevices) -> Self {
        Self {
            outputs,
            inputs: InputDevices::NONE,
            sample_rate: 48000,
        }
    }

    pub fn capture(inputs: InputDevices) -> Self {
        Self {
            outputs: OutputDevices::NONE,
            inputs,
            sample_rate: 48000,
        }
    }

    pub fn voice(outputs: OutputDevices, inputs: InputDevices) -> Self {
        Self {
            outputs,
            inputs,
            sample_rate: 48000,
        }
    }

    pub fn with_sample_rate(mut self, rate: u32) -> Self {
        self.sample_rate = rate;
        self
    }
}

/// Input-stream state, guarded by the inputs lock (acquired before the
/// device lock).
#[derive(Debug, Default)]
struct InputState {
    active: Option<ActiveInput>,
}

/// Routing state, guarded by the device lock (always acquired last).
struct DeviceState {
    registry: UsecaseRegistry,
    refcounts: HashMap<SoundDevice, u32>,
    mode: AudioMode,
    tty_mode: TtyMode,
    hac: bool,
    /// When the speaker path last went idle; `None` while it is driven
    speaker_idle_since: Option<Instant>,
    pcm_handles: HashMap<UsecaseKind, Vec<Box<dyn PcmHandle>>>,
}

impl DeviceState {
    fn new() -> Self {
        Self {
            registry: UsecaseRegistry::new(),
            refcounts: HashMap::new(),
            mode: AudioMode::Normal,
            tty_mode: TtyMode::Off,
            hac: false,
            speaker_idle_since: Some(Instant::now()),
            pcm_handles: HashMap::new(),
        }
    }
}

/// PCM handles opened for one calibration attempt; owned by the calibration
/// thread, closed before its usecases are deregistered.
pub(crate) struct CalibPcms {
    pub rx: Box<dyn PcmHandle>,
    pub tx: Box<dyn PcmHandle>,
}

const CALIB_RX_STREAM: StreamId = StreamId::new(u64::MAX - 1);
const CALIB_TX_STREAM: StreamId = StreamId::new(u64::MAX);

/// The process-level audio routing context.
///
/// Created at device-open, shared behind an [`Arc`] with the stream layer
/// and the calibration thread, destroyed at device-close.
pub struct AudioContext {
    table: SoundDeviceTable,
    resolver: PcmDeviceResolver,
    flags: FeatureFlags,
    inputs: OrderedMutex<InputState>,
    device: OrderedMutex<DeviceState>,
    mixer: Arc<dyn MixerPathControl>,
    echo: Arc<dyn EchoReference>,
    cal: Arc<dyn CalibrationLoader>,
    pcm: Arc<dyn PcmDriver>,
    calib_op: Arc<CancellableOperation>,
}

impl AudioContext {
    pub fn new(
        config: &PlatformConfig,
        mixer: Arc<dyn MixerPathControl>,
        echo: Arc<dyn EchoReference>,
        cal: Arc<dyn CalibrationLoader>,
        pcm: Arc<dyn PcmDriver>,
    ) -> std::result::Result<Arc<Self>, ConfigError> {
        let table = config.build_device_table()?;
        info!(
            "audio context up ({} codec)",
            if config.external_codec { "external" } else { "internal" }
        );
        Ok(Arc::new(Self {
            table,
            resolver: PcmDeviceResolver::new(config.external_codec),
            flags: config.features.clone(),
            inputs: OrderedMutex::new(lock_rank::INPUTS, "inputs", InputState::default()),
            device: OrderedMutex::new(lock_rank::DEVICE, "device", DeviceState::new()),
            mixer,
            echo,
            cal,
            pcm,
            calib_op: Arc::new(CancellableOperation::new()),
        }))
    }

    pub fn table(&self) -> &SoundDeviceTable {
        &self.table
    }

    pub fn resolver(&self) -> &PcmDeviceResolver {
        &self.resolver
    }

    pub fn flags(&self) -> &FeatureFlags {
        &self.flags
    }

    pub(crate) fn calibration_gate(&self) -> &Arc<CancellableOperation> {
        &self.calib_op
    }

    pub(crate) fn calibration_loader(&self) -> &Arc<dyn CalibrationLoader> {
        &self.cal
    }

    /// Take the device lock with no calibration attempt in flight. The
    /// cancel handshake runs before the lock is acquired (never across it);
    /// the loop closes the window where an attempt starts between the
    /// acknowledge and our acquisition.
    fn lock_device_cancelling_calibration(&self) -> super::sync::OrderedGuard<'_, DeviceState> {
        loop {
            self.calib_op.request_cancel();
            let dev = self.device.lock();
            let calib_active = dev.registry.get(UsecaseKind::SpeakerCalibRx).is_some()
                || dev.registry.get(UsecaseKind::SpeakerCalibTx).is_some();
            if !calib_active {
                return dev;
            }
            drop(dev);
        }
    }

    /// Change the operating mode (normal, ringtone, in-call, communication).
    pub fn set_mode(&self, mode: AudioMode) {
        self.device.lock().mode = mode;
    }

    pub fn set_tty_mode(&self, tty: TtyMode) {
        self.device.lock().tty_mode = tty;
    }

    pub fn set_hac(&self, hac: bool) {
        self.device.lock().hac = hac;
    }

    /// Publish the active input descriptor consumed by input selection.
    pub fn set_active_input(&self, input: Option<ActiveInput>) {
        self.inputs.lock().active = input;
    }

    /// Begin routing a usecase for a stream, resolving and enabling its
    /// sound devices and opening its PCM nodes.
    pub fn begin_routing(
        &self,
        kind: UsecaseKind,
        stream: StreamId,
        req: RouteRequest,
    ) -> Result<RoutedDevices> {
        // Calibration usecases are managed internally by the calibration
        // thread, never by the stream layer.
        if kind.usecase_type() == UsecaseType::Calibration {
            return Err(RouteError::Unroutable(kind));
        }

        let active = { self.inputs.lock().active };
        // A live calibration attempt must release the hardware first; the
        // handshake returns only after its teardown is complete.
        let mut dev = self.lock_device_cancelling_calibration();

        let devices = self.resolve_devices(&dev, kind, &req, active.as_ref())?;

        let mut usecase = Usecase::new(kind, stream);
        usecase.state = RouteState::Routing;
        usecase.out_device = devices.output;
        usecase.in_device = devices.input;
        dev.registry.register(usecase)?;

        self.ref_up(&mut dev, devices.output);
        self.ref_up(&mut dev, devices.input);
        self.apply_usecase_calibration(kind, devices, req.sample_rate);

        match self.open_pcms(kind, req.sample_rate) {
            Ok(handles) => {
                dev.pcm_handles.insert(kind, handles);
            }
            Err(err) => {
                error!("pcm open failed for {:?}: {}", kind, err);
                self.ref_down(&mut dev, devices.input);
                self.ref_down(&mut dev, devices.output);
                dev.registry.remove(kind);
                return Err(err);
            }
        }

        if let Some(uc) = dev.registry.get_mut(kind) {
            uc.state = RouteState::Routed;
        }
        info!(
            "routed {:?}: out {:?} in {:?}",
            kind, devices.output, devices.input
        );
        Ok(devices)
    }

    /// Re-route an already-open usecase to new devices without closing its
    /// stream. New paths are applied before old ones are removed whenever
    /// the devices do not share a backend, so switches stay gapless.
    pub fn change_devices(&self, kind: UsecaseKind, req: RouteRequest) -> Result<RoutedDevices> {
        if kind.usecase_type() == UsecaseType::Calibration {
            return Err(RouteError::Unroutable(kind));
        }

        let active = { self.inputs.lock().active };
        let mut dev = self.lock_device_cancelling_calibration();

        let old = {
            let uc = dev.registry.get(kind).ok_or(RouteError::NotActive(kind))?;
            RoutedDevices {
                output: uc.out_device,
                input: uc.in_device,
            }
        };
        let new = self.resolve_devices(&dev, kind, &req, active.as_ref())?;

        if let Some(uc) = dev.registry.get_mut(kind) {
            uc.state = RouteState::Routing;
        }

        self.switch_device(&mut dev, old.output, new.output);
        self.switch_device(&mut dev, old.input, new.input);

        if let Some(uc) = dev.registry.get_mut(kind) {
            uc.out_device = new.output;
            uc.in_device = new.input;
            uc.state = RouteState::Routed;
        }

        // Re-applied even when the devices are unchanged: the app type or
        // sample rate may have moved underneath the route.
        self.apply_usecase_calibration(kind, new, req.sample_rate);

        debug!("switched {:?}: {:?} -> {:?}", kind, old, new);
        Ok(new)
    }

    /// Stop routing a usecase. Calling this on an already-unrouted kind is
    /// a no-op: standby and close may both land here.
    pub fn end_routing(&self, kind: UsecaseKind) -> Result<()> {
        let mut dev = self.device.lock();

        let Some(usecase) = dev.registry.get(kind).cloned() else {
            debug!("end_routing: {:?} already unrouted", kind);
            return Ok(());
        };

        if let Some(uc) = dev.registry.get_mut(kind) {
            uc.state = RouteState::Unrouting;
        }

        if let Some(handles) = dev.pcm_handles.remove(&kind) {
            for mut handle in handles {
                if let Err(err) = handle.stop() {
                    warn!("pcm stop failed for {:?}: {}", kind, err);
                }
            }
        }

        self.ref_down(&mut dev, usecase.in_device);
        self.ref_down(&mut dev, usecase.out_device);
        dev.registry.remove(kind);
        info!("unrouted {:?}", kind);
        Ok(())
    }

    /// Snapshot of the active usecases, for diagnostics.
    pub fn active_usecases(&self) -> Vec<Usecase> {
        self.device.lock().registry.iter().cloned().collect()
    }

    /// Snapshot of the device reference counts, for diagnostics.
    pub fn device_refcounts(&self) -> Vec<(SoundDevice, u32)> {
        let dev = self.device.lock();
        let mut counts: Vec<_> = dev.refcounts.iter().map(|(&d, &c)| (d, c)).collect();
        counts.sort_by_key(|&(d, _)| format!("{d:?}"));
        counts
    }

    pub fn is_device_enabled(&self, device: SoundDevice) -> bool {
        self.device
            .lock()
            .refcounts
            .get(&device)
            .copied()
            .unwrap_or(0)
            > 0
    }

    // ---- calibration-thread entry points ------------------------------

    /// Atomically check the calibration preconditions and, when met, bring
    /// up the RX/TX calibration usecases with their PCM nodes. One device
    /// lock acquisition end to end; the lock is not held on return.
    pub(crate) fn try_start_calibration(
        &self,
        min_idle: Duration,
        sample_rate: u32,
    ) -> Result<CalibPcms> {
        let mut dev = self.device.lock();

        if !dev.registry.is_empty() {
            return Err(RouteError::Busy);
        }
        let idle_long_enough = dev
            .speaker_idle_since
            .map(|since| since.elapsed() >= min_idle)
            .unwrap_or(false);
        if !idle_long_enough {
            return Err(RouteError::Busy);
        }

        let mut rx = Usecase::new(UsecaseKind::SpeakerCalibRx, CALIB_RX_STREAM);
        rx.state = RouteState::Routing;
        rx.out_device = SoundDevice::OutSpeakerProtected;
        let mut tx = Usecase::new(UsecaseKind::SpeakerCalibTx, CALIB_TX_STREAM);
        tx.state = RouteState::Routing;
        tx.in_device = SoundDevice::InCaptureViFeedback;
        dev.registry.register(rx)?;
        dev.registry.register(tx)?;

        self.ref_up(&mut dev, SoundDevice::OutSpeakerProtected);
        self.ref_up(&mut dev, SoundDevice::InCaptureViFeedback);
        self.apply_usecase_calibration(
            UsecaseKind::SpeakerCalibRx,
            RoutedDevices {
                output: SoundDevice::OutSpeakerProtected,
                input: SoundDevice::InCaptureViFeedback,
            },
            sample_rate,
        );

        let opened = self
            .open_pcms(UsecaseKind::SpeakerCalibRx, sample_rate)
            .and_then(|mut rx_handles| {
                let rx = rx_handles.pop().ok_or(RouteError::Unroutable(
                    UsecaseKind::SpeakerCalibRx,
                ))?;
                let mut tx_handles = self.open_pcms(UsecaseKind::SpeakerCalibTx, sample_rate)?;
                let tx = tx_handles
                    .pop()
                    .ok_or(RouteError::Unroutable(UsecaseKind::SpeakerCalibTx))?;
                Ok(CalibPcms { rx, tx })
            });

        match opened {
            Ok(pcms) => {
                for kind in [UsecaseKind::SpeakerCalibRx, UsecaseKind::SpeakerCalibTx] {
                    if let Some(uc) = dev.registry.get_mut(kind) {
                        uc.state = RouteState::Routed;
                    }
                }
                info!("calibration usecases up");
                Ok(pcms)
            }
            Err(err) => {
                warn!("calibration pcm open failed: {}", err);
                self.teardown_calibration_locked(&mut dev);
                Err(err)
            }
        }
    }

    /// Remove the calibration usecases and disable their devices. The
    /// calibration thread closes its PCM handles before calling this.
    pub(crate) fn end_calibration_usecases(&self) {
        let mut dev = self.device.lock();
        self.teardown_calibration_locked(&mut dev);
    }

    fn teardown_calibration_locked(&self, dev: &mut DeviceState) {
        for kind in [UsecaseKind::SpeakerCalibTx, UsecaseKind::SpeakerCalibRx] {
            if let Some(uc) = dev.registry.remove(kind) {
                self.ref_down(dev, uc.in_device);
                self.ref_down(dev, uc.out_device);
            }
        }
    }

    // ---- internals ----------------------------------------------------

    fn resolve_devices(
        &self,
        dev: &DeviceState,
        kind: UsecaseKind,
        req: &RouteRequest,
        active: Option<&ActiveInput>,
    ) -> Result<RoutedDevices> {
        let ctx = SelectionContext {
            mode: dev.mode,
            tty_mode: dev.tty_mode,
            hac: dev.hac,
            flags: &self.flags,
        };
        let utype = kind.usecase_type();

        let output = if utype.has_output() {
            let device = selector::select_output_device(req.outputs, &ctx);
            if device == SoundDevice::None {
                return Err(RouteError::NoDevice);
            }
            device
        } else {
            SoundDevice::None
        };

        let input = if utype.has_input() {
            // A capture request with no published input descriptor still
            // names its endpoints; treat it as a plain mic capture.
            let fallback = (active.is_none() && !req.inputs.is_empty()).then(|| ActiveInput {
                source: selector::CaptureSource::Mic,
                devices: req.inputs,
                ..Default::default()
            });
            let active = active.or(fallback.as_ref());
            let device =
                selector::select_input_device(req.outputs, active, &ctx, self.echo.as_ref());
            if device == SoundDevice::None {
                return Err(RouteError::NoDevice);
            }
            device
        } else {
            SoundDevice::None
        };

        Ok(RoutedDevices { output, input })
    }

    /// Take a reference on a device, physically enabling it on 0→1.
    /// Mixer failures are logged but do not abort routing.
    fn ref_up(&self, dev: &mut DeviceState, device: SoundDevice) {
        if device == SoundDevice::None {
            return;
        }
        let count = dev.refcounts.entry(device).or_insert(0);
        *count += 1;
        if *count == 1 {
            debug!("enabling {:?}", device);
            if let Err(err) = self.mixer.enable_device(device) {
                warn!("enable_device {:?} failed: {}", device, err);
            }
            if let Some(route) = self.table.route_name(device) {
                if let Err(err) = self.mixer.apply_route(&route) {
                    warn!("apply_route '{}' failed: {}", route, err);
                }
            }
            if device.uses_anc() && self.cal.get_calibration(CalType::Anc).is_none() {
                warn!("no anc calibration blob for {:?}", device);
            }
            if device.uses_speaker() {
                dev.speaker_idle_since = None;
            }
        }
    }

    /// Drop a reference on a device, physically disabling it on 1→0 in
    /// remove-route-then-disable order.
    fn ref_down(&self, dev: &mut DeviceState, device: SoundDevice) {
        if device == SoundDevice::None {
            return;
        }
        let Some(count) = dev.refcounts.get_mut(&device) else {
            warn!("ref_down on untracked device {:?}", device);
            return;
        };
        *count -= 1;
        if *count == 0 {
            dev.refcounts.remove(&device);
            debug!("disabling {:?}", device);
            if let Some(route) = self.table.route_name(device) {
                if let Err(err) = self.mixer.remove_route(&route) {
                    warn!("remove_route '{}' failed: {}", route, err);
                }
            }
            if let Err(err) = self.mixer.disable_device(device) {
                warn!("disable_device {:?} failed: {}", device, err);
            }
            if device.uses_speaker() {
                dev.speaker_idle_since = Some(Instant::now());
            }
        }
    }

    /// Move one direction of a usecase between devices. Non-conflicting
    /// devices overlap (apply new before removing old) to avoid an audible
    /// gap; same-backend devices must swap in remove-then-apply order.
    fn switch_device(&self, dev: &mut DeviceState, old: SoundDevice, new: SoundDevice) {
        if old == new {
            return;
        }
        match (old, new) {
            (SoundDevice::None, _) => self.ref_up(dev, new),
            (_, SoundDevice::None) => self.ref_down(dev, old),
            _ => {
                if self.table.shares_backend(old, new) {
                    self.ref_down(dev, old);
                    self.ref_up(dev, new);
                } else {
                    self.ref_up(dev, new);
                    self.ref_down(dev, old);
                }
            }
        }
    }

    /// Push stored calibration for every device serving the usecase.
    fn apply_usecase_calibration(&self, kind: UsecaseKind, devices: RoutedDevices, rate: u32) {
        let app_type = kind.usecase_type().app_type();
        for device in [devices.output, devices.input] {
            if let Some(acdb_id) = self.table.acdb_id(device) {
                self.cal.send_calibration(acdb_id, app_type, rate);
            }
        }
    }

    fn directions_for(kind: UsecaseKind) -> &'static [Direction] {
        match kind.usecase_type() {
            UsecaseType::Playback => &[Direction::Playback],
            UsecaseType::Capture => &[Direction::Capture],
            UsecaseType::Voice => &[Direction::Playback, Direction::Capture],
            UsecaseType::Calibration => match kind {
                UsecaseKind::SpeakerCalibRx => &[Direction::Playback],
                _ => &[Direction::Capture],
            },
        }
    }

    /// Open and start the PCM nodes for a usecase. Handles close on drop,
    /// so a partial failure leaves nothing open.
    fn open_pcms(&self, kind: UsecaseKind, rate: u32) -> Result<Vec<Box<dyn PcmHandle>>> {
        let config = PcmConfig {
            rate,
            ..PcmConfig::default()
        };
        let mut handles = Vec::new();
        for &direction in Self::directions_for(kind) {
            let device = self
                .resolver
                .resolve(kind, direction)
                .ok_or(RouteError::Unroutable(kind))?;
            let mut handle = self.pcm.open(device, direction, &config)?;
            handle.start()?;
            handles.push(handle);
        }
        Ok(handles)
    }
}
