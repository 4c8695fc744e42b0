//! Integration tests for the routing engine and calibration subsystem
//!
//! These drive the full stack: the core context wired to the infra stub
//! backends, including mixer-operation ordering, rollback, and the
//! calibration thread's cancel/acknowledge handshake.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use proptest::prelude::*;

use soundpath_core::domain::calibration::{CalibrationState, SpeakerProtection};
use soundpath_core::domain::config::{CalibrationConfig, PlatformConfig};
use soundpath_core::domain::device::SoundDevice;
use soundpath_core::domain::hal::{
    CalibStatus, CalibrationLoader, CalibrationPersistence, EchoReference, MixerPathControl,
    PcmDriver, SpeakerCalibration, ThermalClient,
};
use soundpath_core::domain::routing::{AudioContext, RouteError, RouteRequest};
use soundpath_core::domain::selector::{ActiveInput, CaptureSource, InputDevices, OutputDevices};
use soundpath_core::domain::usecase::{StreamId, UsecaseKind};
use soundpath_infra::hal::stub::{MixerOp, ScriptedCalibrationLoader, StubMixer, StubPcmDriver};
use soundpath_infra::hal::thermal::SimThermal;
use soundpath_infra::FileCalibrationStore;

struct Stack {
    ctx: Arc<AudioContext>,
    mixer: Arc<StubMixer>,
    loader: Arc<ScriptedCalibrationLoader>,
    pcm: Arc<StubPcmDriver>,
}

fn stack() -> Stack {
    stack_with_config(&PlatformConfig::default())
}

fn stack_with_config(config: &PlatformConfig) -> Stack {
    let mixer = Arc::new(StubMixer::new());
    let loader = Arc::new(ScriptedCalibrationLoader::new());
    let pcm = Arc::new(StubPcmDriver::new());
    let ctx = AudioContext::new(
        config,
        Arc::clone(&mixer) as Arc<dyn MixerPathControl>,
        Arc::clone(&mixer) as Arc<dyn EchoReference>,
        Arc::clone(&loader) as Arc<dyn CalibrationLoader>,
        Arc::clone(&pcm) as Arc<dyn PcmDriver>,
    )
    .unwrap();
    Stack { ctx, mixer, loader, pcm }
}

fn fast_calibration() -> CalibrationConfig {
    CalibrationConfig {
        enabled: true,
        min_speaker_idle_secs: 0,
        start_delay_ms: 10,
        poll_interval_ms: 5,
        max_polls: 10,
        file_path: None,
    }
}

fn good_calibration() -> SpeakerCalibration {
    SpeakerCalibration {
        t0: [40 << 6, 40 << 6],
        r0: [8 << 24, 8 << 24],
    }
}

fn wait_until(deadline_secs: u64, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(deadline_secs);
    while !done() {
        assert!(Instant::now() < deadline, "timed out");
        thread::sleep(Duration::from_millis(2));
    }
}

// ============================================================================
// ROUTING
// ============================================================================

#[test]
fn test_playback_bringup_ordering() {
    let s = stack();
    s.ctx
        .begin_routing(
            UsecaseKind::DeepBufferPlayback,
            StreamId::new(1),
            RouteRequest::playback(OutputDevices::SPEAKER),
        )
        .unwrap();

    assert_eq!(
        s.mixer.ops(),
        vec![
            MixerOp::EnableDevice(SoundDevice::OutSpeaker),
            MixerOp::ApplyRoute("speaker".into()),
        ]
    );
    assert!(s.mixer.is_enabled(SoundDevice::OutSpeaker));
    assert_eq!(s.pcm.live_handles(), 1);
    // Calibration data follows device enable on every routing transition.
    assert_eq!(s.loader.sent_calibrations(), vec![(14, 0x11130, 48000)]);

    s.ctx.end_routing(UsecaseKind::DeepBufferPlayback).unwrap();
    assert_eq!(
        s.mixer.ops()[2..],
        [
            MixerOp::RemoveRoute("speaker".into()),
            MixerOp::DisableDevice(SoundDevice::OutSpeaker),
        ]
    );
    assert_eq!(s.pcm.live_handles(), 0);
}

#[test]
fn test_shared_speaker_enabled_once() {
    let s = stack();
    for (kind, stream) in [
        (UsecaseKind::DeepBufferPlayback, 1),
        (UsecaseKind::LowLatencyPlayback, 2),
        (UsecaseKind::MultiChannelPlayback, 3),
    ] {
        s.ctx
            .begin_routing(
                kind,
                StreamId::new(stream),
                RouteRequest::playback(OutputDevices::SPEAKER),
            )
            .unwrap();
    }

    let enables = s
        .mixer
        .ops()
        .iter()
        .filter(|op| matches!(op, MixerOp::EnableDevice(SoundDevice::OutSpeaker)))
        .count();
    assert_eq!(enables, 1);

    s.ctx.end_routing(UsecaseKind::DeepBufferPlayback).unwrap();
    s.ctx.end_routing(UsecaseKind::LowLatencyPlayback).unwrap();
    assert!(s.mixer.is_enabled(SoundDevice::OutSpeaker));
    s.ctx.end_routing(UsecaseKind::MultiChannelPlayback).unwrap();
    assert!(!s.mixer.is_enabled(SoundDevice::OutSpeaker));
}

#[test]
fn test_gapless_switch_to_other_backend() {
    let s = stack();
    s.ctx
        .begin_routing(
            UsecaseKind::DeepBufferPlayback,
            StreamId::new(1),
            RouteRequest::playback(OutputDevices::SPEAKER),
        )
        .unwrap();
    s.mixer.clear_ops();

    s.ctx
        .change_devices(
            UsecaseKind::DeepBufferPlayback,
            RouteRequest::playback(OutputDevices::BT_SCO),
        )
        .unwrap();

    // BT-SCO sits on its own backend: the new path comes up first.
    assert_eq!(
        s.mixer.ops()[..4],
        [
            MixerOp::EnableDevice(SoundDevice::OutBtSco),
            MixerOp::ApplyRoute("bt-sco-headset".into()),
            MixerOp::RemoveRoute("speaker".into()),
            MixerOp::DisableDevice(SoundDevice::OutSpeaker),
        ]
    );
}

#[test]
fn test_pcm_failure_leaves_no_partial_state() {
    let s = stack();
    // Low-latency playback maps to PCM device 15.
    s.pcm.fail_device(soundpath_core::domain::pcm::PcmDeviceId(15));

    let err = s
        .ctx
        .begin_routing(
            UsecaseKind::LowLatencyPlayback,
            StreamId::new(1),
            RouteRequest::playback(OutputDevices::SPEAKER),
        )
        .unwrap_err();
    assert!(matches!(err, RouteError::Hardware(_)));

    assert!(s.ctx.active_usecases().is_empty());
    assert!(s.mixer.enabled_devices().is_empty());
    assert_eq!(s.pcm.live_handles(), 0);

    // The speaker is still usable by another usecase afterwards.
    s.ctx
        .begin_routing(
            UsecaseKind::DeepBufferPlayback,
            StreamId::new(1),
            RouteRequest::playback(OutputDevices::SPEAKER),
        )
        .unwrap();
    assert!(s.mixer.is_enabled(SoundDevice::OutSpeaker));
}

#[test]
fn test_voice_call_with_echo_reference() {
    let s = stack();
    s.ctx.set_mode(soundpath_core::domain::selector::AudioMode::InCall);
    let devices = s
        .ctx
        .begin_routing(
            UsecaseKind::VoiceCall,
            StreamId::new(1),
            RouteRequest::voice(OutputDevices::SPEAKER, InputDevices::BUILTIN_MIC),
        )
        .unwrap();

    assert_eq!(devices.output, SoundDevice::OutVoiceSpeaker);
    assert_eq!(devices.input, SoundDevice::InVoiceSpeakerMic);
    // Speakerphone voice enables the echo-reference route.
    assert!(s.mixer.echo_reference_enabled());
    assert_eq!(s.pcm.live_handles(), 2);
}

#[test]
fn test_capture_follows_active_input_descriptor() {
    let s = stack();
    s.ctx.set_active_input(Some(ActiveInput {
        source: CaptureSource::VoiceRecognition,
        devices: InputDevices::BUILTIN_MIC,
        channels: 1,
        aec: false,
        ns: true,
    }));

    let devices = s
        .ctx
        .begin_routing(
            UsecaseKind::Capture,
            StreamId::new(1),
            RouteRequest::capture(InputDevices::BUILTIN_MIC),
        )
        .unwrap();
    assert_eq!(devices.input, SoundDevice::InVoiceRecMicNs);
}

// ============================================================================
// CALIBRATION
// ============================================================================

#[test]
fn test_calibration_success_persists_to_file() {
    let s = stack();
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileCalibrationStore::new(dir.path().join("audio.cal")));
    let thermal = Arc::new(SimThermal::new());

    s.loader
        .script_statuses([CalibStatus::InProgress, CalibStatus::Success(good_calibration())]);

    let protection = SpeakerProtection::new(
        Arc::clone(&s.ctx),
        Arc::clone(&thermal) as Arc<dyn ThermalClient>,
        Arc::clone(&store) as Arc<dyn CalibrationPersistence>,
        fast_calibration(),
    );
    let handle = SpeakerProtection::spawn(&protection);

    wait_until(5, || thermal.has_subscriber());
    thermal.emit(34);

    handle.join().unwrap();
    assert_eq!(protection.state(), CalibrationState::Calibrated);
    assert_eq!(s.loader.started_with(), vec![[34 << 6, 34 << 6]]);
    assert_eq!(s.loader.installed(), Some(good_calibration()));
    assert_eq!(store.load().unwrap(), Some(good_calibration()));

    // All calibration hardware released.
    assert_eq!(s.pcm.live_handles(), 0);
    assert!(s.ctx.active_usecases().is_empty());
    assert!(s.mixer.enabled_devices().is_empty());
    // Sampling was turned on, then off.
    assert_eq!(
        thermal.requests(),
        vec![("spkr_prot".to_string(), true), ("spkr_prot".to_string(), false)]
    );
}

#[test]
fn test_valid_calibration_file_skips_hardware() {
    let s = stack();
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileCalibrationStore::new(dir.path().join("audio.cal")));
    store.save(&good_calibration()).unwrap();

    let protection = SpeakerProtection::new(
        Arc::clone(&s.ctx),
        Arc::new(SimThermal::new()),
        Arc::clone(&store) as Arc<dyn CalibrationPersistence>,
        fast_calibration(),
    );
    SpeakerProtection::spawn(&protection).join().unwrap();

    assert_eq!(protection.state(), CalibrationState::Calibrated);
    assert_eq!(s.loader.installed(), Some(good_calibration()));
    assert!(s.loader.started_with().is_empty());
    assert!(s.pcm.opened().is_empty());
}

#[test]
fn test_disabled_calibration_never_runs() {
    let s = stack();
    let config = CalibrationConfig {
        enabled: false,
        ..fast_calibration()
    };
    let protection = SpeakerProtection::new(
        Arc::clone(&s.ctx),
        Arc::new(SimThermal::new()),
        Arc::new(FileCalibrationStore::new("/nonexistent/audio.cal")),
        config,
    );
    SpeakerProtection::spawn(&protection).join().unwrap();
    assert_eq!(protection.state(), CalibrationState::Disabled);
    assert!(s.pcm.opened().is_empty());
}

#[test]
fn test_playback_cancels_calibration_before_proceeding() {
    let s = stack();
    let thermal = Arc::new(SimThermal::new());
    // Park the attempt in its start-timer wait so the cancel lands there.
    let config = CalibrationConfig {
        start_delay_ms: 60_000,
        ..fast_calibration()
    };
    let protection = SpeakerProtection::new(
        Arc::clone(&s.ctx),
        Arc::clone(&thermal) as Arc<dyn ThermalClient>,
        Arc::new(FileCalibrationStore::new("/nonexistent/audio.cal")),
        config,
    );
    let _handle = SpeakerProtection::spawn(&protection);

    wait_until(5, || thermal.has_subscriber());
    thermal.emit(30);

    // Calibration owns both PCM nodes once the attempt is in flight.
    wait_until(5, || s.pcm.live_handles() == 2);
    assert_eq!(protection.state(), CalibrationState::Calibrating);

    // Starting real playback must tear the whole attempt down first: when
    // begin_routing returns, the calibration handles are closed and only
    // the playback node remains.
    s.ctx
        .begin_routing(
            UsecaseKind::DeepBufferPlayback,
            StreamId::new(1),
            RouteRequest::playback(OutputDevices::SPEAKER),
        )
        .unwrap();

    assert_eq!(s.pcm.live_handles(), 1);
    let kinds: Vec<_> = s.ctx.active_usecases().iter().map(|u| u.kind).collect();
    assert_eq!(kinds, vec![UsecaseKind::DeepBufferPlayback]);
    assert!(!s.mixer.is_enabled(SoundDevice::OutSpeakerProtected));
    assert!(!s.mixer.is_enabled(SoundDevice::InCaptureViFeedback));
    // Cancellation is not a failure: nothing was installed or persisted,
    // and the subsystem goes back to waiting rather than giving up.
    assert!(s.loader.installed().is_none());
    wait_until(5, || protection.state() == CalibrationState::NotCalibrated);
}

// ============================================================================
// INVARIANTS
// ============================================================================

proptest! {
    /// Physical mixer state always mirrors the reference counts, for any
    /// interleaving of begin/change/end across usecases and devices.
    #[test]
    fn prop_mixer_state_mirrors_refcounts(
        ops in proptest::collection::vec((0u8..3u8, 0u8..3u8, 0u8..2u8), 1..32)
    ) {
        let s = stack();
        let kinds = [
            UsecaseKind::DeepBufferPlayback,
            UsecaseKind::LowLatencyPlayback,
            UsecaseKind::MultiChannelPlayback,
        ];
        let targets = [OutputDevices::SPEAKER, OutputDevices::WIRED_HEADPHONE];

        for (action, slot, target) in ops {
            let kind = kinds[slot as usize % 3];
            let stream = StreamId::new(u64::from(slot % 3));
            let request = RouteRequest::playback(targets[target as usize % 2]);
            match action {
                0 => {
                    let _ = s.ctx.begin_routing(kind, stream, request);
                }
                1 => {
                    let _ = s.ctx.change_devices(kind, request);
                }
                _ => s.ctx.end_routing(kind).unwrap(),
            }

            let mut counted: Vec<SoundDevice> =
                s.ctx.device_refcounts().iter().map(|&(d, _)| d).collect();
            let mut enabled = s.mixer.enabled_devices();
            counted.sort_by_key(|d| format!("{d:?}"));
            enabled.sort_by_key(|d| format!("{d:?}"));
            prop_assert_eq!(counted, enabled);
        }
    }
}
