//! soundpath CLI
//!
//! Runs a routing scenario against the stub backends: brings up playback,
//! capture and a device switch, then dumps the registry and device state as
//! JSON. Useful for exercising the routing engine without hardware.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use soundpath_core::domain::calibration::SpeakerProtection;
use soundpath_core::domain::config::PlatformConfig;
use soundpath_core::domain::hal::{CalibrationLoader, EchoReference, MixerPathControl, PcmDriver};
use soundpath_core::domain::pcm::PcmDeviceId;
use soundpath_core::domain::routing::{AudioContext, RouteRequest};
use soundpath_core::domain::selector::{InputDevices, OutputDevices};
use soundpath_core::domain::usecase::{StreamId, UsecaseKind};
use soundpath_infra::{
    FileCalibrationStore, KeepAlive, NullThermal, ScriptedCalibrationLoader, StubMixer,
    StubPcmDriver,
};

#[derive(Parser)]
#[command(name = "soundpath")]
#[command(about = "Audio device routing demo", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Platform configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run the background speaker calibration thread
    #[arg(long)]
    calibrate: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .init();
    }

    let config = match &cli.config {
        Some(path) => PlatformConfig::load(path)?,
        None => PlatformConfig::default(),
    };

    let mixer = Arc::new(StubMixer::new());
    let loader = Arc::new(ScriptedCalibrationLoader::new());
    let pcm = Arc::new(StubPcmDriver::new());
    let ctx = AudioContext::new(
        &config,
        Arc::clone(&mixer) as Arc<dyn MixerPathControl>,
        Arc::clone(&mixer) as Arc<dyn EchoReference>,
        Arc::clone(&loader) as Arc<dyn CalibrationLoader>,
        Arc::clone(&pcm) as Arc<dyn PcmDriver>,
    )?;

    let _calibration = if cli.calibrate {
        let cal_path = config
            .speaker_calibration
            .file_path
            .clone()
            .unwrap_or_else(|| {
                dirs::data_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("soundpath/audio.cal")
            });
        info!("calibration file: {}", cal_path.display());
        let protection = SpeakerProtection::new(
            Arc::clone(&ctx),
            Arc::new(NullThermal),
            Arc::new(FileCalibrationStore::new(cal_path)),
            config.speaker_calibration.clone(),
        );
        Some(SpeakerProtection::spawn(&protection))
    } else {
        None
    };

    // Hold the primary playback link open across the scenario.
    let keepalive = KeepAlive::spawn(
        Arc::clone(&pcm) as Arc<dyn PcmDriver>,
        PcmDeviceId(0),
    );
    keepalive.start();

    // Playback to the speaker, shared by a second stream.
    ctx.begin_routing(
        UsecaseKind::DeepBufferPlayback,
        StreamId::new(1),
        RouteRequest::playback(OutputDevices::SPEAKER),
    )?;
    ctx.begin_routing(
        UsecaseKind::LowLatencyPlayback,
        StreamId::new(2),
        RouteRequest::playback(OutputDevices::SPEAKER),
    )?;

    // Capture from the built-in mic.
    ctx.begin_routing(
        UsecaseKind::Capture,
        StreamId::new(3),
        RouteRequest::capture(InputDevices::BUILTIN_MIC),
    )?;

    // Headphones plugged in: switch the deep-buffer stream over.
    ctx.change_devices(
        UsecaseKind::DeepBufferPlayback,
        RouteRequest::playback(OutputDevices::WIRED_HEADPHONE),
    )?;

    println!("{}", serde_json::to_string_pretty(&ctx.active_usecases())?);
    for (device, count) in ctx.device_refcounts() {
        println!("{device:?}: {count} ref(s)");
    }

    ctx.end_routing(UsecaseKind::Capture)?;
    ctx.end_routing(UsecaseKind::LowLatencyPlayback)?;
    ctx.end_routing(UsecaseKind::DeepBufferPlayback)?;
    keepalive.stop();
    drop(keepalive);

    info!("scenario complete; {} pcm handles open", pcm.live_handles());
    Ok(())
}
