//! soundpath-core: audio device routing and usecase lifecycle management
//!
//! Decides which physical hardware path serves each active audio activity,
//! reference-counts shared sound devices, and coordinates the background
//! speaker-protection calibration thread with live routing. Hardware is
//! reached exclusively through the collaborator traits in [`domain::hal`];
//! platform implementations live in `soundpath-infra`.

pub mod domain;
