//! Silence keep-alive worker
//!
//! Some backends (HDMI, proxy) power their link down when no PCM is
//! running, clipping the first milliseconds of the next stream. The
//! keep-alive worker holds the link open by trickling silence from a
//! low-priority thread, commanded over a channel.

use crossbeam::channel::{unbounded, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, warn};

use soundpath_core::domain::hal::{Direction, PcmConfig, PcmDriver, PcmHandle};
use soundpath_core::domain::pcm::PcmDeviceId;

const WRITE_INTERVAL: Duration = Duration::from_millis(20);
const SILENCE_BYTES: usize = 3840; // 20 ms of 48 kHz stereo S16

enum Command {
    Start,
    Stop,
    Quit,
}

/// Handle to the keep-alive worker thread.
pub struct KeepAlive {
    tx: Sender<Command>,
    handle: Option<JoinHandle<()>>,
}

impl KeepAlive {
    /// Spawn the worker for one PCM device. It stays idle until
    /// [`start`](KeepAlive::start) is called.
    pub fn spawn(pcm: Arc<dyn PcmDriver>, device: PcmDeviceId) -> Self {
        let (tx, rx) = unbounded();
        let handle = std::thread::Builder::new()
            .name("keep-alive".into())
            .spawn(move || {
                let silence = vec![0u8; SILENCE_BYTES];
                let mut active: Option<Box<dyn PcmHandle>> = None;
                loop {
                    let command = if active.is_some() {
                        match rx.recv_timeout(WRITE_INTERVAL) {
                            Ok(cmd) => Some(cmd),
                            Err(RecvTimeoutError::Timeout) => None,
                            Err(RecvTimeoutError::Disconnected) => break,
                        }
                    } else {
                        match rx.recv() {
                            Ok(cmd) => Some(cmd),
                            Err(_) => break,
                        }
                    };

                    match command {
                        Some(Command::Start) => {
                            if active.is_none() {
                                match open_silence_pcm(pcm.as_ref(), device) {
                                    Ok(handle) => {
                                        debug!("keep-alive running on pcm {}", device.0);
                                        active = Some(handle);
                                    }
                                    Err(err) => warn!("keep-alive open failed: {}", err),
                                }
                            }
                        }
                        Some(Command::Stop) => {
                            if active.take().is_some() {
                                debug!("keep-alive stopped");
                            }
                        }
                        Some(Command::Quit) => break,
                        None => {
                            if let Some(handle) = active.as_mut() {
                                if let Err(err) = handle.write(&silence) {
                                    warn!("keep-alive write failed: {}", err);
                                    active = None;
                                }
                            }
                        }
                    }
                }
            })
            .expect("failed to spawn keep-alive thread");
        Self {
            tx,
            handle: Some(handle),
        }
    }

    pub fn start(&self) {
        let _ = self.tx.send(Command::Start);
    }

    pub fn stop(&self) {
        let _ = self.tx.send(Command::Stop);
    }
}

impl Drop for KeepAlive {
    fn drop(&mut self) {
        let _ = self.tx.send(Command::Quit);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn open_silence_pcm(
    pcm: &dyn PcmDriver,
    device: PcmDeviceId,
) -> soundpath_core::domain::hal::Result<Box<dyn PcmHandle>> {
    let mut handle = pcm.open(device, Direction::Playback, &PcmConfig::default())?;
    handle.start()?;
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::stub::StubPcmDriver;

    #[test]
    fn test_keepalive_opens_and_closes_pcm() {
        let driver = Arc::new(StubPcmDriver::new());
        let worker = KeepAlive::spawn(
            Arc::clone(&driver) as Arc<dyn PcmDriver>,
            PcmDeviceId(0),
        );

        worker.start();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while driver.live_handles() == 0 {
            assert!(std::time::Instant::now() < deadline);
            std::thread::sleep(Duration::from_millis(2));
        }

        worker.stop();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while driver.live_handles() != 0 {
            assert!(std::time::Instant::now() < deadline);
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn test_drop_joins_worker() {
        let driver = Arc::new(StubPcmDriver::new());
        let worker = KeepAlive::spawn(
            Arc::clone(&driver) as Arc<dyn PcmDriver>,
            PcmDeviceId(0),
        );
        worker.start();
        drop(worker);
        assert_eq!(driver.live_handles(), 0);
    }
}
