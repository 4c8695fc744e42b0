//! Speaker calibration persistence
//!
//! The calibration file holds one fixed-size little-endian record per
//! speaker channel: temperature (Q6) followed by resistance (Q24), read once
//! at startup and rewritten only after a successful calibration.

use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{debug, warn};

use soundpath_core::domain::hal::{CalibrationPersistence, SpeakerCalibration};

const RECORD_BYTES: usize = 2 * 2 * std::mem::size_of::<i32>();

/// Flat-file calibration store.
pub struct FileCalibrationStore {
    path: PathBuf,
}

impl FileCalibrationStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl CalibrationPersistence for FileCalibrationStore {
    fn load(&self) -> io::Result<Option<SpeakerCalibration>> {
        let mut file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err),
        };

        let mut raw = [0u8; RECORD_BYTES];
        if let Err(err) = file.read_exact(&mut raw) {
            // A short file is treated like a missing one; the next
            // calibration rewrites it.
            warn!("calibration file truncated: {}", err);
            return Ok(None);
        }

        let word = |i: usize| {
            i32::from_le_bytes(raw[i * 4..i * 4 + 4].try_into().expect("4-byte slice"))
        };
        let cal = SpeakerCalibration {
            t0: [word(0), word(2)],
            r0: [word(1), word(3)],
        };
        debug!("loaded calibration from {}", self.path.display());
        Ok(Some(cal))
    }

    fn save(&self, cal: &SpeakerCalibration) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut raw = [0u8; RECORD_BYTES];
        for ch in 0..2 {
            raw[ch * 8..ch * 8 + 4].copy_from_slice(&cal.t0[ch].to_le_bytes());
            raw[ch * 8 + 4..ch * 8 + 8].copy_from_slice(&cal.r0[ch].to_le_bytes());
        }
        let mut file = fs::File::create(&self.path)?;
        file.write_all(&raw)?;
        debug!("wrote calibration to {}", self.path.display());
        Ok(())
    }
}

/// In-memory store for tests and thermal-less bring-up.
#[derive(Default)]
pub struct MemoryCalibrationStore {
    cell: Mutex<Option<SpeakerCalibration>>,
}

impl MemoryCalibrationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_calibration(cal: SpeakerCalibration) -> Self {
        Self {
            cell: Mutex::new(Some(cal)),
        }
    }

    pub fn stored(&self) -> Option<SpeakerCalibration> {
        *self.cell.lock().unwrap()
    }
}

impl CalibrationPersistence for MemoryCalibrationStore {
    fn load(&self) -> io::Result<Option<SpeakerCalibration>> {
        Ok(*self.cell.lock().unwrap())
    }

    fn save(&self, cal: &SpeakerCalibration) -> io::Result<()> {
        *self.cell.lock().unwrap() = Some(*cal);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SpeakerCalibration {
        SpeakerCalibration {
            t0: [40 << 6, 41 << 6],
            r0: [8 << 24, 9 << 24],
        }
    }

    #[test]
    fn test_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCalibrationStore::new(dir.path().join("audio.cal"));
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn test_save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCalibrationStore::new(dir.path().join("cal/audio.cal"));
        store.save(&sample()).unwrap();
        assert_eq!(store.load().unwrap(), Some(sample()));
    }

    #[test]
    fn test_truncated_file_reads_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audio.cal");
        fs::write(&path, [0u8; 7]).unwrap();
        let store = FileCalibrationStore::new(&path);
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryCalibrationStore::new();
        assert_eq!(store.load().unwrap(), None);
        store.save(&sample()).unwrap();
        assert_eq!(store.stored(), Some(sample()));
    }
}
