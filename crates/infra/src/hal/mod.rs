//! Backend implementations of the hardware collaborator traits

pub mod cal_store;
pub mod stub;
pub mod thermal;

pub use cal_store::{FileCalibrationStore, MemoryCalibrationStore};
pub use stub::{NullCalibrationLoader, ScriptedCalibrationLoader, StubMixer, StubPcmDriver};
pub use thermal::{NullThermal, SimThermal};
