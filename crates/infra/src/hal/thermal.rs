//! Thermal service clients

use std::sync::Mutex;
use tracing::debug;

use soundpath_core::domain::hal::{TempCallback, ThermalClient};

/// Thermal client for platforms without a thermal service; registration
/// always fails, which makes the calibration thread synthesize a default
/// temperature.
#[derive(Default)]
pub struct NullThermal;

impl ThermalClient for NullThermal {
    fn register(&self, _callback: TempCallback) -> bool {
        false
    }

    fn request(&self, _client_name: &str, _enable: bool) -> bool {
        false
    }
}

/// Simulated thermal service. Temperature samples are injected with
/// [`emit`](SimThermal::emit) and delivered synchronously to the registered
/// callback, standing in for the vendor library's async delivery.
#[derive(Default)]
pub struct SimThermal {
    callback: Mutex<Option<TempCallback>>,
    requested: Mutex<Vec<(String, bool)>>,
}

impl SimThermal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver one temperature sample (degrees Celsius).
    pub fn emit(&self, temp_c: i32) {
        if let Some(cb) = self.callback.lock().unwrap().as_ref() {
            debug!("thermal: sample {}°C", temp_c);
            cb(temp_c);
        }
    }

    pub fn has_subscriber(&self) -> bool {
        self.callback.lock().unwrap().is_some()
    }

    /// Sampling requests seen so far, in order.
    pub fn requests(&self) -> Vec<(String, bool)> {
        self.requested.lock().unwrap().clone()
    }
}

impl ThermalClient for SimThermal {
    fn register(&self, callback: TempCallback) -> bool {
        *self.callback.lock().unwrap() = Some(callback);
        true
    }

    fn request(&self, client_name: &str, enable: bool) -> bool {
        self.requested
            .lock()
            .unwrap()
            .push((client_name.to_string(), enable));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_null_thermal_refuses_registration() {
        let thermal = NullThermal;
        assert!(!thermal.register(Box::new(|_| {})));
        assert!(!thermal.request("spkr_prot", true));
    }

    #[test]
    fn test_sim_thermal_delivers_samples() {
        let thermal = SimThermal::new();
        let last = Arc::new(AtomicI32::new(i32::MIN));
        let sink = Arc::clone(&last);
        assert!(thermal.register(Box::new(move |t| sink.store(t, Ordering::SeqCst))));
        assert!(thermal.has_subscriber());

        thermal.emit(37);
        assert_eq!(last.load(Ordering::SeqCst), 37);

        thermal.request("spkr_prot", true);
        assert_eq!(thermal.requests(), vec![("spkr_prot".to_string(), true)]);
    }
}
