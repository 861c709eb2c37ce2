use super::{DeviceSignal, DeviceSink};
use log::info;

/// Device without hardware: every signal ends up in the log.
pub struct LogDevice {
    log_target: String,
}
impl LogDevice {
    pub fn new(name: &str) -> Self {
        Self {
            log_target: format!("Device[{}]", name),
        }
    }
}
impl DeviceSink for LogDevice {
    fn signal(&mut self, signal: DeviceSignal) {
        info!(target: &self.log_target, "{}", signal);
    }
}
