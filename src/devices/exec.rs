use super::{DeviceSignal, DeviceSink};
use crate::config::ExecDeviceConfig;
use log::{debug, error, log_enabled, trace, Level as log_level};
use std::process::{Command, Stdio};

/// Drives an external indicator by running a program once per signal.
///
/// The signal name is appended as last argument and exported as
/// `BLINK_SIGNAL`, the session name as `BLINK_SESSION`.
pub struct ExecDevice {
    name: String,
    log_target: String,
    config: ExecDeviceConfig,
}
impl ExecDevice {
    pub fn new(name: String, config: &ExecDeviceConfig) -> Self {
        Self {
            log_target: format!("ExecDevice[{}]", name),
            name,
            config: config.clone(),
        }
    }

    fn command(&self, signal: DeviceSignal) -> Command {
        let signal = signal.to_string();
        let mut command = Command::new(&self.config.executable);
        command.stdin(Stdio::null()).stdout(Stdio::piped());
        if let Some(arguments) = self.config.arguments.as_ref() {
            command.args(arguments);
        }
        command.arg(&signal);
        if let Some(environment) = self.config.environment.as_ref() {
            command.envs(environment);
        }
        command.env("BLINK_SESSION", &self.name);
        command.env("BLINK_SIGNAL", &signal);
        command
    }
}
impl DeviceSink for ExecDevice {
    fn signal(&mut self, signal: DeviceSignal) {
        trace!(target: &self.log_target, "Signal: {}", signal);
        let child = match self.command(signal).spawn() {
            Ok(child) => child,
            Err(err) => {
                error!(
                    target: &self.log_target,
                    "Error while spawning configured executable: {}", err
                );
                return;
            }
        };
        let child_result = child.wait_with_output();
        match child_result {
            Ok(output) => {
                if log_enabled!(log_level::Debug) && !output.stdout.is_empty() {
                    // print child output as one block, not interleaved with other log lines
                    debug!(
                        target: &format!("{}[Child]", self.log_target),
                        "{}",
                        String::from_utf8_lossy(&output.stdout)
                    );
                }
                if output.status.success() {
                    debug!(target: &self.log_target, "Delivered {}", signal);
                } else {
                    error!(
                        target: &self.log_target,
                        "Child exited with: {}",
                        output.status.code().unwrap_or(-1)
                    );
                }
            }
            Err(err) => error!(target: &self.log_target, "Child exited with error: {}", err),
        }
    }
}
