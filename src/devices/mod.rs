pub mod exec;
pub mod logger;

use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Color {
    Red,
    Green,
    Orange,
}
impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Color::Red => "red",
            Color::Green => "green",
            Color::Orange => "orange",
        })
    }
}

/// A discrete signal a session sends to its indicator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceSignal {
    Blink,
    BlinkPrimary,
    BlinkSecondary,
    Color(Color),
}
impl fmt::Display for DeviceSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceSignal::Blink => f.write_str("blink"),
            DeviceSignal::BlinkPrimary => f.write_str("blink_primary"),
            DeviceSignal::BlinkSecondary => f.write_str("blink_secondary"),
            DeviceSignal::Color(color) => write!(f, "color_{}", color),
        }
    }
}

/// Indicator driven by a polling session.
///
/// Calls are fire-and-forget: implementations handle (or log) their own
/// failures, nothing is reported back to the session.
pub trait DeviceSink: Send {
    fn signal(&mut self, signal: DeviceSignal);

    fn blink(&mut self) {
        self.signal(DeviceSignal::Blink);
    }
    fn blink_primary(&mut self) {
        self.signal(DeviceSignal::BlinkPrimary);
    }
    fn blink_secondary(&mut self) {
        self.signal(DeviceSignal::BlinkSecondary);
    }
    fn set_color(&mut self, color: Color) {
        self.signal(DeviceSignal::Color(color));
    }
}

#[cfg(test)]
pub mod recording {
    use super::{DeviceSignal, DeviceSink};
    use std::sync::{Arc, Mutex};

    /// Device that remembers every signal, shared with the test body.
    #[derive(Clone, Default)]
    pub struct RecordingDevice {
        pub signals: Arc<Mutex<Vec<DeviceSignal>>>,
    }
    impl RecordingDevice {
        pub fn take(&self) -> Vec<DeviceSignal> {
            std::mem::take(&mut *self.signals.lock().unwrap())
        }
    }
    impl DeviceSink for RecordingDevice {
        fn signal(&mut self, signal: DeviceSignal) {
            self.signals.lock().unwrap().push(signal);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(DeviceSignal::Blink, "blink")]
    #[test_case(DeviceSignal::BlinkPrimary, "blink_primary")]
    #[test_case(DeviceSignal::BlinkSecondary, "blink_secondary")]
    #[test_case(DeviceSignal::Color(Color::Orange), "color_orange")]
    fn signal_names(signal: DeviceSignal, expected: &str) {
        assert_eq!(signal.to_string(), expected);
    }

    #[test]
    fn convenience_calls_map_to_signals() {
        let mut device = recording::RecordingDevice::default();
        device.blink();
        device.blink_primary();
        device.blink_secondary();
        device.set_color(Color::Red);
        assert_eq!(
            device.take(),
            vec![
                DeviceSignal::Blink,
                DeviceSignal::BlinkPrimary,
                DeviceSignal::BlinkSecondary,
                DeviceSignal::Color(Color::Red)
            ]
        );
    }
}
