use crate::{
    devices::{Color, DeviceSink},
    status::{StatusBus, StatusEvent},
    strategies::{
        ConnectionParams, CountShape, Counts, Credentials, FetchError, FetchRequest,
        FetchStrategy,
    },
};
use log::{debug, error, info, trace, warn};
use std::{
    io,
    sync::{Arc, Condvar, Mutex},
    thread,
    time::Duration,
};

/// Granularity of the idle countdown.
pub const TICK: Duration = Duration::from_millis(100);

pub const CHECKING_STATUS: &str = "Checking…";
pub const AUTH_FAILURE_STATUS: &str = "Invalid login or password";
pub const CONNECTIVITY_FAILURE_STATUS: &str = "No connection to the server";
pub const REJECTED_REQUEST_STATUS: &str = "Request rejected by the server";
pub const DATABASE_FAILURE_STATUS: &str = "Database connection error";

/// Cooperative cancellation flag shared between a session and its owner.
///
/// Once stopped a token stays stopped. Stopping wakes up anybody sleeping in
/// [`StopToken::wait_timeout`].
#[derive(Clone, Default)]
pub struct StopToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}
impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        let (stopped, wakeup) = &*self.inner;
        *stopped.lock().unwrap_or_else(|p| p.into_inner()) = true;
        wakeup.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Sleep for `timeout` or until stopped, whichever comes first.
    /// Returns whether the token is stopped.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (stopped, wakeup) = &*self.inner;
        let guard = stopped.lock().unwrap_or_else(|p| p.into_inner());
        let (guard, _) = wakeup
            .wait_timeout_while(guard, timeout, |stopped| !*stopped)
            .unwrap_or_else(|p| p.into_inner());
        *guard
    }
}

/// Last successfully observed counts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Baseline {
    pub primary: u32,
    pub secondary: u32,
}
impl Baseline {
    fn updated(self, counts: Counts) -> Self {
        match counts {
            Counts::Single(count) => Self {
                primary: count,
                ..self
            },
            Counts::Pair { tasks, issues } => Self {
                primary: tasks,
                secondary: issues,
            },
        }
    }
}

pub fn describe(counts: Counts) -> String {
    match counts {
        Counts::Single(count) => format!("Unread: {}", count),
        Counts::Pair { tasks, issues } => format!("Tasks: {} | Issues: {}", tasks, issues),
    }
}

fn failure_status(err: &FetchError, shape: CountShape) -> String {
    match (err, shape) {
        (FetchError::Authentication(_), _) => AUTH_FAILURE_STATUS.to_owned(),
        (FetchError::Connectivity(_), _) => CONNECTIVITY_FAILURE_STATUS.to_owned(),
        (FetchError::Rejected(_), CountShape::Single) => REJECTED_REQUEST_STATUS.to_owned(),
        (FetchError::Rejected(_), CountShape::Pair) => DATABASE_FAILURE_STATUS.to_owned(),
        (other, _) => other.to_string(),
    }
}

/// The fetch-report-idle loop of one backend.
pub struct PollingSession {
    name: String,
    log_target: String,
    interval_ticks: u32,
    strategy: Box<dyn FetchStrategy>,
    device: Box<dyn DeviceSink>,
    bus: StatusBus,
    connection: ConnectionParams,
    credentials: Credentials,
    baseline: Baseline,
    status: String,
    stop: StopToken,
}
impl PollingSession {
    pub fn new(
        name: &str,
        strategy: Box<dyn FetchStrategy>,
        device: Box<dyn DeviceSink>,
        bus: StatusBus,
    ) -> Self {
        Self {
            name: name.to_owned(),
            log_target: format!("Session[{}]", name),
            interval_ticks: 200,
            strategy,
            device,
            bus,
            connection: ConnectionParams::default(),
            credentials: Credentials::default(),
            baseline: Baseline::default(),
            status: String::new(),
            stop: StopToken::new(),
        }
    }

    /// Poll interval in seconds, rounded to whole ticks (at least one).
    pub fn with_interval(mut self, seconds: f64) -> Self {
        let ticks = seconds / TICK.as_secs_f64();
        self.interval_ticks = ticks.round().clamp(1.0, u32::MAX as f64) as u32;
        self
    }

    pub fn configure(&mut self, connection: ConnectionParams, credentials: Credentials) {
        self.set_connection(connection);
        self.set_credentials(credentials);
    }
    pub fn set_connection(&mut self, connection: ConnectionParams) {
        self.connection = connection;
    }
    pub fn set_credentials(&mut self, credentials: Credentials) {
        self.credentials = credentials;
    }

    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn connection(&self) -> &ConnectionParams {
        &self.connection
    }
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }
    pub fn status(&self) -> &str {
        &self.status
    }
    pub fn baseline(&self) -> Baseline {
        self.baseline
    }
    pub fn stop_token(&self) -> StopToken {
        self.stop.clone()
    }
    /// Request termination. The loop honors it at its next checkpoint.
    pub fn stop(&self) {
        self.stop.stop();
    }

    fn set_status(&mut self, status: impl Into<String>) {
        self.status = status.into();
        trace!(target: &self.log_target, "Status: {}", self.status);
        self.bus.publish(StatusEvent::new(self.status.clone()));
    }

    /// Runs until stopped. Returns the error that ended the session, if any.
    pub fn run(&mut self) -> Result<(), FetchError> {
        info!(target: &self.log_target, "Starting");
        while !self.stop.is_stopped() {
            self.set_status(CHECKING_STATUS);
            let request = FetchRequest {
                connection: &self.connection,
                credentials: &self.credentials,
            };
            let (message, counts) = match self.strategy.fetch(request) {
                Ok(counts) => (describe(counts), Some(counts)),
                Err(err) if err.is_recoverable() => {
                    warn!(target: &self.log_target, "Fetch failed: {}", err);
                    (failure_status(&err, self.strategy.shape()), None)
                }
                Err(err) => {
                    error!(target: &self.log_target, "Giving up: {}", err);
                    self.set_status(err.to_string());
                    self.stop.stop();
                    return Err(err);
                }
            };
            self.set_status(message.as_str());

            if self.stop.is_stopped() {
                break;
            }

            self.signal_device(counts);
            if let Some(counts) = counts {
                self.baseline = self.baseline.updated(counts);
            }
            self.idle(&message);
        }
        info!(target: &self.log_target, "Stopping");
        Ok(())
    }

    /// A failed cycle counts as nothing pending.
    fn signal_device(&mut self, counts: Option<Counts>) {
        let baseline = self.baseline;
        match (self.strategy.shape(), counts) {
            (_, Some(Counts::Single(count))) => {
                if count > baseline.primary {
                    debug!(target: &self.log_target, "{} new item(s)", count - baseline.primary);
                    self.device.blink();
                }
                self.device
                    .set_color(if count > 0 { Color::Green } else { Color::Red });
            }
            (_, Some(Counts::Pair { tasks, issues })) => {
                if tasks > baseline.primary {
                    self.device.blink_primary();
                }
                if issues > baseline.secondary {
                    self.device.blink_secondary();
                }
                self.device.set_color(Color::Orange);
            }
            (CountShape::Single, None) => self.device.set_color(Color::Red),
            (CountShape::Pair, None) => self.device.set_color(Color::Orange),
        }
    }

    fn idle(&mut self, message: &str) {
        let mut remaining = self.interval_ticks;
        while remaining > 0 {
            if self.stop.wait_timeout(TICK) {
                return;
            }
            remaining -= 1;
            let seconds = remaining as f64 * TICK.as_secs_f64();
            self.set_status(format!("{} ~ {:.0}", message, seconds));
        }
    }

    /// Runs the session on its own thread.
    pub fn spawn(mut self) -> io::Result<SessionHandle> {
        let stop = self.stop_token();
        let name = self.name.clone();
        let worker = thread::Builder::new()
            .name(format!("session-{}", name))
            .spawn(move || self.run())?;
        Ok(SessionHandle { name, stop, worker })
    }
}

pub struct SessionHandle {
    name: String,
    stop: StopToken,
    worker: thread::JoinHandle<Result<(), FetchError>>,
}
impl SessionHandle {
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn stop(&self) {
        self.stop.stop();
    }
    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }
    pub fn join(self) -> Result<(), FetchError> {
        self.worker
            .join()
            .unwrap_or_else(|_| Err(FetchError::Unclassified("session thread panicked".to_owned())))
    }
}
