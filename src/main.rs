mod config;
mod devices;
mod hub;
mod session;
mod status;
mod strategies;

use log::{debug, error, info};
use signal::{trap::Trap, Signal};
use std::time::{Duration, Instant};

fn main() {
    pretty_env_logger::init();

    let config_file = match std::env::args().nth(1) {
        Some(config_file) => config_file,
        None => {
            error!(target: "Unreadblink", "Usage: unreadblink <config.json>");
            std::process::exit(2);
        }
    };

    info!(target: "Unreadblink", "Parsing configuration file");
    let config = match config::ConfigContainer::from_file(&config_file) {
        Ok(config) => config,
        Err(err) => {
            error!(target: "Unreadblink", "Failed to load configuration file: {}\n{:#}", &config_file, err);
            std::process::exit(1);
        }
    };
    let supervisor = match hub::Supervisor::from_config(&config) {
        Ok(supervisor) => supervisor,
        Err(err) => {
            error!(target: "Unreadblink", "{:#}", err);
            std::process::exit(1);
        }
    };

    #[cfg(target_os = "linux")]
    {
        debug!(target: "Unreadblink", "Registering Signal traps (INT, TERM)");
        let trap = Trap::trap(&[Signal::SIGINT, Signal::SIGTERM]);
        let stop_token = supervisor.get_stop_sender();
        debug!(target: "Unreadblink", "Starting signal observer thread");
        std::thread::spawn(move || loop {
            if let Some(Signal::SIGINT) | Some(Signal::SIGTERM) =
                trap.wait(Instant::now() + Duration::from_millis(50))
            {
                info!(target: "Unreadblink", "Received termination signal");
                info!(target: "Unreadblink", "Initiating shutdown");
                stop_token.stop();
                return;
            }
        });
    }

    if let Err(err) = supervisor.run() {
        error!(target: "Unreadblink", "{:#}", err);
        std::process::exit(1);
    }
}
