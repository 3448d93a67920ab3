//! handheld-control daemon (handheld-ctld)
//!
//! Privileged service owning the embedded controller, the fans and the GPU
//! clock window of a handheld gaming PC.
//!
//! Startup resolves the fans of the running device, starts the utilization
//! sampler, takes over the GPU clock range and then polls fan temperatures,
//! which also drives RPM limit calibration. On SIGINT/SIGTERM every fan and
//! the GPU are handed back to firmware control.

mod services;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{error, info, warn};

use hc_core::constants::paths;
use hc_core::DaemonConfig;
use services::Services;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Set by the signal handler; polled by the main loop
static SHUTDOWN: AtomicBool = AtomicBool::new(false);

// ============================================================================
// CLI
// ============================================================================

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Run { config: PathBuf },
    Help,
    Version,
}

fn parse_args(args: &[String]) -> Result<Command, String> {
    let mut config = PathBuf::from(paths::CONFIG_FILE);
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => return Ok(Command::Help),
            "-v" | "--version" => return Ok(Command::Version),
            "-c" | "--config" => {
                i += 1;
                let path = args.get(i).ok_or("--config requires a path argument")?;
                config = PathBuf::from(path);
            }
            arg => return Err(format!("Unknown argument: {}", arg)),
        }
        i += 1;
    }
    Ok(Command::Run { config })
}

fn print_help() {
    eprintln!("handheld-ctld {} - handheld fan and GPU clock daemon", VERSION);
    eprintln!();
    eprintln!("USAGE:");
    eprintln!("    handheld-ctld [OPTIONS]");
    eprintln!();
    eprintln!("OPTIONS:");
    eprintln!("    -c, --config PATH   Configuration file (default {})", paths::CONFIG_FILE);
    eprintln!("    -v, --version       Print version");
    eprintln!("    -h, --help          Print this help");
    eprintln!();
    eprintln!("ENVIRONMENT:");
    eprintln!("    HC_LOG              Log filter (trace, debug, info, warn, error)");
}

// ============================================================================
// Setup
// ============================================================================

/// journald when systemd is running, stdout otherwise
fn init_logging() -> bool {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let filter = || EnvFilter::try_from_env("HC_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

    if std::path::Path::new("/run/systemd/journal/socket").exists() {
        match tracing_journald::layer() {
            Ok(layer) => {
                tracing_subscriber::registry().with(layer).with(filter()).init();
                return true;
            }
            Err(e) => eprintln!("journald unavailable ({}), logging to stdout", e),
        }
    }
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(filter())
        .init();
    false
}

fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown".to_string());
        let message = if let Some(s) = info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };
        error!(location = %location, "PANIC: {}", message);
        eprintln!("PANIC at {}: {}", location, message);
    }));
}

fn verify_privileges() -> anyhow::Result<()> {
    // SAFETY: geteuid has no preconditions and cannot fail.
    let euid = unsafe { libc::geteuid() };
    if euid != 0 {
        anyhow::bail!("handheld-ctld must run as root (euid={}) for EC and sysfs access", euid);
    }
    Ok(())
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn run(config_path: PathBuf) -> anyhow::Result<()> {
    let journald = init_logging();
    install_panic_hook();

    info!(version = VERSION, journald, "handheld-ctld starting");
    verify_privileges()?;

    let config = DaemonConfig::load(&config_path)?;

    if let Err(e) = ctrlc::set_handler(|| SHUTDOWN.store(true, Ordering::SeqCst)) {
        warn!(error = %e, "Failed to install signal handler");
    }

    let services = Services::start(&config)?;
    info!(
        fans = services.fans.fan_count(),
        gpu = services.gpu.is_some(),
        "Services started"
    );

    services.run(&SHUTDOWN, Duration::from_millis(config.fan_poll_interval_ms.max(1)));

    info!("Shutdown requested");
    services.shutdown();
    Ok(())
}

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = match parse_args(&args) {
        Ok(Command::Help) => {
            print_help();
            return;
        }
        Ok(Command::Version) => {
            println!("handheld-ctld {}", VERSION);
            return;
        }
        Ok(Command::Run { config }) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            print_help();
            std::process::exit(2);
        }
    };

    if let Err(e) = run(config) {
        error!("{:#}", e);
        eprintln!("handheld-ctld: {:#}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_default_config_path() {
        assert_eq!(
            parse_args(&[]).unwrap(),
            Command::Run { config: PathBuf::from(paths::CONFIG_FILE) }
        );
    }

    #[test]
    fn test_config_flag() {
        assert_eq!(
            parse_args(&args(&["--config", "/tmp/hc.json"])).unwrap(),
            Command::Run { config: PathBuf::from("/tmp/hc.json") }
        );
        assert_eq!(
            parse_args(&args(&["-c", "x.json"])).unwrap(),
            Command::Run { config: PathBuf::from("x.json") }
        );
    }

    #[test]
    fn test_help_and_version_win() {
        assert_eq!(parse_args(&args(&["-h", "--bogus"])).unwrap(), Command::Help);
        assert_eq!(parse_args(&args(&["--version"])).unwrap(), Command::Version);
    }

    #[test]
    fn test_bad_arguments() {
        assert!(parse_args(&args(&["-c"])).is_err());
        assert!(parse_args(&args(&["--socket", "/run/x"])).is_err());
    }
}
