//! lamco-x11-screen - X11 screen monitor
//!
//! Opens the display, takes part in the clipboard protocol and logs what
//! happens: clipboard grabs (with the new content), screen saver changes and
//! a periodic cursor heartbeat. Runs until SIGINT/SIGTERM.

use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{Receiver, Sender};
use nix::sys::signal::{SigSet, Signal};
use tracing::{debug, error, info, trace, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use x11rb::protocol::xproto::EventMask;
use x11rb::protocol::Event;

use lamco_x11_screen::clipboard::{Clipboard, ClipboardFormat, ClipboardId, MemoryClipboard};
use lamco_x11_screen::config::{Config, LoggingConfig};
use lamco_x11_screen::screen::{Screen, ScreenEventHandler, ScreenReceiver, X11Backend};
use lamco_x11_screen::timer::Job;

/// Command-line arguments for lamco-x11-screen
#[derive(Parser, Debug)]
#[command(name = "lamco-x11-screen")]
#[command(version, about = "X11 screen monitor", long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/lamco-x11-screen/config.toml")]
    pub config: String,

    /// X display to open (overrides config and DISPLAY)
    #[arg(short, long, env = "LAMCO_X11_DISPLAY")]
    pub display: Option<String>,

    /// Verbose logging (can be specified multiple times; overrides
    /// `[logging] level`)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log format (json|pretty|compact)
    #[arg(long, default_value = "pretty")]
    pub log_format: String,

    /// Write logs to file (in addition to stdout; overrides `[logging] log_dir`)
    #[arg(long)]
    pub log_file: Option<String>,
}

enum WorkerMessage {
    Grabbed(ClipboardId),
    Shutdown,
}

/// Forwards clipboard grabs to the reader thread
struct MonitorReceiver {
    grabs: Sender<WorkerMessage>,
}

impl ScreenReceiver for MonitorReceiver {
    fn on_grab_clipboard(&self, id: ClipboardId) {
        // read on another thread; the event loop must keep answering
        let _ = self.grabs.send(WorkerMessage::Grabbed(id));
    }

    fn on_error(&self) {
        error!("Lost the X display");
    }
}

struct MonitorHandler;

impl ScreenEventHandler for MonitorHandler {
    fn on_event(&self, event: &Event) {
        trace!("Unhandled event: {:?}", event);
    }

    fn on_pre_dispatch(&self, _event: &Event) -> bool {
        false
    }

    fn on_screensaver(&self, activated: bool) {
        if activated {
            info!("Screen saver activated");
        } else {
            info!("Screen saver deactivated");
        }
    }
}

fn main() {
    let args = Args::parse();

    // read before logging starts so [logging] can supply the defaults
    let loaded = Config::load(&args.config);
    let logging = loaded
        .as_ref()
        .map(|config| config.logging.clone())
        .unwrap_or_default();

    if let Err(e) = init_logging(&args, &logging) {
        eprintln!("Failed to initialize logging: {:#}", e);
        std::process::exit(1);
    }

    if let Err(e) = run(args, loaded) {
        eprintln!("{}", lamco_x11_screen::utils::format_user_error(&e));
        std::process::exit(1);
    }
}

fn run(args: Args, loaded: Result<Config>) -> Result<()> {
    info!("════════════════════════════════════════════════════════");
    info!("  lamco-x11-screen v{}", env!("CARGO_PKG_VERSION"));
    info!("  Built: {} {}", env!("BUILD_DATE"), env!("BUILD_TIME"));
    info!("  Commit: {}", env!("GIT_HASH"));
    info!("  Profile: {}", if cfg!(debug_assertions) { "debug" } else { "release" });
    info!("════════════════════════════════════════════════════════");

    lamco_x11_screen::utils::log_startup_diagnostics();

    let config = loaded.unwrap_or_else(|e| {
        warn!("Failed to load config: {:#}, using defaults", e);
        Config::default_config()
    });
    let config = config.with_overrides(args.display.clone());
    debug!("Config: {:?}", config);

    // Block the signals before any thread exists so every thread inherits the mask
    let mut signals = SigSet::empty();
    signals.add(Signal::SIGINT);
    signals.add(Signal::SIGTERM);
    signals
        .thread_block()
        .context("Failed to block termination signals")?;

    let (grab_tx, grab_rx) = crossbeam_channel::unbounded();
    let screen = Arc::new(
        Screen::new(
            Arc::new(MonitorReceiver {
                grabs: grab_tx.clone(),
            }),
            Arc::new(MonitorHandler),
            Box::new(X11Backend::new(&config)),
            config.clone(),
        )
        .context("Failed to create screen")?,
    );

    screen.open()?;
    let shape = screen.shape();
    info!(
        "Display open: {}x{} at {},{}",
        shape.width, shape.height, shape.x, shape.y
    );

    let window = {
        let lock = screen.display_lock();
        let display = lock.display().context("Display connection lost")?;
        display.create_window(EventMask::PROPERTY_CHANGE)?
    };
    screen.set_window(Some(window))?;
    screen.open_screensaver(config.screensaver.notify);

    let heartbeat = heartbeat_job(Arc::downgrade(&screen));
    screen.add_timer(
        &heartbeat,
        Duration::from_millis(config.monitor.heartbeat_interval_ms),
    )?;

    let reader = {
        let screen = Arc::clone(&screen);
        thread::Builder::new()
            .name("clipboard-reader".into())
            .spawn(move || read_grabs(&screen, grab_rx))
            .context("Failed to spawn clipboard reader")?
    };

    {
        let screen = Arc::downgrade(&screen);
        thread::Builder::new()
            .name("signal-wait".into())
            .spawn(move || match signals.wait() {
                Ok(signal) => {
                    info!("Received {:?}, shutting down", signal);
                    if let Some(screen) = screen.upgrade() {
                        screen.exit_main_loop();
                    }
                }
                Err(e) => warn!("Signal wait failed: {}", e),
            })
            .context("Failed to spawn signal thread")?;
    }

    info!("Monitoring display");
    let result = screen.main_loop();

    screen.remove_timer(&heartbeat);
    let _ = grab_tx.send(WorkerMessage::Shutdown);
    if reader.join().is_err() {
        warn!("Clipboard reader panicked");
    }

    screen.close_screensaver();
    screen.set_window(None).ok();
    {
        let lock = screen.display_lock();
        if let Some(display) = lock.display() {
            if let Err(e) = display.destroy_window(window) {
                debug!("Failed to destroy clipboard window: {}", e);
            }
        }
    }
    screen.close();

    let exit = result?;
    info!("Event loop finished: {:?}", exit);
    Ok(())
}

fn heartbeat_job(screen: Weak<Screen>) -> Arc<dyn Job> {
    Arc::new(move || {
        if let Some(screen) = screen.upgrade() {
            let (x, y) = screen.cursor_pos();
            info!("Cursor at {},{}", x, y);
        }
    })
}

fn read_grabs(screen: &Screen, grabs: Receiver<WorkerMessage>) {
    for message in grabs {
        let id = match message {
            WorkerMessage::Grabbed(id) => id,
            WorkerMessage::Shutdown => break,
        };

        let mut content = MemoryClipboard::new();
        if !screen.get_clipboard(id, &mut content) {
            warn!("Could not read {} after it was grabbed", id);
            continue;
        }

        match content.get(ClipboardFormat::Text) {
            Some(text) => info!(
                "{} changed: {} bytes of text ({} formats)",
                id,
                text.len(),
                content.formats().len()
            ),
            None if content.is_empty() => info!("{} changed: empty", id),
            None => info!("{} changed: {} formats, no text", id, content.formats().len()),
        }
    }
}

/// Level and file for the subscriber: CLI flags first, then `[logging]`
fn log_settings(args: &Args, logging: &LoggingConfig) -> (String, Option<PathBuf>) {
    let level = match args.verbose {
        0 => logging.level.clone(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    };
    let file = match &args.log_file {
        Some(path) => Some(PathBuf::from(path)),
        None => logging
            .log_dir
            .as_ref()
            .map(|dir| dir.join("lamco-x11-screen.log")),
    };
    (level, file)
}

fn init_logging(args: &Args, logging: &LoggingConfig) -> Result<()> {
    use std::fs::File;

    let (log_level, log_file) = log_settings(args, logging);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        // x11rb logs every request at trace; keep it quieter than our own crate
        tracing_subscriber::EnvFilter::new(format!(
            "lamco_x11_screen={level},x11rb=info,warn",
            level = log_level
        ))
    });

    // If log file is specified, write to both stdout and file
    if let Some(log_file_path) = &log_file {
        if let Some(dir) = log_file_path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
        }
        let file = File::create(log_file_path).with_context(|| {
            format!("Failed to create log file: {}", log_file_path.display())
        })?;

        match args.log_format.as_str() {
            "json" => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(
                        tracing_subscriber::fmt::layer()
                            .json()
                            .with_writer(std::io::stdout),
                    )
                    .with(
                        tracing_subscriber::fmt::layer()
                            .json()
                            .with_writer(file)
                            .with_ansi(false),
                    )
                    .init();
            }
            "compact" => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(
                        tracing_subscriber::fmt::layer()
                            .compact()
                            .with_writer(std::io::stdout),
                    )
                    .with(
                        tracing_subscriber::fmt::layer()
                            .compact()
                            .with_writer(file)
                            .with_ansi(false),
                    )
                    .init();
            }
            _ => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(
                        tracing_subscriber::fmt::layer()
                            .pretty()
                            .with_writer(std::io::stdout),
                    )
                    .with(
                        tracing_subscriber::fmt::layer()
                            .with_writer(file)
                            .with_ansi(false),
                    )
                    .init();
            }
        }
        info!("Logging to file: {}", log_file_path.display());
    } else {
        // Stdout only
        match args.log_format.as_str() {
            "json" => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(tracing_subscriber::fmt::layer().json())
                    .init();
            }
            "compact" => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(tracing_subscriber::fmt::layer().compact())
                    .init();
            }
            _ => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(tracing_subscriber::fmt::layer().pretty())
                    .init();
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        Args::parse_from(std::iter::once("lamco-x11-screen").chain(extra.iter().copied()))
    }

    #[test]
    fn test_logging_section_supplies_defaults() {
        let logging = LoggingConfig {
            level: "warn".into(),
            log_dir: Some(PathBuf::from("/var/log/lamco")),
        };
        let (level, file) = log_settings(&args(&[]), &logging);
        assert_eq!(level, "warn");
        assert_eq!(file, Some(PathBuf::from("/var/log/lamco/lamco-x11-screen.log")));
    }

    #[test]
    fn test_cli_flags_override_logging_section() {
        let logging = LoggingConfig {
            level: "warn".into(),
            log_dir: Some(PathBuf::from("/var/log/lamco")),
        };
        let (level, file) = log_settings(&args(&["-vv", "--log-file", "/tmp/x.log"]), &logging);
        assert_eq!(level, "trace");
        assert_eq!(file, Some(PathBuf::from("/tmp/x.log")));

        let (level, file) = log_settings(&args(&[]), &LoggingConfig::default());
        assert_eq!(level, "info");
        assert_eq!(file, None);
    }
}
