//! CLI tool for Mousho

#[cfg(feature = "cli")]
use clap::{Parser, Subcommand, ValueEnum};
#[cfg(feature = "cli")]
use mousho::{
    BatteryMonitor, BatterySnapshot, BatterySource, Config, DesktopNotifier, EventLog, LogNotifier,
    MonitorOptions, Notifier, OverheatAlerter, OverheatEvent, ReplaySource, SettingsStore,
    SysfsBatterySource, TelemetryListener, WidgetFile,
};
#[cfg(feature = "cli")]
use std::path::PathBuf;
#[cfg(feature = "cli")]
use std::sync::Arc;
#[cfg(feature = "cli")]
use std::time::Duration;

#[cfg(feature = "cli")]
#[derive(Parser)]
#[command(name = "mousho")]
#[command(about = "Mousho: battery temperature monitor with overheat alerts", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file (default: ~/.config/mousho/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Output format (json or text)
    #[arg(short, long, default_value = "text", global = true)]
    format: String,
}

#[cfg(feature = "cli")]
#[derive(Subcommand)]
enum Commands {
    /// Show the current battery state (default)
    Status,
    /// Monitor the battery and alert on every overheat
    Watch {
        /// Replay readings from a script instead of the battery
        #[arg(long)]
        replay: Option<PathBuf>,
        /// Poll interval in seconds (overrides the config file)
        #[arg(short, long)]
        interval: Option<f64>,
    },
    /// Show overheat history (last 24 hours by default)
    Events {
        /// Only events since local midnight
        #[arg(long)]
        today: bool,
    },
    /// Show or change user settings
    Settings {
        #[command(subcommand)]
        action: Option<SettingsAction>,
    },
}

#[cfg(feature = "cli")]
#[derive(Subcommand)]
enum SettingsAction {
    /// Show current settings
    Show,
    /// Set the overheat threshold (30.0 - 50.0 °C)
    Threshold {
        /// Threshold in degrees Celsius
        celsius: f32,
    },
    /// Turn overheat alerts on or off
    Notifications {
        #[arg(value_enum)]
        state: Toggle,
    },
}

#[cfg(feature = "cli")]
#[derive(Clone, Copy, ValueEnum)]
enum Toggle {
    On,
    Off,
}

#[cfg(feature = "cli")]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    env_logger::init();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let settings = SettingsStore::open(config.settings_path()?)?;
    let json = cli.format == "json";

    match cli.command {
        Some(Commands::Watch { replay, interval }) => {
            let poll_interval = match interval {
                Some(secs) => parse_interval(secs)?,
                None => config.general.poll_interval(),
            };
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(run_watch(config, settings, replay, poll_interval, json))?;
        }

        Some(Commands::Events { today }) => {
            let log = match config.events_path()? {
                Some(path) => EventLog::load(&path, config.events.retention())?,
                None => EventLog::new(config.events.retention()),
            };
            let now = chrono::Utc::now();
            let events = if today {
                log.today(now, &chrono::Local)
            } else {
                log.recent(now)
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&events)?);
            } else {
                print_events(&events, if today { "Today" } else { "Last 24 Hours" });
            }
        }

        Some(Commands::Settings { action }) => {
            match action {
                Some(SettingsAction::Threshold { celsius }) => settings.set_threshold(celsius)?,
                Some(SettingsAction::Notifications { state }) => {
                    settings.set_notification_enabled(matches!(state, Toggle::On))?
                }
                Some(SettingsAction::Show) | None => {}
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&settings.current())?);
            } else {
                print_settings(&settings);
            }
        }

        Some(Commands::Status) | None => {
            let mut battery = open_battery(&config)?;
            let extras = battery.read();
            let snapshot = BatterySnapshot::from_extras(
                &extras,
                settings.current().overheat_threshold,
                chrono::Utc::now(),
            );
            if json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                print_status(battery.name(), &snapshot);
            }
        }
    }

    Ok(())
}

#[cfg(feature = "cli")]
fn parse_interval(secs: f64) -> Result<Duration, String> {
    match Duration::try_from_secs_f64(secs) {
        Ok(interval) if !interval.is_zero() => Ok(interval),
        Ok(_) => Err(format!("invalid interval: {} (must be greater than zero)", secs)),
        Err(e) => Err(format!("invalid interval: {} ({})", secs, e)),
    }
}

#[cfg(feature = "cli")]
fn open_battery(config: &Config) -> mousho::Result<SysfsBatterySource> {
    let root = &config.general.power_supply_root;
    match &config.general.battery {
        Some(name) => SysfsBatterySource::open(root, name),
        None => SysfsBatterySource::discover_in(root),
    }
}

#[cfg(feature = "cli")]
async fn run_watch(
    config: Config,
    settings: SettingsStore,
    replay: Option<PathBuf>,
    poll_interval: Duration,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let options = MonitorOptions {
        retention: config.events.retention(),
        events_path: config.events_path()?,
    };
    let monitor = Arc::new(BatteryMonitor::new(settings.subscribe(), options));

    let notifier: Arc<dyn Notifier> = match config.notify.backend.as_str() {
        "log" => Arc::new(LogNotifier),
        _ => Arc::new(DesktopNotifier::new(
            &config.notify.command,
            &config.notify.urgency,
        )),
    };
    monitor.subscribe(Arc::new(OverheatAlerter::new(notifier, settings.subscribe())));

    let listener = TelemetryListener::new();
    let mut registration = match replay {
        Some(path) => listener.register(
            ReplaySource::from_file(&path)?,
            Arc::clone(&monitor),
            poll_interval,
        )?,
        None => listener.register(open_battery(&config)?, Arc::clone(&monitor), poll_interval)?,
    };

    let widget = config
        .widget_path()?
        .map(|path| tokio::spawn(WidgetFile::new(path, monitor.watch()).run()));

    let mut settings_watcher = settings.watch_file()?;
    let mut updates = monitor.watch();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut failure = None;

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                log::info!("interrupted, shutting down");
                break;
            }
            stopped = registration.stopped() => {
                if let Err(e) = stopped {
                    log::error!("{}", e);
                    failure = Some(e);
                }
                break;
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let latest = *updates.borrow_and_update();
                if let Some(snapshot) = latest {
                    if json {
                        println!("{}", serde_json::to_string(&snapshot)?);
                    } else {
                        print_snapshot_line(&snapshot);
                    }
                }
            }
            Some(()) = settings_watcher.changed() => {
                if let Err(e) = settings.reload() {
                    log::warn!("failed to reload settings: {}", e);
                }
            }
        }
    }

    registration.unregister().await;
    // Last sender goes away with the monitor, which ends the widget task
    drop(monitor);
    if let Some(widget) = widget {
        match widget.await {
            Ok(Err(e)) => log::warn!("widget file: {}", e),
            Err(e) => log::warn!("widget task: {}", e),
            Ok(Ok(())) => {}
        }
    }

    match failure {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

#[cfg(feature = "cli")]
fn print_status(battery: &str, snapshot: &BatterySnapshot) {
    println!("=== Battery Status ({}) ===", battery);
    print!("{}", mousho::widget::render(Some(snapshot)));
    println!("Threshold: {:.1}°C", snapshot.threshold_c);
    println!("Status: {}", snapshot.status);
    println!("Health: {}", snapshot.health);
    println!(
        "Plugged In: {} ({})",
        if snapshot.is_plugged_in { "Yes" } else { "No" },
        snapshot.plug_type
    );
    println!("Voltage: {:.2}V", snapshot.voltage_v);
}

#[cfg(feature = "cli")]
fn print_snapshot_line(snapshot: &BatterySnapshot) {
    println!(
        "[{}] {:.1}°C {} | {} | {}",
        snapshot
            .captured_at
            .with_timezone(&chrono::Local)
            .format("%H:%M:%S"),
        snapshot.temperature_c,
        if snapshot.is_overheated {
            "OVERHEATED"
        } else {
            "ok"
        },
        snapshot.status,
        snapshot.plug_type
    );
}

#[cfg(feature = "cli")]
fn print_events(events: &[OverheatEvent], title: &str) {
    println!("=== Overheat Events: {} ===", title);
    if events.is_empty() {
        println!("None");
        return;
    }
    for event in events {
        println!(
            "{}  {:.1}°C",
            event
                .timestamp
                .with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M:%S"),
            event.temperature_c
        );
    }
    println!("Total: {}", events.len());
}

#[cfg(feature = "cli")]
fn print_settings(settings: &SettingsStore) {
    let current = settings.current();
    println!("=== Settings ===");
    println!(
        "Notifications: {}",
        if current.notification_enabled {
            "on"
        } else {
            "off"
        }
    );
    println!("Overheat Threshold: {:.1}°C", current.overheat_threshold);
    println!("File: {}", settings.path().display());
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("CLI features not enabled. Please compile with --features cli");
    std::process::exit(1);
}

#[cfg(all(test, feature = "cli"))]
mod tests {
    use super::*;

    #[test]
    fn test_parse_interval() {
        assert_eq!(parse_interval(0.5).unwrap(), Duration::from_millis(500));
        assert!(parse_interval(0.0).is_err());
        assert!(parse_interval(-1.0).is_err());
        assert!(parse_interval(f64::NAN).is_err());
        assert!(parse_interval(1e20).is_err());
    }
}
