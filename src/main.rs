//! Binary entrypoint for the Firewatch CLI.
//!
//! Commands:
//! - `init` - write a starter `config.toml`
//! - `decode <FRAME> [--json]` - decode one frame and print the snapshot
//! - `encode <OP> [--status <HEX>] [--frame <RAW>] [--send]` - encode a command
//! - `watch [--input <PATH|->] [--http] [--serial <PORT>]` - run the monitor
//! - `logs [--limit N] [--category <CAT>]` - print the event log, newest first
//! - `history [--limit N]` - print recorded commands
//! - `probe` - test the controller's `/status` endpoint
//!
//! See the library crate docs for module-level details: `firewatch::`.
use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use log::info;
#[cfg(feature = "http")]
use log::warn;
use tokio::sync::mpsc;

use firewatch::config::{Config, ConfigService};
use firewatch::events::LogCategory;
use firewatch::metrics;
use firewatch::monitor::{
    dispatch_command, start_monitor, EventSink, FanoutSink, LogEventSink, MonitorConfig,
};
use firewatch::protocol::{
    parse_status_byte, splice_status_byte, FrameDecoder, MasterStatus, Operation,
    SlaveState, Snapshot,
};
use firewatch::source;
use firewatch::storage::{CommandLog, EventLog};

#[derive(Parser)]
#[command(name = "firewatch")]
#[command(about = "Status decoder and monitor for networked fire-alarm panels")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init,
    /// Decode a single frame
    Decode {
        /// Raw frame text, e.g. "405F<STX>010000<STX>03<ETX>"
        frame: String,
        /// Print the snapshot as JSON
        #[arg(long)]
        json: bool,
    },
    /// Encode an operator command into a status byte
    Encode {
        /// SYSTEM_RESET, ACKNOWLEDGE, DRILL or SILENCE
        operation: String,
        /// Current master status byte (two hex digits); defaults to all clear
        #[arg(short, long)]
        status: Option<String>,
        /// Raw frame whose status byte should be replaced
        #[arg(short, long)]
        frame: Option<String>,
        /// Also POST the command to the controller
        #[arg(long)]
        send: bool,
    },
    /// Run the monitor until the source ends or Ctrl-C
    Watch {
        /// Read frames from a file, or '-' for stdin
        #[arg(short, long)]
        input: Option<String>,
        /// Poll the controller over HTTP
        #[arg(long)]
        http: bool,
        /// Read frames from a serial port (overrides config)
        #[arg(long)]
        serial: Option<String>,
    },
    /// Show logged events, newest first
    Logs {
        #[arg(short, long, default_value_t = 100)]
        limit: usize,
        /// NORMAL, ALARM, TROUBLE or COMMAND
        #[arg(long)]
        category: Option<String>,
    },
    /// Show recorded commands, newest first
    History {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Probe the controller's /status endpoint
    Probe,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let pre_config = match cli.command {
        Commands::Init => None,
        _ => match Config::load(&cli.config).await {
            Ok(c) => Some(c),
            Err(e) => {
                if std::path::Path::new(&cli.config).exists() {
                    return Err(e);
                }
                None
            }
        },
    };
    init_logging(&pre_config, cli.verbose);
    let config = pre_config.unwrap_or_default();

    match cli.command {
        Commands::Init => {
            Config::create_default(&cli.config).await?;
            println!("Created default configuration at {}", cli.config);
            println!("Edit [panel] ip_address or serial_port, then run `firewatch watch`.");
        }
        Commands::Decode { frame, json } => {
            let decoder = FrameDecoder::new(config.frame.to_markers());
            let snapshot = decoder.decode(Some(&frame));
            if json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                print_snapshot(&snapshot);
            }
        }
        Commands::Encode {
            operation,
            status,
            frame,
            send,
        } => {
            let op: Operation = operation.parse()?;
            let current = match &status {
                Some(hex) => MasterStatus::from_byte(parse_status_byte(hex)?),
                None => MasterStatus::all_clear(),
            };
            let log = CommandLog::open(&config.storage.data_dir)?;
            let record = dispatch_command(&log, op, &current).await?;
            println!("Operation:   {}", record.operation);
            println!("Status byte: {}", record.status_byte);
            println!("New status:  {}", record.new_status);
            if let Some(raw) = frame.as_deref() {
                println!("Frame:       {}", splice_status_byte(Some(raw), &record.status_byte));
            }
            if send {
                send_command(&config, &record).await?;
            }
        }
        Commands::Watch {
            input,
            http,
            serial,
        } => {
            run_watch(config, input, http, serial).await?;
        }
        Commands::Logs { limit, category } => {
            let category = match category.as_deref() {
                Some(c) => Some(
                    LogCategory::parse(c).ok_or_else(|| anyhow!("Unknown log category: {}", c))?,
                ),
                None => None,
            };
            let log = EventLog::open(&config.storage.data_dir)?;
            let counts = log.counts()?;
            println!(
                "Events: {} (alarm {}, trouble {}, normal {}, command {})",
                counts.total(),
                counts.alarm,
                counts.trouble,
                counts.normal,
                counts.command
            );
            for entry in log.recent(limit, category)? {
                println!(
                    "{} {:<7} {}",
                    entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    entry.category,
                    entry.details
                );
            }
        }
        Commands::History { limit } => {
            let log = CommandLog::open(&config.storage.data_dir)?;
            for rec in log.history(limit)? {
                println!(
                    "{} {:<12} {} {:?}",
                    rec.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    rec.operation,
                    rec.status_byte,
                    rec.state
                );
            }
        }
        Commands::Probe => probe(&config).await?,
    }

    Ok(())
}

async fn run_watch(
    config: Config,
    input: Option<String>,
    http: bool,
    serial: Option<String>,
) -> Result<()> {
    info!("Starting Firewatch v{}", env!("CARGO_PKG_VERSION"));
    let markers = config.frame.to_markers();
    let (tx, rx) = mpsc::unbounded_channel::<Option<String>>();

    let mut sinks: Vec<Box<dyn EventSink>> =
        vec![Box::new(EventLog::open(&config.storage.data_dir)?)];
    if config.monitor.log_events {
        sinks.push(Box::new(LogEventSink));
    }
    let monitor = start_monitor(
        MonitorConfig {
            markers: markers.clone(),
            stats_interval: config.monitor.stats_interval(),
        },
        rx,
        Box::new(FanoutSink(sinks)),
    );

    // Kept alive for the poller's lifetime.
    let service = ConfigService::new(config.clone());
    let serial_port = serial.or_else(|| config.panel.serial_port.clone());
    match (input, http, serial_port) {
        (Some(path), _, _) => {
            if path == "-" {
                source::spawn_reader(tokio::io::stdin(), &markers, tx);
            } else {
                let file = tokio::fs::File::open(&path)
                    .await
                    .map_err(|e| anyhow!("Failed to open {}: {}", path, e))?;
                source::spawn_reader(file, &markers, tx);
            }
        }
        (None, true, _) => start_http(&service, tx)?,
        (None, false, Some(port)) => start_serial(&port, config.panel.baud_rate, &markers, tx)?,
        (None, false, None) => {
            return Err(anyhow!(
                "No frame source: use --input, --http, --serial or set panel.serial_port"
            ))
        }
    }

    let mut updates = monitor.subscribe();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Interrupted; shutting down"),
        _ = async {
            while updates.changed().await.is_ok() {
                let snap = updates.borrow().clone();
                log::debug!(
                    "Snapshot: {} online, {} alarm, {} trouble",
                    snap.online_count(),
                    snap.slaves_in(SlaveState::Alarm).count(),
                    snap.slaves_in(SlaveState::Trouble).count()
                );
            }
        } => info!("Frame source finished"),
    }

    let last = monitor.shutdown().await?;
    let m = metrics::snapshot();
    info!(
        "Processed {} frame(s): {} rejected, {} segment(s) discarded, {} event(s), {} byte(s)",
        m.frames_received, m.frames_rejected, m.segments_discarded, m.events_emitted, m.bytes_received
    );
    print_snapshot(&last);
    Ok(())
}

#[cfg(feature = "http")]
fn start_http(service: &ConfigService, tx: mpsc::UnboundedSender<Option<String>>) -> Result<()> {
    source::http::spawn_poller(service.subscribe(), tx);
    Ok(())
}

#[cfg(not(feature = "http"))]
fn start_http(_service: &ConfigService, _tx: mpsc::UnboundedSender<Option<String>>) -> Result<()> {
    Err(anyhow!("HTTP support not compiled in (enable feature \"http\")"))
}

#[cfg(feature = "serial")]
fn start_serial(
    port: &str,
    baud: u32,
    markers: &firewatch::protocol::FrameMarkers,
    tx: mpsc::UnboundedSender<Option<String>>,
) -> Result<()> {
    source::serial::spawn_serial_reader(port, baud, markers, tx)?;
    Ok(())
}

#[cfg(not(feature = "serial"))]
fn start_serial(
    _port: &str,
    _baud: u32,
    _markers: &firewatch::protocol::FrameMarkers,
    _tx: mpsc::UnboundedSender<Option<String>>,
) -> Result<()> {
    Err(anyhow!("Serial support not compiled in (enable feature \"serial\")"))
}

#[cfg(feature = "http")]
async fn send_command(config: &Config, record: &firewatch::protocol::CommandRecord) -> Result<()> {
    use firewatch::monitor::CommandSink;
    let sink = source::http::HttpCommandSink::new(&config.panel)?;
    sink.submit(record).await?;
    println!("Sent to {}", config.panel.base_url());
    Ok(())
}

#[cfg(not(feature = "http"))]
async fn send_command(_config: &Config, _record: &firewatch::protocol::CommandRecord) -> Result<()> {
    Err(anyhow!("HTTP support not compiled in (enable feature \"http\")"))
}

#[cfg(feature = "http")]
async fn probe(config: &Config) -> Result<()> {
    let client = source::http::PanelClient::new(&config.panel)?;
    let report = client.probe().await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.success {
        warn!("Controller at {} did not answer", client.base_url());
    }
    Ok(())
}

#[cfg(not(feature = "http"))]
async fn probe(_config: &Config) -> Result<()> {
    Err(anyhow!("HTTP support not compiled in (enable feature \"http\")"))
}

fn print_snapshot(snapshot: &Snapshot) {
    match &snapshot.master {
        Some(m) => println!("Master: {}", m),
        None => println!("Master: unknown"),
    }
    println!("Online slaves: {}", snapshot.online_count());
    for slave in snapshot.slaves.values().filter(|s| s.online) {
        let mut line = format!("  {:>2} {}", slave.address, slave.status);
        if !slave.alarm_zones.is_empty() {
            line.push_str(&format!(" alarm zones [{}]", slave.alarm_zones));
        }
        if !slave.trouble_zones.is_empty() {
            line.push_str(&format!(" trouble zones [{}]", slave.trouble_zones));
        }
        if slave.bell_active {
            line.push_str(" bell");
        }
        println!("{}", line);
    }
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides the configured level
    let base_level = match verbosity {
        0 => config
            .as_ref()
            .and_then(|c| c.logging.level.parse().ok())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    let file = config.as_ref().and_then(|c| c.logging.file.clone()).and_then(|path| {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .ok()
    });
    match file {
        Some(f) => {
            let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
            // Mirror to the console only when someone is watching it.
            let is_tty = atty::is(atty::Stream::Stderr);
            builder.format(move |fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                let line = format!("{} [{}] {}", ts, record.level(), record.args());
                if let Ok(mut guard) = write_mutex.lock() {
                    let _ = writeln!(guard, "{}", line);
                }
                if is_tty {
                    writeln!(fmt, "{}", line)
                } else {
                    Ok(())
                }
            });
        }
        None => {
            builder.format(|fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
            });
        }
    }
    let _ = builder.try_init();
}
