// tci test application -- CLI tool for exercising a TCI server (ExpertSDR2,
// ExpertSDR3 or compatible) through tci-client.
//
// Usage:
//   tci-test-app commands
//   tci-test-app --uri ws://192.168.1.50:40001 info
//   tci-test-app dump
//   tci-test-app get VFO --rx 0 --channel 0
//   tci-test-app set VFO 14074000 --rx 0 --channel 0
//   tci-test-app set TRX true tci --rx 0
//   tci-test-app monitor --duration 30
//   tci-test-app audio --rx 0 --duration 10
//
// Set RUST_LOG (e.g. RUST_LOG=tci_client=trace) to see protocol traffic.

use std::io::{self, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio::sync::{broadcast, mpsc};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use tci_client::builder::DEFAULT_URI;
use tci_client::{
    Action, BoxError, COMMANDS, DataPacket, Listener, ParamCount, StreamType, TciEvent, Value,
    data_fn, lookup,
};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// tci test application -- talks to a TCI server from the command line.
#[derive(Parser)]
#[command(name = "tci-test-app", version, about)]
struct Cli {
    /// WebSocket URI of the TCI server.
    #[arg(long, default_value = DEFAULT_URI)]
    uri: String,

    /// Seconds to wait for the WebSocket handshake.
    #[arg(long, default_value_t = 3)]
    connect_timeout: u64,

    /// Seconds to wait for the server's READY notification.
    #[arg(long, default_value_t = 3)]
    ready_timeout: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List every command in the registry (no connection needed).
    Commands,

    /// Show device and protocol information.
    Info,

    /// Print the full parameter cache as JSON once READY is received.
    Dump,

    /// Print the cached value of one parameter.
    Get {
        /// Command name (case-insensitive), e.g. VFO or DDS.
        name: String,
        /// Receiver index, for receiver- or channel-scoped commands.
        #[arg(long)]
        rx: Option<u32>,
        /// Channel index, for channel-scoped commands.
        #[arg(long)]
        channel: Option<u32>,
    },

    /// Send the write form of a command and report the server's echo.
    Set {
        /// Command name (case-insensitive), e.g. VOLUME or VFO.
        name: String,
        /// Values, coerced like inbound tokens (int, float, true/false, string).
        values: Vec<String>,
        #[arg(long)]
        rx: Option<u32>,
        #[arg(long)]
        channel: Option<u32>,
    },

    /// Print every event until Ctrl-C or the duration elapses.
    Monitor {
        /// Duration in seconds (0 = until Ctrl-C).
        #[arg(long, default_value_t = 0)]
        duration: u64,
    },

    /// Start RX audio and show a live level meter.
    Audio {
        #[arg(long, default_value_t = 0)]
        rx: u32,
        /// Duration in seconds (0 = until Ctrl-C).
        #[arg(long, default_value_t = 10)]
        duration: u64,
    },
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

async fn connect(cli: &Cli) -> Result<Listener> {
    Listener::builder()
        .uri(&cli.uri)
        .connect_timeout(Duration::from_secs(cli.connect_timeout))
        .ready_timeout(Duration::from_secs(cli.ready_timeout))
        .connect()
        .await
        .with_context(|| format!("failed to connect to {}", cli.uri))
}

/// Remaining time until `deadline`, or `None` once it has passed.
fn remaining(deadline: Option<Instant>, cap: Duration) -> Option<Duration> {
    match deadline {
        Some(dl) => {
            let left = dl.saturating_duration_since(Instant::now());
            (!left.is_zero()).then(|| left.min(cap))
        }
        None => Some(cap),
    }
}

fn deadline(duration_secs: u64) -> Option<Instant> {
    (duration_secs > 0).then(|| Instant::now() + Duration::from_secs(duration_secs))
}

fn format_params(params: ParamCount) -> String {
    match params {
        ParamCount::Fixed(n) => n.to_string(),
        ParamCount::Variable => "var".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn cmd_commands() -> Result<()> {
    println!(
        "{:<28} {:>4} {:>5} {:>5} {:>7} {:>6}",
        "Command", "Read", "Write", "Scope", "Values", "Opt"
    );
    println!("{}", "-".repeat(60));
    for spec in COMMANDS {
        let scope = match (spec.has_rx, spec.has_sub_rx) {
            (_, true) => "ch",
            (true, false) => "rx",
            (false, false) => "-",
        };
        println!(
            "{:<28} {:>4} {:>5} {:>5} {:>7} {:>6}",
            spec.name,
            if spec.readable { "yes" } else { "-" },
            if spec.writeable { "yes" } else { "-" },
            scope,
            format_params(spec.params),
            spec.optional_values,
        );
    }
    println!();
    println!("{} command(s).", COMMANDS.len());
    Ok(())
}

async fn cmd_info(listener: &Listener) -> Result<()> {
    println!("Endpoint:      {}", listener.endpoint());
    for (label, name) in [
        ("Protocol", "PROTOCOL"),
        ("Device", "DEVICE"),
        ("Receive only", "RECEIVE_ONLY"),
        ("Receivers", "TRX_COUNT"),
        ("Channels", "CHANNELS_COUNT"),
        ("VFO limits", "VFO_LIMITS"),
        ("IF limits", "IF_LIMITS"),
        ("Modulations", "MODULATIONS_LIST"),
    ] {
        let value = listener.get(name, None, None).await?;
        let shown = value.map_or_else(|| "(not reported)".to_string(), |v| v.to_string());
        println!("{:<14} {}", format!("{label}:"), shown);
    }

    let store = listener.store().await;
    for (rx, params) in &store.receivers {
        let dds = params
            .direct
            .get("DDS")
            .map_or_else(|| "?".to_string(), |v| v.to_string());
        let modulation = params
            .direct
            .get("MODULATION")
            .map_or_else(|| "?".to_string(), |v| v.to_string());
        println!("RX{rx}: DDS {dds} Hz, {modulation}");
        for (channel, values) in &params.channels {
            if let Some(vfo) = values.get("VFO") {
                println!("  ch{channel}: VFO {vfo} Hz");
            }
        }
    }
    Ok(())
}

async fn cmd_dump(listener: &Listener) -> Result<()> {
    let snapshot = listener.snapshot().await;
    let json = serde_json::to_string_pretty(&snapshot).context("failed to serialize cache")?;
    println!("{json}");
    Ok(())
}

async fn cmd_get(listener: &Listener, name: &str, rx: Option<u32>, channel: Option<u32>) -> Result<()> {
    match listener.get(name, rx, channel).await? {
        Some(value) => println!("{value}"),
        None => println!("{}: no value cached", name.to_uppercase()),
    }
    Ok(())
}

async fn cmd_set(
    listener: &Listener,
    name: &str,
    values: &[String],
    rx: Option<u32>,
    channel: Option<u32>,
) -> Result<()> {
    let Some(spec) = lookup(name) else {
        bail!("unknown command {name:?}; run `tci-test-app commands` for the list");
    };
    let values: Vec<Value> = values.iter().map(|v| tci_core::coerce(v)).collect();
    let mut events = listener.subscribe();

    listener
        .send_command(spec.name, Action::Write, rx, channel, &values)
        .await?;
    println!("Sent {} write.", spec.name);

    // Servers echo accepted changes; wait briefly for it.
    let echoed = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match events.recv().await {
                Ok(TciEvent::Param(event)) if event.name == spec.name && event.rx == rx => {
                    return Some(event);
                }
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .await;

    match echoed {
        Ok(Some(event)) => println!("Server confirmed: {event}"),
        _ => println!("No confirmation from the server (the value may be out of range)."),
    }
    Ok(())
}

async fn cmd_monitor(listener: &Listener, duration_secs: u64) -> Result<()> {
    let mut event_rx = listener.subscribe();

    println!("Monitoring TCI events (Ctrl-C to stop)...");
    let deadline = deadline(duration_secs);

    loop {
        let Some(timeout) = remaining(deadline, Duration::from_secs(3600)) else {
            println!("Monitor duration elapsed.");
            break;
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            received = tokio::time::timeout(timeout, event_rx.recv()) => match received {
                Ok(Ok(TciEvent::Param(event))) => println!("[param] {event}"),
                Ok(Ok(TciEvent::Disconnected { error })) => {
                    println!("[disconnected] {}", error.as_deref().unwrap_or("closed"));
                    break;
                }
                Ok(Ok(event)) => println!("[event] {event:?}"),
                Ok(Err(broadcast::error::RecvError::Lagged(n))) => {
                    println!("[warning] missed {n} events (consumer too slow)");
                }
                Ok(Err(broadcast::error::RecvError::Closed)) => {
                    println!("Event channel closed.");
                    break;
                }
                Err(_) => {
                    if deadline.is_some() {
                        println!("Monitor duration elapsed.");
                    }
                    break;
                }
            }
        }
    }

    Ok(())
}

async fn cmd_audio(listener: &Listener, rx: u32, duration_secs: u64) -> Result<()> {
    let (packet_tx, mut packet_rx) = mpsc::unbounded_channel::<Arc<DataPacket>>();
    let callback = data_fn(move |packet: Arc<DataPacket>| {
        let packet_tx = packet_tx.clone();
        async move {
            if packet.rx == rx {
                packet_tx.send(packet)?;
            }
            Ok::<(), BoxError>(())
        }
    });
    listener.add_data_listener(StreamType::RxAudio, callback.clone());

    listener
        .send_command("AUDIO_START", Action::Write, Some(rx), None, &[])
        .await
        .context("failed to start RX audio")?;

    println!("Starting audio monitor: receiver={rx}");
    println!("Press Ctrl-C to stop.");
    println!();

    let deadline = deadline(duration_secs);
    let mut meter = LevelMeter::default();

    loop {
        let Some(timeout) = remaining(deadline, Duration::from_millis(100)) else {
            println!("\nMonitor duration elapsed.");
            break;
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            received = tokio::time::timeout(timeout, packet_rx.recv()) => match received {
                Ok(Some(packet)) => {
                    let samples = match packet.samples_f32() {
                        Ok(samples) => samples,
                        Err(e) => {
                            tracing::warn!(error = %e, "Skipping undecodable audio packet");
                            continue;
                        }
                    };
                    meter.accumulate(&samples, packet.channels.max(1) as usize, packet.sample_rate);
                    if meter.due() {
                        meter.display();
                    }
                }
                Ok(None) => {
                    println!("\nAudio stream closed.");
                    break;
                }
                Err(_) => {
                    if meter.has_data() {
                        meter.display();
                    }
                }
            }
        }
    }

    listener.remove_data_listener(StreamType::RxAudio, &callback);
    listener
        .send_command("AUDIO_STOP", Action::Write, Some(rx), None, &[])
        .await
        .context("failed to stop RX audio")?;
    Ok(())
}

/// Peak and RMS accumulator behind the text-based level meter.
struct LevelMeter {
    peak: Vec<f32>,
    rms_accum: Vec<f64>,
    count: Vec<u64>,
    sample_rate: u32,
    last_display: Instant,
}

impl Default for LevelMeter {
    fn default() -> Self {
        Self {
            peak: Vec::new(),
            rms_accum: Vec::new(),
            count: Vec::new(),
            sample_rate: 0,
            last_display: Instant::now(),
        }
    }
}

impl LevelMeter {
    fn accumulate(&mut self, samples: &[f32], channels: usize, sample_rate: u32) {
        if self.peak.len() != channels {
            self.peak = vec![0.0; channels];
            self.rms_accum = vec![0.0; channels];
            self.count = vec![0; channels];
        }
        self.sample_rate = sample_rate;
        for (i, &sample) in samples.iter().enumerate() {
            let ch = i % channels;
            self.peak[ch] = self.peak[ch].max(sample.abs());
            self.rms_accum[ch] += f64::from(sample) * f64::from(sample);
            self.count[ch] += 1;
        }
    }

    fn due(&self) -> bool {
        self.last_display.elapsed() >= Duration::from_millis(100)
    }

    fn has_data(&self) -> bool {
        self.count.iter().any(|&c| c > 0)
    }

    fn display(&mut self) {
        let meter_width = 40;
        let mut line = format!("{:>6} Hz ", self.sample_rate);

        for ch in 0..self.peak.len() {
            let label = match (self.peak.len(), ch) {
                (2, 0) => "L".to_string(),
                (2, _) => "R".to_string(),
                _ => ch.to_string(),
            };
            let rms = if self.count[ch] > 0 {
                (self.rms_accum[ch] / self.count[ch] as f64).sqrt() as f32
            } else {
                0.0
            };
            let peak_dbfs = to_dbfs(self.peak[ch]);
            let rms_dbfs = to_dbfs(rms);

            // 0 dBFS = full bar, -60 dBFS = empty.
            let bar_len = ((peak_dbfs + 60.0) / 60.0 * meter_width as f32).clamp(0.0, meter_width as f32)
                as usize;
            let bar = "#".repeat(bar_len) + &" ".repeat(meter_width - bar_len);

            line.push_str(&format!(
                " {label}: [{bar}] pk:{peak_dbfs:>6.1} rms:{rms_dbfs:>6.1} dBFS"
            ));
        }

        print!("\r{line}");
        io::stdout().flush().ok();

        self.peak.fill(0.0);
        self.rms_accum.fill(0.0);
        self.count.fill(0);
        self.last_display = Instant::now();
    }
}

fn to_dbfs(level: f32) -> f32 {
    if level > 0.0 { 20.0 * level.log10() } else { -96.0 }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    // The registry listing does not need a server.
    if matches!(cli.command, Command::Commands) {
        return cmd_commands();
    }

    let listener = connect(&cli).await?;

    let result = match &cli.command {
        Command::Commands => unreachable!("commands handled above"),
        Command::Info => cmd_info(&listener).await,
        Command::Dump => cmd_dump(&listener).await,
        Command::Get { name, rx, channel } => cmd_get(&listener, name, *rx, *channel).await,
        Command::Set {
            name,
            values,
            rx,
            channel,
        } => cmd_set(&listener, name, values, *rx, *channel).await,
        Command::Monitor { duration } => cmd_monitor(&listener, *duration).await,
        Command::Audio { rx, duration } => cmd_audio(&listener, *rx, *duration).await,
    };

    listener.shutdown();
    if let Err(e) = listener.wait().await {
        tracing::debug!(error = %e, "Connection ended with error");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_set_with_scope() {
        let cli = Cli::try_parse_from([
            "tci-test-app",
            "--uri",
            "ws://10.0.0.2:40001",
            "set",
            "vfo",
            "14074000",
            "--rx",
            "0",
            "--channel",
            "1",
        ])
        .unwrap();
        assert_eq!(cli.uri, "ws://10.0.0.2:40001");
        match cli.command {
            Command::Set {
                name,
                values,
                rx,
                channel,
            } => {
                assert_eq!(name, "vfo");
                assert_eq!(values, vec!["14074000"]);
                assert_eq!((rx, channel), (Some(0), Some(1)));
            }
            _ => panic!("expected set"),
        }
    }

    #[test]
    fn cli_default_uri() {
        let cli = Cli::try_parse_from(["tci-test-app", "dump"]).unwrap();
        assert_eq!(cli.uri, DEFAULT_URI);
        assert_eq!(cli.ready_timeout, 3);
    }

    #[test]
    fn remaining_without_deadline_is_capped() {
        assert_eq!(remaining(None, Duration::from_millis(5)), Some(Duration::from_millis(5)));
        let past = Instant::now() - Duration::from_secs(1);
        assert_eq!(remaining(Some(past), Duration::from_secs(1)), None);
    }

    #[test]
    fn level_meter_tracks_peak_per_channel() {
        let mut meter = LevelMeter::default();
        meter.accumulate(&[0.5, -0.25, -1.0, 0.1], 2, 48000);
        assert_eq!(meter.peak, vec![1.0, 0.25]);
        assert_eq!(meter.count, vec![2, 2]);
        assert!(meter.has_data());
        assert!((to_dbfs(1.0)).abs() < 1e-6);
        assert_eq!(to_dbfs(0.0), -96.0);
    }
}
