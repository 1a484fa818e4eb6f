//! siggen: command-line front end for the synchronization engine.
//!
//! ```text
//! siggen --simulate list
//! siggen --resource "USB0::0x1AB1::0x0642::DG1ZA0001::INSTR" query "*IDN?"
//! siggen --simulate apply --channel 1 --shape square --set frequency=2.5kHz --output on
//! siggen --simulate --json refresh
//! SIGGEN_DISPATCH__DEBOUNCE_MS=250 siggen config
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use rust_siggen::channel::{ChannelModel, Family, ParameterModel, Waveform};
use rust_siggen::config::SigGenConfig;
use rust_siggen::error::SyncError;
use rust_siggen::logging::{init_tracing, SharedLogSink, TracingLogSink};
use rust_siggen::transport::simulated::SIMULATED_RESOURCE;
use rust_siggen::transport::{SessionOptions, SimulatedDriver, Transport, TransportSession};
use rust_siggen::SyncEngine;

#[derive(Parser, Debug)]
#[command(version, about = "Remote control of SCPI function generators")]
struct Cli {
    /// Configuration file (TOML). Environment variables prefixed SIGGEN_ override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Talk to the built-in simulated generator instead of VISA hardware.
    #[arg(long, global = true)]
    simulate: bool,

    /// Resource string to connect to. Defaults to `transport.resource`.
    #[arg(long, global = true)]
    resource: Option<String>,

    /// Print results as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the effective configuration as TOML.
    Config,

    /// List discoverable instruments.
    List,

    /// Send a raw command.
    Send {
        /// Command text without terminator.
        command: String,
    },

    /// Send a raw query and print the response.
    Query {
        /// Query text, usually ending in `?`.
        command: String,
    },

    /// Stage settings for one channel and apply them.
    Apply {
        /// 1-based channel index.
        #[arg(long, default_value_t = 1)]
        channel: u8,

        /// Waveform family: basic, am, fm or pm.
        #[arg(long)]
        family: Option<Family>,

        /// Carrier shape (basic) or modulating shape (am, fm, pm).
        #[arg(long)]
        shape: Option<Waveform>,

        /// Frequency (basic family), in `--frequency-unit`.
        #[arg(long)]
        frequency: Option<f64>,

        /// Unit symbol for `--frequency`: uHz..MHz, or a period unit such as ms.
        #[arg(long, default_value = "Hz")]
        frequency_unit: String,

        /// Field assignment such as `frequency=2.5kHz` or `duty_cycle=25`. Repeatable.
        #[arg(long = "set", value_parser = parse_assignment)]
        assignments: Vec<Assignment>,

        /// Output (basic) or modulation (am, fm, pm) state.
        #[arg(long, value_parser = parse_switch)]
        output: Option<bool>,
    },

    /// Read channel settings back from the instrument.
    Refresh {
        /// 1-based channel index. All channels when omitted.
        #[arg(long)]
        channel: Option<u8>,

        /// Waveform family to read the channel as.
        #[arg(long, default_value = "basic")]
        family: Family,
    },
}

#[derive(Debug, Clone, PartialEq)]
struct Assignment {
    field: String,
    value: f64,
    unit: String,
}

/// Split `name=<number><unit>` into its parts.
fn parse_assignment(text: &str) -> Result<Assignment, String> {
    let (field, rest) = text
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE[UNIT], got '{text}'"))?;
    let rest = rest.trim();
    let numeric = |n: char| n.is_ascii_digit() || n == '-' || n == '+';
    let split = rest
        .char_indices()
        .find(|&(i, c)| {
            let sign = (c == '-' || c == '+') && (i == 0 || rest[..i].ends_with(['e', 'E']));
            let exponent = (c == 'e' || c == 'E') && i > 0 && rest[i + 1..].starts_with(numeric);
            !(c.is_ascii_digit() || c == '.' || sign || exponent)
        })
        .map_or(rest.len(), |(i, _)| i);
    let (number, unit) = rest.split_at(split);
    let value = number
        .parse::<f64>()
        .map_err(|_| format!("'{number}' is not a number in '{text}'"))?;
    Ok(Assignment {
        field: field.trim().to_string(),
        value,
        unit: unit.trim().to_string(),
    })
}

fn parse_switch(text: &str) -> Result<bool, String> {
    match text.to_ascii_lowercase().as_str() {
        "on" | "1" | "true" => Ok(true),
        "off" | "0" | "false" => Ok(false),
        _ => Err(format!("expected on or off, got '{text}'")),
    }
}

#[derive(Debug, Serialize)]
struct FieldReport {
    name: &'static str,
    value: String,
    unit: String,
}

#[derive(Debug, Serialize)]
struct ChannelReport {
    channel: u8,
    family: Family,
    shape: Waveform,
    enabled: bool,
    fields: Vec<FieldReport>,
}

impl From<&ChannelModel> for ChannelReport {
    fn from(model: &ChannelModel) -> Self {
        Self {
            channel: model.channel(),
            family: model.family(),
            shape: model.shape(),
            enabled: model.enabled(),
            fields: model
                .active_fields()
                .into_iter()
                .map(|field| FieldReport {
                    name: field.name(),
                    value: field.display_text().to_string(),
                    unit: field.display_unit().to_string(),
                })
                .collect(),
        }
    }
}

fn print_report(report: &ChannelReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    println!(
        "channel {} [{}] shape={} {}",
        report.channel,
        report.family,
        report.shape,
        if report.enabled { "on" } else { "off" }
    );
    for field in &report.fields {
        println!("  {:<12} {} {}", field.name, field.value, field.unit);
    }
    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> Result<SigGenConfig> {
    let config = match path {
        Some(path) => SigGenConfig::load_from(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => SigGenConfig::load().context("loading configuration")?,
    };
    Ok(config)
}

fn open_transport(
    cli: &Cli,
    config: &SigGenConfig,
    log: SharedLogSink,
) -> Result<Box<dyn Transport>> {
    let options = SessionOptions::from(&config.transport);
    if cli.simulate {
        let driver = SimulatedDriver::with_channels(config.transport.channel_count);
        return Ok(Box::new(
            TransportSession::with_options(driver, options).with_log_sink(log),
        ));
    }
    #[cfg(feature = "instrument_visa")]
    {
        let driver = rust_siggen::transport::VisaDriver::new();
        Ok(Box::new(
            TransportSession::with_options(driver, options).with_log_sink(log),
        ))
    }
    #[cfg(not(feature = "instrument_visa"))]
    {
        let _ = (options, log);
        bail!("built without the instrument_visa feature; use --simulate")
    }
}

fn resource(cli: &Cli, config: &SigGenConfig) -> Result<String> {
    if let Some(resource) = cli.resource.clone().or_else(|| config.transport.resource.clone()) {
        return Ok(resource);
    }
    if cli.simulate {
        return Ok(SIMULATED_RESOURCE.to_string());
    }
    bail!("no resource given; pass --resource or set transport.resource")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;
    init_tracing(&config.log_level);
    debug!(?config, "configuration loaded");

    if let Command::Config = cli.command {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    let log: SharedLogSink = Arc::new(TracingLogSink);
    let mut transport = open_transport(&cli, &config, log.clone())?;

    if let Command::List = cli.command {
        let resources: Vec<String> = transport.list_resources().collect();
        if cli.json {
            println!("{}", serde_json::to_string_pretty(&resources)?);
        } else if resources.is_empty() {
            println!("no instruments found");
        } else {
            resources.iter().for_each(|resource| println!("{resource}"));
        }
        return Ok(());
    }

    let resource = resource(&cli, &config)?;
    let connection = transport
        .connect(&resource)
        .with_context(|| format!("connecting to {resource}"))?;
    info!(resource = %connection.resource, "connected");

    match &cli.command {
        Command::Config | Command::List => {}
        Command::Send { command } => {
            transport.send(command)?;
        }
        Command::Query { command } => {
            let response = transport.query(command)?;
            if cli.json {
                println!("{}", serde_json::to_string(&response)?);
            } else {
                println!("{response}");
            }
        }
        Command::Apply {
            channel,
            family,
            shape,
            frequency,
            frequency_unit,
            assignments,
            output,
        } => {
            let mut engine = SyncEngine::from_config(transport, &config, log);
            let channel = *channel;
            if let Some(family) = family {
                engine.set_family(channel, *family)?;
            }
            if let Some(shape) = shape {
                engine.select_shape(channel, *shape)?;
            }
            if let Some(frequency) = frequency {
                engine.edit_symbol(channel, "frequency", *frequency, frequency_unit)?;
            }
            for assignment in assignments {
                engine.edit_symbol(
                    channel,
                    &assignment.field,
                    assignment.value,
                    &assignment.unit,
                )?;
            }
            if let Some(enabled) = output {
                engine.set_enabled(channel, *enabled)?;
            }
            if engine.flush() == 0 {
                engine.apply_channel(channel)?;
            }
            if let Some(failure) = engine.take_failures().into_iter().next() {
                return Err(failure).context(format!("applying channel {channel}"));
            }
            print_report(&ChannelReport::from(engine.channel(channel)?), cli.json)?;
            engine.instrument_mut().transport_mut().disconnect()?;
        }
        Command::Refresh { channel, family } => {
            let mut engine = SyncEngine::from_config(transport, &config, log.clone());
            let channels: Vec<u8> = match channel {
                Some(channel) => vec![*channel],
                None => (1..=config.transport.channel_count).collect(),
            };
            let mut failed = false;
            for index in channels {
                let model = engine.instrument_mut().channel_mut(index)?;
                if model.family() != *family {
                    *model = ChannelModel::new(*family, index, log.clone());
                }
                if let Err(err) = engine.refresh_channel(index) {
                    // Unreadable fields keep their defaults; report and carry on.
                    eprintln!("{err}");
                    failed = matches!(err, SyncError::Edit(_)) || failed;
                }
                print_report(&ChannelReport::from(engine.channel(index)?), cli.json)?;
            }
            engine.instrument_mut().transport_mut().disconnect()?;
            if failed {
                bail!("refresh addressed a channel the instrument does not have");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_assignment() {
        let a = parse_assignment("frequency=2.5kHz").unwrap();
        assert_eq!(a.field, "frequency");
        assert_eq!(a.value, 2.5);
        assert_eq!(a.unit, "kHz");

        let a = parse_assignment("offset=-1.2e-1 V").unwrap();
        assert_eq!(a.value, -0.12);
        assert_eq!(a.unit, "V");

        let a = parse_assignment("duty_cycle=25").unwrap();
        assert_eq!(a.unit, "");

        assert!(parse_assignment("frequency").is_err());
        assert!(parse_assignment("frequency=fast").is_err());
    }

    #[test]
    fn test_cli_parses_config() {
        let cli = Cli::try_parse_from(["siggen", "--config", "bench.toml", "config"]).unwrap();
        assert!(matches!(cli.command, Command::Config));
        assert_eq!(cli.config, Some(PathBuf::from("bench.toml")));
    }

    #[test]
    fn test_cli_parses_apply() {
        let cli = Cli::try_parse_from([
            "siggen",
            "--simulate",
            "apply",
            "--channel",
            "2",
            "--shape",
            "square",
            "--set",
            "frequency=1MHz",
            "--frequency",
            "4",
            "--frequency-unit",
            "ms",
            "--output",
            "on",
        ])
        .unwrap();
        assert!(cli.simulate);
        match cli.command {
            Command::Apply {
                channel,
                shape,
                frequency,
                frequency_unit,
                assignments,
                output,
                ..
            } => {
                assert_eq!(channel, 2);
                assert_eq!(frequency, Some(4.0));
                assert_eq!(frequency_unit, "ms");
                assert_eq!(shape, Some(Waveform::Square));
                assert_eq!(assignments[0].unit, "MHz");
                assert_eq!(output, Some(true));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
