//! MMC command-line client
//!
//! Talks to a chain of Micronix MMC controllers over one serial port.

mod logger;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::debug;

use mmc_core::config::user_config_path;
use mmc_core::prelude::*;
use mmc_core::protocol::{list_ports, CommunicationChannel};

/// Controllers on the chain in `--simulate` mode
const SIMULATED_AXES: u8 = 4;

/// MMC CLI
#[derive(Parser, Debug)]
#[command(name = "mmc")]
#[command(about = "Send commands to Micronix MMC motion controllers", version)]
struct Args {
    /// Serial port (e.g. COM4 or /dev/ttyUSB0)
    #[arg(short, long, global = true)]
    port: Option<String>,

    /// Baud rate
    #[arg(short, long, global = true)]
    baud: Option<u32>,

    /// Reply timeout in milliseconds
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    /// Settings file (defaults to the per-user config if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Talk to a simulated controller chain instead of a serial port
    #[arg(long, global = true)]
    simulate: bool,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List serial ports
    Ports,

    /// Read a value and print it
    Poll {
        /// Axis number (1-99)
        axis: String,

        /// Mnemonic to read, e.g. VER or POS
        mnemonic: String,
    },

    /// Send a command and print whether the controller accepted it
    Write {
        /// Axis number (0 addresses every axis)
        axis: String,

        /// Command without axis prefix, e.g. MVA-5
        command: String,
    },

    /// Run several commands in order against one open port
    Run {
        /// Axis number
        axis: String,

        /// Commands; queries are polled, everything else is written
        #[arg(required = true)]
        commands: Vec<String>,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();
    logger::init_cli_logger(args.verbose);

    match run(args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<ExitCode> {
    if let Commands::Ports = args.command {
        print_ports()?;
        return Ok(ExitCode::SUCCESS);
    }

    let config = load_config(&args)?;
    let mmc = open(&config, args.simulate)?;

    let code = match &args.command {
        Commands::Ports => ExitCode::SUCCESS,
        Commands::Poll { axis, mnemonic } => {
            let value = mmc.poll_values(axis, mnemonic);
            println!("{}", value);
            exit_code(!value.is_empty())
        }
        Commands::Write { axis, command } => {
            let accepted = mmc.write_command(axis, command);
            println!("{}", accepted);
            exit_code(accepted)
        }
        Commands::Run { axis, commands } => {
            let axis: Axis = axis.parse().context("invalid axis")?;
            run_sequence(mmc.connection(), axis, commands)?;
            ExitCode::SUCCESS
        }
    };

    mmc.close();
    Ok(code)
}

fn exit_code(ok: bool) -> ExitCode {
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn print_ports() -> Result<()> {
    let ports = list_ports();
    if ports.is_empty() {
        println!("no serial ports found");
        return Ok(());
    }
    for port in ports {
        match (&port.manufacturer, &port.product) {
            (Some(m), Some(p)) => println!("{}\t{} {}", port.name, m, p),
            (None, Some(p)) => println!("{}\t{}", port.name, p),
            _ => println!("{}", port.name),
        }
    }
    Ok(())
}

/// Settings file (explicit, else per-user if present, else defaults), then
/// command-line overrides
fn load_config(args: &Args) -> Result<ConnectionConfig> {
    let file = match &args.config {
        Some(path) => Some(path.clone()),
        None => dirs::config_dir()
            .map(|dir| user_config_path(&dir))
            .filter(|path| path.exists()),
    };

    let mut config = match &file {
        Some(path) => read_config(path)?,
        None => ConnectionConfig::default(),
    };

    if let Some(port) = &args.port {
        config.port_name = port.clone();
    }
    if let Some(baud) = args.baud {
        config.settings.baud_rate = baud;
    }
    if let Some(timeout_ms) = args.timeout_ms {
        config.timeout_ms = timeout_ms;
    }
    if args.simulate && config.port_name.is_empty() {
        config.port_name = "SIM".to_string();
    }

    config.validate().context("invalid settings")?;
    if config.port_name.is_empty() {
        bail!("no serial port given; pass --port or set port_name in the config file");
    }
    Ok(config)
}

fn read_config(path: &Path) -> Result<ConnectionConfig> {
    debug!(path = %path.display(), "loading settings");
    ConnectionConfig::from_file(path)
        .with_context(|| format!("failed to load settings from {}", path.display()))
}

fn open(config: &ConnectionConfig, simulate: bool) -> Result<Mmc> {
    let mmc = if simulate {
        Mmc::open_with(config.clone(), |_, _| {
            Ok(Box::new(SimulatedController::new(SIMULATED_AXES)) as Box<dyn CommunicationChannel>)
        })
    } else {
        Mmc::open_with_config(config.clone())
    };
    mmc.with_context(|| format!("cannot open {}", config.port_name))
}

fn run_sequence(conn: &Connection, axis: Axis, commands: &[String]) -> Result<()> {
    for text in commands {
        let command = Command::parse(axis, text)
            .with_context(|| format!("invalid command '{}'", text))?;
        match conn
            .send(&command)
            .with_context(|| format!("{} failed", command))?
        {
            Response::QueryResult(payload) => println!("{}\t{}", command, payload),
            Response::Acknowledgement => println!("{}\tok", command),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_flags_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        ConnectionConfig {
            timeout_ms: 900,
            ..ConnectionConfig::for_port("COM7")
        }
        .save(&path)
        .unwrap();

        let args = parse(&[
            "mmc",
            "--config",
            path.to_str().unwrap(),
            "--port",
            "COM4",
            "poll",
            "1",
            "VER",
        ]);
        let config = load_config(&args).unwrap();
        assert_eq!(config.port_name, "COM4");
        assert_eq!(config.timeout_ms, 900);
    }

    #[test]
    fn test_simulated_run() {
        let args = parse(&["mmc", "--simulate", "--config", "/nonexistent.json", "ports"]);
        assert!(load_config(&args).is_err());

        let args = parse(&["mmc", "--simulate", "--port", "SIM", "run", "1", "MVA3", "POS?"]);
        let config = load_config(&args).unwrap();
        let mmc = open(&config, true).unwrap();
        let axis: Axis = "1".parse().unwrap();
        let commands = vec!["MVA3".to_string(), "VER".to_string()];
        run_sequence(mmc.connection(), axis, &commands).unwrap();
        assert!(run_sequence(mmc.connection(), axis, &["MVA99".to_string()]).is_err());
    }

    #[test]
    fn test_missing_port_is_an_error() {
        let args = parse(&["mmc", "--port", "/dev/does-not-exist-mmc", "write", "1", "HOM"]);
        let config = load_config(&args).unwrap();
        assert!(open(&config, false).is_err());
    }
}
