//! CLI entry point for behavior_daq
//!
//! Provides command-line access to:
//! - listing serial ports,
//! - printing the effective configuration and the parameter upload,
//! - running a session on a real rig,
//! - running a session against a simulated device.
//!
//! # Usage
//!
//! ```bash
//! behavior_daq ports
//! behavior_daq run --port /dev/ttyACM0 --subject m12
//! behavior_daq simulate --rig wheel --trials 20
//! ```

use anyhow::{bail, Context, Result};
use behavior_daq::adapters::mock_adapter::synthetic_session;
use behavior_daq::adapters::{list_ports, Connector, MockDevice, SerialConnector};
use behavior_daq::config::{RigConfig, DEFAULT_CONFIG_PATH};
use behavior_daq::data::SessionSummary;
use behavior_daq::logging;
use behavior_daq::protocol::{encode_upload, Rig};
use behavior_daq::session::{
    ConfigHost, ControllerSettings, PollStatus, SessionController, SessionState,
};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "behavior_daq")]
#[command(about = "Session controller for behavioural rigs", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Default)]
struct SessionArgs {
    /// Rig variant (go_no_go, conveyor, wheel)
    #[arg(long)]
    rig: Option<Rig>,

    /// Subject identifier
    #[arg(long)]
    subject: Option<String>,

    /// Operator notes
    #[arg(long)]
    notes: Option<String>,

    /// Session file (appended to when it exists)
    #[arg(long)]
    output: Option<PathBuf>,

    /// Echo device output to the log
    #[arg(long)]
    echo: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List serial ports visible to the host
    Ports,

    /// Print the effective configuration as TOML
    Config,

    /// Print the parameter upload for the configured rig
    Encode {
        /// Rig variant
        #[arg(long)]
        rig: Option<Rig>,
    },

    /// Run one session on a rig
    Run {
        /// Serial port (`/dev/ttyACM0`, `COM3`)
        #[arg(long)]
        port: Option<String>,

        #[command(flatten)]
        session: SessionArgs,
    },

    /// Run one session against a simulated device
    Simulate {
        /// Number of simulated trials
        #[arg(long, default_value = "10")]
        trials: usize,

        #[command(flatten)]
        session: SessionArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = RigConfig::load_from(&cli.config)
        .with_context(|| format!("Failed to load '{}'", cli.config.display()))?;

    match cli.command {
        Commands::Ports => print_ports(),
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::Encode { rig } => {
            let mut config = config;
            if let Some(rig) = rig {
                config.session.rig = rig;
            }
            config.validate()?;
            let rig = config.session.rig;
            let upload = encode_upload(rig.upload_prefix(), &config.parameter_set());
            println!("{}", String::from_utf8_lossy(&upload));
            Ok(())
        }
        Commands::Run { port, session } => {
            let mut config = apply(config, session)?;
            if port.is_some() {
                config.serial.port = port;
            }
            if config.serial.port.is_none() {
                bail!("No serial port selected; pass --port or set serial.port");
            }
            let connector = SerialConnector::new(
                config.serial.baud_rate,
                Duration::from_millis(config.serial.read_timeout_ms),
            );
            run_session(config, Arc::new(connector)).await
        }
        Commands::Simulate { trials, session } => {
            let mut config = apply(config, session)?;
            config.serial.port = Some("simulated".to_string());
            config.serial.settle_delay_ms = 0;

            let params = config.parameter_set();
            let script = synthetic_session(
                config.session.rig,
                trials,
                params.get_or_zero("track_period"),
            );
            let device = MockDevice::new()
                .with_banner([format!("{} rig (simulated)", config.session.rig)])
                .with_script(script);
            run_session(config, Arc::new(device.connector())).await
        }
    }
}

fn apply(mut config: RigConfig, args: SessionArgs) -> Result<RigConfig> {
    if let Some(rig) = args.rig {
        config.session.rig = rig;
    }
    if let Some(subject) = args.subject {
        config.session.subject = subject;
    }
    if let Some(notes) = args.notes {
        config.session.notes = notes;
    }
    if args.output.is_some() {
        config.storage.save_path = args.output;
    }
    if args.echo {
        config.session.echo_device_output = true;
    }
    config.validate()?;
    logging::init_from_config(&config).map_err(anyhow::Error::msg)?;
    Ok(config)
}

fn print_ports() -> Result<()> {
    let ports = list_ports()?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        if port.description.is_empty() {
            println!("{}", port.device);
        } else {
            println!("{}\t{}", port.device, port.description);
        }
    }
    Ok(())
}

async fn run_session(config: RigConfig, connector: Arc<dyn Connector>) -> Result<()> {
    info!("Starting {} ({} rig)", config.application.name, config.session.rig);
    let settings = ControllerSettings::from(&config);
    let refresh = settings.refresh_interval;
    let mut controller = SessionController::new(settings, connector, ConfigHost::new(config));

    controller.open().await?;
    controller.start().await?;
    info!("Press Ctrl+C to stop the session; press again to abort");

    let mut ticker = tokio::time::interval(refresh);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut stop_sent = false;
    let summary = loop {
        tokio::select! {
            _ = ticker.tick() => {
                match controller.poll().await? {
                    PollStatus::Finished(summary) => break summary,
                    PollStatus::Running => {}
                    PollStatus::Idle => bail!("Session ended without a summary"),
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal?;
                if controller.state() != SessionState::Running {
                    continue;
                }
                if stop_sent {
                    warn!("Aborting session");
                    break controller.abort().await?;
                }
                controller.stop().await?;
                stop_sent = true;
            }
        }
    };

    print_summary(&summary)
}

fn print_summary(summary: &SessionSummary) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(summary)?);
    Ok(())
}
