use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gadgetctl::{GadgetDescriptor, GadgetFs};

/// Log level for the tool
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

/// gadgetctl command line arguments
#[derive(Parser, Debug)]
#[command(name = "gadgetctl")]
#[command(version, about = "Configure USB composite gadgets through ConfigFS")]
#[command(long_about = "Configure USB composite gadgets through ConfigFS.\n\n\
    The libcomposite module must be loaded (modprobe libcomposite).")]
struct CliArgs {
    /// Log level (error, warn, info, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a gadget from a JSON descriptor file
    Create {
        /// File containing the gadget descriptor
        file: PathBuf,
    },
    /// Remove a gadget and everything under it
    Remove {
        /// Id of the gadget
        id: String,
    },
    /// Bind a gadget to a controller
    Enable {
        /// Id of the gadget
        id: String,
        /// Controller (UDC) name; auto-discovered if omitted
        udc: Option<String>,
    },
    /// Unbind a gadget from its controller
    Disable {
        /// Id of the gadget
        id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level);

    if !nix::unistd::Uid::effective().is_root() {
        anyhow::bail!("root privileges needed, are you missing sudo?");
    }

    let gadgets = GadgetFs::new();
    if !gadgets.is_available() {
        anyhow::bail!(
            "ConfigFS gadget support not available; is it mounted and is the \
             libcomposite module loaded? (modprobe libcomposite)"
        );
    }

    match args.command {
        Command::Create { file } => {
            let json = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;
            let descriptor: GadgetDescriptor = serde_json::from_str(&json)
                .with_context(|| format!("parsing {}", file.display()))?;
            let descriptor = descriptor.normalize()?;
            gadgets.create(&descriptor).await?;
            println!("Created");
        }
        Command::Remove { id } => {
            let report = gadgets.remove(&id).await?;
            for warning in &report.warnings {
                eprintln!(
                    "warning: could not remove {}: {}",
                    warning.path.display(),
                    warning.error
                );
            }
            println!("Removed");
        }
        Command::Enable { id, udc } => {
            let udc = gadgets.enable(&id, udc.as_deref()).await?;
            println!("Enabled on {udc}");
        }
        Command::Disable { id } => {
            gadgets.disable(&id).await?;
            println!("Disabled");
        }
    }

    Ok(())
}

fn init_logging(level: LogLevel) {
    let filter = match level {
        LogLevel::Error => "gadgetctl=error",
        LogLevel::Warn => "gadgetctl=warn",
        LogLevel::Info => "gadgetctl=info",
        LogLevel::Debug => "gadgetctl=debug",
        LogLevel::Trace => "gadgetctl=trace",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}
