//! Command-line interface for quartermaster.
use clap::{Parser, Subcommand};
use std::str::FromStr;
use tracing::level_filters::LevelFilter;

/// Wrapper around `LevelFilter` so clap can parse log levels from either
/// string names ("info", "debug", etc.) or numeric shorthands (0-5).
#[derive(Clone, Copy, Debug)]
pub struct LogLevelArg(LevelFilter);

impl LogLevelArg {
    /// String representation suitable for `RUST_LOG`.
    pub fn as_str(&self) -> &'static str {
        match self.0 {
            LevelFilter::OFF => "off",
            LevelFilter::ERROR => "error",
            LevelFilter::WARN => "warn",
            LevelFilter::INFO => "info",
            LevelFilter::DEBUG => "debug",
            LevelFilter::TRACE => "trace",
        }
    }
}

impl FromStr for LogLevelArg {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err("log level cannot be empty".into());
        }

        if let Ok(number) = trimmed.parse::<u8>() {
            let level = match number {
                0 => LevelFilter::OFF,
                1 => LevelFilter::ERROR,
                2 => LevelFilter::WARN,
                3 => LevelFilter::INFO,
                4 => LevelFilter::DEBUG,
                5 => LevelFilter::TRACE,
                _ => {
                    return Err(format!(
                        "unsupported log level number '{number}' (expected 0-5)"
                    ));
                }
            };
            return Ok(LogLevelArg(level));
        }

        let level = match trimmed.to_ascii_lowercase().as_str() {
            "off" => LevelFilter::OFF,
            "error" | "err" => LevelFilter::ERROR,
            "warn" | "warning" => LevelFilter::WARN,
            "info" => LevelFilter::INFO,
            "debug" => LevelFilter::DEBUG,
            "trace" => LevelFilter::TRACE,
            _ => return Err(format!("invalid log level '{trimmed}'")),
        };
        Ok(LogLevelArg(level))
    }
}

/// Command-line interface for quartermaster.
#[derive(Parser)]
#[command(name = "qm", version, author)]
#[command(
    about = "A process supervisor for fleets of data-service processes",
    long_about = None
)]
pub struct Cli {
    /// Path to the fleet configuration file.
    #[arg(
        short,
        long,
        value_name = "FILE",
        default_value = "qm.cfg",
        global = true
    )]
    pub config: String,

    /// Path to the components status database.
    #[arg(
        short,
        long,
        value_name = "FILE",
        default_value = "qm.status",
        global = true
    )]
    pub status: String,

    /// Override the logging verbosity for this invocation only.
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevelArg>,

    /// The command to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for qm.
#[derive(Subcommand)]
pub enum Commands {
    /// Display status of components; no selector means all.
    Info {
        /// Component, group, namespace, `*` or `!negated` selectors.
        components: Vec<String>,

        /// Only show components whose status is in this `#`-separated list.
        #[arg(short = 'F', long, value_name = "STATUS#STATUS…")]
        filter: Option<String>,

        /// Emit machine-readable JSON output instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Display detailed information on components.
    Details {
        /// Component, group, namespace, `*` or `!negated` selectors.
        #[arg(required = true)]
        components: Vec<String>,
    },

    /// Start components in dependency order.
    Start {
        /// Component, group, namespace, `*` or `!negated` selectors.
        #[arg(required = true)]
        components: Vec<String>,

        /// Additional arguments passed to the processes for this launch.
        #[arg(short = 'a', long, value_name = "ARGS")]
        arguments: Option<String>,
    },

    /// Stop components gracefully, escalating to kill after the grace
    /// period.
    Stop {
        /// Component, group, namespace, `*` or `!negated` selectors.
        #[arg(required = true)]
        components: Vec<String>,
    },

    /// Force stop components.
    Kill {
        /// Component, group, namespace, `*` or `!negated` selectors.
        #[arg(required = true)]
        components: Vec<String>,
    },

    /// Stop and start components again.
    Restart {
        /// Component, group, namespace, `*` or `!negated` selectors.
        #[arg(required = true)]
        components: Vec<String>,

        /// Additional arguments passed to the processes for this launch.
        #[arg(short = 'a', long, value_name = "ARGS")]
        arguments: Option<String>,
    },

    /// Send the interrupt signal to components.
    Interrupt {
        /// Component, group, namespace, `*` or `!negated` selectors.
        #[arg(required = true)]
        components: Vec<String>,
    },

    /// Start a single component in the foreground with an attached console.
    Console {
        /// Single component identifier.
        component: String,

        /// Additional arguments passed to the process for this launch.
        #[arg(short = 'a', long, value_name = "ARGS")]
        arguments: Option<String>,
    },

    /// Show the application log file of components.
    Log {
        /// Component, group, namespace, `*` or `!negated` selectors.
        #[arg(required = true)]
        components: Vec<String>,
    },

    /// Show the captured stdout of components.
    Out {
        /// Component, group, namespace, `*` or `!negated` selectors.
        #[arg(required = true)]
        components: Vec<String>,
    },

    /// Show the captured stderr of components.
    Err {
        /// Component, group, namespace, `*` or `!negated` selectors.
        #[arg(required = true)]
        components: Vec<String>,
    },
}

/// Parses command-line arguments and returns a `Cli` struct.
pub fn parse_args() -> Cli {
    Cli::parse()
}
