use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

pub const DEFAULT_CONFIG_PATH: &str = "master_config/master_config.yaml";

#[derive(Parser, Debug)]
#[command(name = "spotx")]
#[command(about = "SpotX - Spot order matching and real-time market data distribution")]
#[command(version)]
pub struct Cli {
    /// Override the configured log format
    #[arg(long, value_enum, global = true)]
    pub log_format: Option<LogFormatArg>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the matching engine, the order API and the distribution server
    Start {
        /// Path to the configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH, env = "SPOTX_CONFIG")]
        config: PathBuf,

        /// Override the listen host
        #[arg(long)]
        host: Option<String>,

        /// Override HTTP port
        #[arg(long)]
        http: Option<u16>,

        /// Override WebSocket port
        #[arg(long)]
        ws: Option<u16>,
    },

    /// Validate configuration without starting the exchange
    Validate {
        /// Path to the configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH, env = "SPOTX_CONFIG")]
        config: PathBuf,
    },

    /// Initialize a new configuration file with all defaults
    Init {
        /// Output path for the new configuration file
        #[arg(short, long, default_value = "master_config.yaml")]
        output: PathBuf,
    },

    /// Sign a distribution token for a user with the configured secret
    IssueToken {
        /// User id placed in the `sub` claim
        #[arg(short, long)]
        user: String,

        /// Token lifetime in seconds
        #[arg(long, default_value_t = 3600)]
        ttl_secs: u64,

        /// Path to the configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH, env = "SPOTX_CONFIG")]
        config: PathBuf,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormatArg {
    Pretty,
    Json,
    Compact,
}

impl LogFormatArg {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogFormatArg::Pretty => "pretty",
            LogFormatArg::Json => "json",
            LogFormatArg::Compact => "compact",
        }
    }
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
