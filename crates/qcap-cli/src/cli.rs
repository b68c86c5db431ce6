use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "Reactive capability and dispatch studies", long_about = None)]
pub struct Cli {
    /// Set the logging level
    #[arg(long, default_value = "info")]
    pub log_level: tracing::Level,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check a study configuration without touching an engine
    Validate {
        /// Path to the study configuration (YAML or JSON)
        #[arg(long)]
        config: PathBuf,
    },
    /// Tune dispatch and/or voltage schedules onto the configured targets
    Tune {
        #[arg(long)]
        config: PathBuf,
        /// Which loops to run
        #[arg(long, value_enum, default_value_t = TuneMode::Pq)]
        mode: TuneMode,
        /// Write bisection iterations to this CSV file
        #[arg(long)]
        trace: Option<PathBuf>,
    },
    /// Derive the four-point reactive capability envelope
    Envelope {
        #[arg(long)]
        config: PathBuf,
        /// Grouped CSV report over the configured report points
        #[arg(long)]
        report: Option<PathBuf>,
        /// JSON run manifest for downstream tooling
        #[arg(long)]
        manifest: Option<PathBuf>,
    },
    /// Walk a project through its named operating points
    Scenario {
        #[arg(long)]
        config: PathBuf,
        /// Project type
        #[arg(long, value_enum)]
        kind: ScenarioArg,
        #[arg(long)]
        report: Option<PathBuf>,
        #[arg(long)]
        manifest: Option<PathBuf>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum TuneMode {
    /// Active power only
    P,
    /// Reactive power (via voltage schedules) only
    Q,
    /// P, then Q
    Pq,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum ScenarioArg {
    Storage,
    Generation,
    Hybrid,
}
