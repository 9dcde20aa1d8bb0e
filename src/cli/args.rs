//! CLI argument definitions using clap derive

use clap::{Parser, Subcommand, ValueEnum};

use crate::cli::commands::{
    analyze::AnalyzeArgs, budget::BudgetArgs, completions::CompletionsArgs, convert::ConvertArgs,
    gb::GbArgs, init::InitArgs, inst::InstCommands, new::NewArgs, risk::RiskArgs,
};

#[derive(Parser)]
#[command(name = "tmt")]
#[command(author, version, about = "Tessera Metrology Toolkit")]
#[command(
    long_about = "Measurement uncertainty budgets, calibration decision risk (PFA/PFR, TUR/TAR), \
                  guard bands and calibration intervals for test points kept as YAML files."
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[command(flatten)]
    pub global: GlobalOpts,
}

#[derive(clap::Args, Clone, Debug)]
pub struct GlobalOpts {
    /// Output format
    #[arg(long, short = 'f', global = true, default_value = "auto")]
    pub format: OutputFormat,

    /// Suppress non-essential output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Enable debug logging on stderr
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new TMT project
    Init(InitArgs),

    /// Create a test point from the built-in template
    New(NewArgs),

    /// Show the uncertainty budget of a test point
    Budget(BudgetArgs),

    /// Show decision risk, guard band and interval for a test point
    Risk(RiskArgs),

    /// Solve a guard band from raw numbers
    Gb(GbArgs),

    /// Analyze many test points, optionally storing the results
    Analyze(AnalyzeArgs),

    /// Convert a value to ppm of a nominal, or from ppm to a unit
    Convert(ConvertArgs),

    /// Instrument library
    #[command(subcommand)]
    Inst(InstCommands),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable tables
    #[default]
    Auto,
    Yaml,
    Json,
    Csv,
    /// Markdown tables
    Md,
    Tsv,
}

impl OutputFormat {
    /// Resolve `auto` against the configured default
    pub fn resolve(self, configured: Option<&str>) -> OutputFormat {
        if self != OutputFormat::Auto {
            return self;
        }
        configured
            .and_then(|name| OutputFormat::from_str(name, true).ok())
            .unwrap_or(OutputFormat::Auto)
    }
}
