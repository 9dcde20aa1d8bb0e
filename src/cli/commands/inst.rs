//! `tmt inst` command - instrument library: create files and look up ranges

use clap::Subcommand;
use console::style;
use miette::{IntoDiagnostic, Result};
use serde::Serialize;
use std::path::PathBuf;

use crate::cli::helpers::{load_instrument, truncate_str};
use crate::cli::output::{opt, print_structured, Table};
use crate::cli::{GlobalOpts, OutputFormat};
use crate::core::identity::{EntityId, EntityPrefix};
use crate::core::tolerance::ToleranceSpec;
use crate::core::{Config, Project};
use crate::schema::template::{TemplateContext, TemplateGenerator};

#[derive(Subcommand, Debug)]
pub enum InstCommands {
    /// Create an instrument file from the built-in template
    New(InstNewArgs),

    /// Find the ranges that cover a measurement value
    Lookup(InstLookupArgs),
}

#[derive(clap::Args, Debug)]
pub struct InstNewArgs {
    /// Instrument title
    #[arg(long, short = 't')]
    pub title: String,

    #[arg(long)]
    pub manufacturer: Option<String>,

    #[arg(long)]
    pub model: Option<String>,

    /// First function name
    #[arg(long, default_value = "DCV")]
    pub function: String,

    /// Unit of the first function
    #[arg(long, short = 'u', default_value = "V")]
    pub unit: String,

    /// Output file; defaults to instruments/ inside a project, else stdout
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
pub struct InstLookupArgs {
    /// Instrument file (*.tmt.yaml)
    pub file: PathBuf,

    /// Measurement value
    #[arg(long, allow_negative_numbers = true)]
    pub value: f64,

    /// Unit of the measurement value
    #[arg(long, short = 'u')]
    pub unit: String,
}

#[derive(Debug, Serialize)]
struct LookupRow {
    function: String,
    min: f64,
    max: f64,
    value_in_function_unit: f64,
    best: bool,
    tolerance: ToleranceSpec,
}

pub fn run(cmd: InstCommands, global: &GlobalOpts) -> Result<()> {
    match cmd {
        InstCommands::New(args) => run_new(args, global),
        InstCommands::Lookup(args) => run_lookup(args, global),
    }
}

fn run_new(args: InstNewArgs, global: &GlobalOpts) -> Result<()> {
    let config = Config::load();
    let id = EntityId::new(EntityPrefix::Inst);
    let ctx = TemplateContext::new(id.clone(), config.author())
        .with_title(&args.title)
        .with_nominal(0.0, &args.unit)
        .with_model(args.manufacturer.clone(), args.model.clone())
        .with_function(&args.function);
    let generator = TemplateGenerator::new().map_err(|e| miette::miette!("{}", e))?;
    let yaml = generator
        .generate_instrument(&ctx)
        .map_err(|e| miette::miette!("{}", e))?;

    let target = match args.output {
        Some(path) => Some(path),
        None => Project::discover().ok().map(|p| p.entity_path(&id)),
    };
    match target {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).into_diagnostic()?;
            }
            std::fs::write(&path, yaml).into_diagnostic()?;
            if !global.quiet {
                println!(
                    "{} Created instrument {}",
                    style("✓").green(),
                    style(&id).cyan()
                );
                println!("   {}", style(path.display()).dim());
            }
        }
        None => print!("{}", yaml),
    }
    Ok(())
}

fn run_lookup(args: InstLookupArgs, global: &GlobalOpts) -> Result<()> {
    let config = Config::load();
    let units = config.unit_system();
    let instrument = load_instrument(&args.file)?;

    let matches = instrument
        .find_matching_ranges(args.value, &args.unit, &units)
        .map_err(|e| miette::miette!("{}", e))?;
    let best_max = matches
        .iter()
        .map(|m| m.range.max)
        .min_by(|a, b| a.total_cmp(b));

    let mut rows = Vec::with_capacity(matches.len());
    for m in &matches {
        rows.push(LookupRow {
            function: m.function.name.clone(),
            min: m.range.min,
            max: m.range.max,
            value_in_function_unit: m.value_in_function_unit,
            best: Some(m.range.max) == best_max,
            tolerance: m
                .tolerance_for(&args.unit, &units)
                .map_err(|e| miette::miette!("{}", e))?,
        });
    }
    tracing::debug!(instrument = %instrument.id, matches = rows.len(), "range lookup");

    let format = global.format.resolve(config.default_format.as_deref());
    if print_structured(&rows, format)? {
        return Ok(());
    }
    if rows.is_empty() {
        println!(
            "{} No range of {} covers {} {}",
            style("!").yellow(),
            instrument.title,
            args.value,
            args.unit
        );
        return Ok(());
    }

    let mut table = Table::new(["", "Function", "Range", "Tolerance"]);
    for row in &rows {
        let marker = if row.best { "*" } else { "" };
        table.push([
            marker.to_string(),
            row.function.clone(),
            format!("{} .. {}", row.min, row.max),
            truncate_str(&row.tolerance.summary(&args.unit), 60),
        ]);
    }
    print!("{}", table.render(format)?);
    if format == OutputFormat::Auto && !global.quiet {
        let best = rows.iter().find(|r| r.best);
        println!(
            "{} best range full scale {}",
            style("*").cyan(),
            opt(best.map(|r| r.max), 6)
        );
    }
    Ok(())
}
