//! `tmt new` command - render a test point from the embedded template

use console::style;
use miette::{IntoDiagnostic, Result};
use std::path::PathBuf;

use crate::cli::GlobalOpts;
use crate::core::identity::{EntityId, EntityPrefix};
use crate::core::{Config, Project};
use crate::schema::template::{TemplateContext, TemplateGenerator};

#[derive(clap::Args, Debug)]
pub struct NewArgs {
    /// Test point title
    #[arg(long, short = 't')]
    pub title: Option<String>,

    /// UUT nominal value
    #[arg(long, default_value_t = 10.0, allow_negative_numbers = true)]
    pub nominal: f64,

    /// Unit of the nominal
    #[arg(long, short = 'u', default_value = "V")]
    pub unit: String,

    /// UUT reading tolerance in %
    #[arg(long, default_value_t = 0.01)]
    pub tolerance: f64,

    /// Output file; defaults to testpoints/ inside a project, else stdout
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,
}

pub fn run(args: NewArgs, global: &GlobalOpts) -> Result<()> {
    let config = Config::load();
    let units = config.unit_system();
    if crate::core::units::UnitConverter::lookup(&units, &args.unit).is_none() {
        return Err(miette::miette!(
            help = "Run `tmt convert --help` for the unit table",
            "unknown unit '{}'",
            args.unit
        ));
    }

    let id = EntityId::new(EntityPrefix::Tp);
    let title = args
        .title
        .clone()
        .unwrap_or_else(|| format!("{} {}", args.nominal, args.unit));
    let ctx = TemplateContext::new(id.clone(), config.author())
        .with_title(title)
        .with_nominal(args.nominal, &args.unit)
        .with_tolerance(args.tolerance)
        .with_requirements(config.reliability(), config.required_pfa());

    let generator = TemplateGenerator::new().map_err(|e| miette::miette!("{}", e))?;
    let yaml = generator
        .generate_test_point(&ctx)
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
                    "{} Created test point {}",
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
