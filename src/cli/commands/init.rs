//! `tmt init` command - Initialize a new TMT project

use console::style;
use miette::{IntoDiagnostic, Result};
use std::path::Path;

use crate::cli::GlobalOpts;
use crate::core::identity::EntityPrefix;
use crate::core::project::{Project, ProjectError};

#[derive(clap::Args, Debug)]
pub struct InitArgs {
    /// Directory to initialize (default: current directory)
    #[arg(default_value = ".")]
    pub path: std::path::PathBuf,

    /// Rewrite .tmt/config.yaml even if the project exists
    #[arg(long)]
    pub force: bool,
}

pub fn run(args: InitArgs, global: &GlobalOpts) -> Result<()> {
    let path = if args.path.as_os_str() == "." {
        std::env::current_dir().into_diagnostic()?
    } else {
        args.path.clone()
    };

    if !path.exists() {
        std::fs::create_dir_all(&path).into_diagnostic()?;
        if !global.quiet {
            println!(
                "{} Created directory {}",
                style("✓").green(),
                style(path.display()).cyan()
            );
        }
    }

    let project = if args.force {
        Project::init_force(&path)
    } else {
        Project::init(&path)
    };

    match project {
        Ok(project) => {
            println!(
                "{} Initialized TMT project at {}",
                style("✓").green(),
                style(project.root().display()).cyan()
            );
            if !global.quiet {
                println!();
                print_structure(project.root());
                println!();
                println!("Next steps:");
                println!("  {} Create a test point", style("tmt new --nominal 10 --unit V").yellow());
                println!("  {} Analyze every test point", style("tmt analyze testpoints").yellow());
            }
            Ok(())
        }
        Err(ProjectError::AlreadyExists(path)) => {
            println!(
                "{} TMT project already exists at {}",
                style("!").yellow(),
                style(path.display()).cyan()
            );
            println!("Use {} to reinitialize", style("tmt init --force").yellow());
            Ok(())
        }
        Err(e) => Err(miette::miette!("{}", e)),
    }
}

fn print_structure(root: &Path) {
    let entries = std::iter::once(".tmt/config.yaml".to_string())
        .chain(EntityPrefix::all().iter().map(|p| format!("{}/", p.directory())));
    for entry in entries {
        if root.join(&entry).exists() {
            println!("  {}", style(entry).dim());
        }
    }
}
