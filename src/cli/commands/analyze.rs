//! `tmt analyze` command - batch analysis with stored results

use console::style;
use miette::{IntoDiagnostic, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::cli::helpers::{load_test_point, truncate_str};
use crate::cli::output::{opt, print_structured, sig, Table};
use crate::cli::{GlobalOpts, OutputFormat};
use crate::core::analysis::analyze;
use crate::core::identity::EntityPrefix;
use crate::core::project::{collect_documents, Project};
use crate::core::units::UnitSystem;
use crate::core::Config;
use crate::entities::test_point::StoredResults;

#[derive(clap::Args, Debug)]
pub struct AnalyzeArgs {
    /// Test point files or directories to scan for *.tmt.yaml
    /// (default: the project's testpoints/)
    pub paths: Vec<PathBuf>,

    /// Store results back into each file
    #[arg(long, short = 'w')]
    pub write: bool,

    /// Re-analyze files whose stored results are current
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
enum FileStatus {
    Analyzed,
    Written,
    Current,
    Failed,
}

#[derive(Debug, Serialize)]
struct FileSummary {
    file: PathBuf,
    status: FileStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    results: Option<StoredResults>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

pub fn run(args: AnalyzeArgs, global: &GlobalOpts) -> Result<()> {
    let config = Config::load();
    let units = config.unit_system();

    let mut files = Vec::new();
    if args.paths.is_empty() {
        let project = Project::discover().map_err(|e| miette::miette!("{}", e))?;
        files.extend(project.iter_entity_files(EntityPrefix::Tp));
    }
    for path in &args.paths {
        if !path.exists() {
            return Err(miette::miette!("path not found: {}", path.display()));
        }
        files.extend(collect_documents(path));
    }
    if files.is_empty() {
        println!("{} No test point files found", style("!").yellow());
        return Ok(());
    }

    let summaries: Vec<FileSummary> = files
        .iter()
        .map(|file| analyze_file(file, &args, &config, &units))
        .collect();
    let failed = summaries
        .iter()
        .filter(|s| matches!(s.status, FileStatus::Failed))
        .count();

    let format = global.format.resolve(config.default_format.as_deref());
    if !print_structured(&summaries, format)? {
        print!("{}", summary_table(&summaries).render(format)?);
        if format == OutputFormat::Auto && !global.quiet {
            for s in summaries.iter().filter(|s| s.error.is_some()) {
                eprintln!(
                    "{} {}: {}",
                    style("✗").red(),
                    s.file.display(),
                    s.error.as_deref().unwrap_or_default()
                );
            }
            println!(
                "{} {} file(s), {} failed",
                style("⚙").cyan(),
                summaries.len(),
                failed
            );
        }
    }

    if failed > 0 {
        return Err(miette::miette!("{} of {} file(s) failed", failed, summaries.len()));
    }
    Ok(())
}

fn analyze_file(file: &Path, args: &AnalyzeArgs, config: &Config, units: &UnitSystem) -> FileSummary {
    let failed = |error: String| FileSummary {
        file: file.to_path_buf(),
        status: FileStatus::Failed,
        results: None,
        error: Some(error),
    };

    let mut tp = match load_test_point(file) {
        Ok(tp) => tp,
        Err(e) => return failed(e.to_string()),
    };
    let inputs = tp.analysis_inputs(config);
    if !args.force && tp.is_current(&inputs) {
        tracing::info!(file = %file.display(), "stored results are current");
        return FileSummary {
            file: file.to_path_buf(),
            status: FileStatus::Current,
            results: tp.results.clone(),
            error: None,
        };
    }

    let report = match analyze(&inputs, units) {
        Ok(report) => report,
        Err(e) => return failed(e.to_string()),
    };
    let results = StoredResults::from_report(&report);
    tracing::info!(
        file = %file.display(),
        pfa = ?results.pfa,
        warnings = results.warnings.len(),
        "analyzed"
    );

    let mut status = FileStatus::Analyzed;
    if args.write {
        tp.results = Some(results.clone());
        if let Err(e) = write_back(file, &tp) {
            return failed(e.to_string());
        }
        status = FileStatus::Written;
    }
    FileSummary {
        file: file.to_path_buf(),
        status,
        results: Some(results),
        error: None,
    }
}

fn write_back<T: Serialize>(file: &Path, doc: &T) -> Result<()> {
    let yaml = serde_yml::to_string(doc).into_diagnostic()?;
    std::fs::write(file, yaml).into_diagnostic()
}

fn summary_table(summaries: &[FileSummary]) -> Table {
    let mut table = Table::new(["File", "Status", "U", "TUR", "PFA", "PFR", "GB"]);
    for s in summaries {
        let status = match s.status {
            FileStatus::Analyzed => "analyzed",
            FileStatus::Written => "written",
            FileStatus::Current => "current",
            FileStatus::Failed => "failed",
        };
        let name = s
            .file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let mut row = vec![truncate_str(&name, 40), status.to_string()];
        match &s.results {
            Some(r) => row.extend([
                sig(r.expanded_uncertainty, 4),
                opt(r.tur, 3),
                opt(r.pfa, 4),
                opt(r.pfr, 4),
                opt(r.gb_multiplier, 5),
            ]),
            None => row.extend(vec!["-".to_string(); 5]),
        }
        table.push(row);
    }
    table
}
