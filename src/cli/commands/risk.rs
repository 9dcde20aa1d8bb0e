//! `tmt risk` command - decision risk, guard band and interval for one test point

use console::style;
use miette::Result;
use serde::Serialize;
use std::path::PathBuf;

use crate::cli::helpers::{load_test_point, print_warnings};
use crate::cli::output::{opt, percent, print_structured, sig, Table};
use crate::cli::{GlobalOpts, OutputFormat};
use crate::core::analysis::{analyze, AnalysisReport, GuardBandReport, IntervalReport};
use crate::core::montecarlo::{simulate_decision_risk, MonteCarloRisk};
use crate::core::risk::RiskResult;
use crate::core::Config;

#[derive(clap::Args, Debug)]
pub struct RiskArgs {
    /// Test point file (*.tmt.yaml)
    pub file: PathBuf,

    /// Cross-check PFA/PFR by simulation (sample count; config default if 0)
    #[arg(long, value_name = "N", num_args = 0..=1, default_missing_value = "0")]
    pub monte_carlo: Option<u32>,

    /// Random seed for --monte-carlo
    #[arg(long, default_value_t = 1)]
    pub seed: u64,
}

#[derive(Serialize)]
struct RiskOutput<'a> {
    #[serde(flatten)]
    report: &'a AnalysisReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    monte_carlo: Option<MonteCarloRisk>,
}

pub fn run(args: RiskArgs, global: &GlobalOpts) -> Result<()> {
    let config = Config::load();
    let units = config.unit_system();
    let tp = load_test_point(&args.file)?;
    let report = analyze(&tp.analysis_inputs(&config), &units).map_err(miette::Report::new)?;

    let monte_carlo = match (args.monte_carlo, &report.risk) {
        (Some(n), Some(risk)) => {
            let samples = if n == 0 { config.monte_carlo_samples() } else { n };
            tracing::debug!(samples, seed = args.seed, "running Monte Carlo cross-check");
            Some(simulate_decision_risk(
                &risk.topology,
                risk.u_uut,
                risk.u_cal,
                &risk.topology.tolerance(),
                samples,
                args.seed,
            ))
        }
        _ => None,
    };

    let format = global.format.resolve(config.default_format.as_deref());
    let output = RiskOutput {
        report: &report,
        monte_carlo,
    };
    if print_structured(&output, format)? {
        return Ok(());
    }

    let table = summary_table(&report, monte_carlo.as_ref());
    if format != OutputFormat::Auto {
        print!("{}", table.render(format)?);
        return Ok(());
    }

    println!("{} {}", style("Risk").bold(), style(&tp.title).cyan());
    match &report.risk {
        Some(risk) => {
            print_risk(risk);
            if let Some(gb) = &report.guard_band {
                print_guard_band(gb, &report.budget.nominal.unit);
            }
            if let Some(interval) = &report.interval {
                print_interval(interval);
            }
            if let Some(mc) = &monte_carlo {
                println!();
                println!(
                    "   Monte Carlo ({} samples, seed {}): PFA {} ± {}, PFR {} ± {}",
                    mc.samples,
                    mc.seed,
                    percent(mc.pfa),
                    percent(mc.pfa_std_error),
                    percent(mc.pfr),
                    percent(mc.pfr_std_error)
                );
            }
        }
        None => println!("   {}", style("no risk analysis (no tolerance limits)").dim()),
    }
    print_warnings(&report.warnings, global.quiet);
    Ok(())
}

/// One metric per row, for csv/tsv/md output
fn summary_table(report: &AnalysisReport, mc: Option<&MonteCarloRisk>) -> Table {
    let mut table = Table::new(["Metric", "Value"]);
    let r = &report.budget.result;
    table.push(["expanded_uncertainty".to_string(), sig(r.expanded_native, 6)]);
    table.push(["k".to_string(), sig(r.k, 4)]);
    if let Some(risk) = &report.risk {
        table.push(["tur".to_string(), opt(risk.tur, 4)]);
        table.push(["tar".to_string(), opt(risk.tar, 4)]);
        table.push(["pfa".to_string(), sig(risk.pfa.total, 6)]);
        table.push(["pfr".to_string(), sig(risk.pfr.total, 6)]);
    }
    if let Some(gb) = &report.guard_band {
        table.push(["gb_multiplier".to_string(), sig(gb.limits.multiplier, 6)]);
        table.push(["gb_low".to_string(), opt(gb.limits.low, 8)]);
        table.push(["gb_high".to_string(), opt(gb.limits.high, 8)]);
        table.push(["gb_pfa".to_string(), sig(gb.pfa.total, 6)]);
        table.push(["gb_pfr".to_string(), sig(gb.pfr.total, 6)]);
    }
    if let Some(adjusted) = report.interval.as_ref().and_then(|i| i.adjusted.as_ref()) {
        table.push(["adjusted_interval".to_string(), sig(adjusted.interval, 5)]);
    }
    if let Some(mc) = mc {
        table.push(["mc_pfa".to_string(), sig(mc.pfa, 4)]);
        table.push(["mc_pfr".to_string(), sig(mc.pfr, 4)]);
    }
    table
}

fn print_risk(risk: &RiskResult) {
    println!(
        "   Tolerance:   {} ({})",
        limits_text(risk.acceptance_low, risk.acceptance_high),
        risk.topology.label()
    );
    println!(
        "   TUR:         {}    TAR: {}",
        style(opt(risk.tur, 4)).cyan(),
        opt(risk.tar, 4)
    );
    println!(
        "   uUUT:        {}   uCal: {}   uDev: {}   ρ: {}",
        sig(risk.u_uut, 4),
        sig(risk.u_cal, 4),
        sig(risk.u_dev, 4),
        sig(risk.correlation, 4)
    );
    println!("   Reliability: {}", percent(risk.reliability));
    println!(
        "   PFA:         {}  (lower {}, upper {})",
        style(percent(risk.pfa.total)).green(),
        percent(risk.pfa.lower),
        percent(risk.pfa.upper)
    );
    println!(
        "   PFR:         {}  (lower {}, upper {})",
        percent(risk.pfr.total),
        percent(risk.pfr.lower),
        percent(risk.pfr.upper)
    );
}

fn print_guard_band(gb: &GuardBandReport, unit: &str) {
    println!();
    let how = match &gb.solution {
        Some(s) => format!("solved in {} + {} steps", s.coarse_steps, s.refine_steps),
        None => "manual".to_string(),
    };
    println!(
        "   Guard band:  multiplier {} ({})",
        style(sig(gb.limits.multiplier, 6)).cyan(),
        how
    );
    println!(
        "   Acceptance:  {} {}{}",
        limits_text(gb.limits.low, gb.limits.high),
        unit,
        if gb.limits.rounded { " (rounded to resolution)" } else { "" }
    );
    if let Some(implied) = gb.implied_multiplier {
        if (implied - gb.limits.multiplier).abs() > 1e-9 {
            println!("   Implied:     multiplier {}", sig(implied, 6));
        }
    }
    println!(
        "   GB PFA:      {}    GB PFR: {}",
        style(percent(gb.pfa.total)).green(),
        percent(gb.pfr.total)
    );
}

fn print_interval(interval: &IntervalReport) {
    println!();
    if let Some(adjusted) = &interval.adjusted {
        println!(
            "   Interval:    {} (observed reliability {}{})",
            sig(adjusted.interval, 5),
            percent(adjusted.observed_reliability),
            if adjusted.clamped { ", clamped" } else { "" }
        );
    }
    if let Some(with_gb) = &interval.with_guard_band {
        println!("   With GB:     {}", sig(with_gb.interval, 5));
    }
    if let Some(required) = interval.required_reliability {
        println!("   Required R:  {}", percent(required));
    }
}

fn limits_text(low: Option<f64>, high: Option<f64>) -> String {
    match (low, high) {
        (Some(l), Some(h)) => format!("[{}, {}]", sig(l, 8), sig(h, 8)),
        (None, Some(h)) => format!("≤ {}", sig(h, 8)),
        (Some(l), None) => format!("≥ {}", sig(l, 8)),
        (None, None) => "-".to_string(),
    }
}
