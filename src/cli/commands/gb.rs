//! `tmt gb` command - solve a guard band from limits and a calibration uncertainty

use console::style;
use miette::Result;
use serde::Serialize;

use crate::cli::output::{opt, percent, print_structured, sig, Table};
use crate::cli::{GlobalOpts, OutputFormat};
use crate::core::guardband::{
    guard_band_limits, risk_with_guard_band, GuardBandLimits, GuardBandProblem, GuardBandRisk,
    GuardBandSolution, SolveOutcome,
};
use crate::core::risk::{compute_risk, RiskInputs, RiskResult, ToleranceLimits};
use crate::core::Config;

#[derive(clap::Args, Debug)]
pub struct GbArgs {
    /// Lower tolerance limit (absolute)
    #[arg(long, allow_negative_numbers = true)]
    pub low: Option<f64>,

    /// Upper tolerance limit (absolute)
    #[arg(long, allow_negative_numbers = true)]
    pub high: Option<f64>,

    /// Nominal value; centers one-sided limits
    #[arg(long, allow_negative_numbers = true)]
    pub nominal: Option<f64>,

    /// Process average; recenters the distribution when inside the limits
    #[arg(long, allow_negative_numbers = true)]
    pub average: Option<f64>,

    /// Standard calibration uncertainty, same units as the limits
    #[arg(long)]
    pub u_cal: f64,

    /// End-of-period reliability (default from config)
    #[arg(long)]
    pub reliability: Option<f64>,

    /// Required PFA (default from config)
    #[arg(long)]
    pub pfa: Option<f64>,

    /// Measuring resolution; guard-band limits are rounded inward to it
    #[arg(long)]
    pub resolution: Option<f64>,
}

#[derive(Serialize)]
struct GbOutput {
    risk: RiskResult,
    solution: GuardBandSolution,
    limits: GuardBandLimits,
    guarded: GuardBandRisk,
}

pub fn run(args: GbArgs, global: &GlobalOpts) -> Result<()> {
    let config = Config::load();
    let reliability = args.reliability.unwrap_or_else(|| config.reliability());
    let required_pfa = args.pfa.unwrap_or_else(|| config.required_pfa());

    let risk = compute_risk(&RiskInputs {
        limits: ToleranceLimits {
            lower: args.low,
            upper: args.high,
            average: args.average,
            nominal: args.nominal,
        },
        u_cal: args.u_cal,
        expanded: 0.0,
        reliability,
        required_tur: None,
        tmde_span: None,
    })
    .map_err(|e| miette::miette!(help = "Check --low/--high and --u-cal", "{}", e))?;

    let mut problem = GuardBandProblem::new(risk.topology, risk.u_uut, risk.u_cal, required_pfa);
    problem.precision = config.precision();
    let solution = problem
        .solve()
        .map_err(|e| miette::miette!("guard band not solved: {}", e))?;

    let resolution = match solution.outcome {
        SolveOutcome::Converged => args.resolution.unwrap_or(0.0),
        SolveOutcome::NoSolutionNeeded => 0.0,
    };
    let limits = guard_band_limits(&risk.topology, solution.multiplier, resolution);
    let acceptance = risk.topology.acceptance_from_absolute(limits.low, limits.high);
    let guarded = risk_with_guard_band(&risk.topology, reliability, risk.u_cal, &acceptance)
        .map_err(|e| miette::miette!("{}", e))?;

    let format = global.format.resolve(config.default_format.as_deref());
    let output = GbOutput {
        risk,
        solution,
        limits,
        guarded,
    };
    if print_structured(&output, format)? {
        return Ok(());
    }
    if format != OutputFormat::Auto {
        let mut table = Table::new(["Metric", "Value"]);
        table.push(["multiplier".to_string(), sig(output.limits.multiplier, 6)]);
        table.push(["low".to_string(), opt(output.limits.low, 8)]);
        table.push(["high".to_string(), opt(output.limits.high, 8)]);
        table.push(["pfa".to_string(), sig(output.guarded.pfa.total, 6)]);
        table.push(["pfr".to_string(), sig(output.guarded.pfr.total, 6)]);
        print!("{}", table.render(format)?);
        return Ok(());
    }

    let GbOutput {
        risk,
        solution,
        limits,
        guarded,
    } = &output;
    println!(
        "   Unguarded:   PFA {}  PFR {}  (uUUT {})",
        percent(risk.pfa.total),
        percent(risk.pfr.total),
        sig(risk.u_uut, 4)
    );
    match solution.outcome {
        SolveOutcome::NoSolutionNeeded => println!(
            "{} PFA already meets {}; no guard band needed",
            style("✓").green(),
            percent(required_pfa)
        ),
        SolveOutcome::Converged => println!(
            "{} Guard band multiplier {}",
            style("✓").green(),
            style(sig(solution.multiplier, 6)).cyan()
        ),
    }
    println!(
        "   Acceptance:  low {}  high {}",
        opt(limits.low, 8),
        opt(limits.high, 8)
    );
    println!(
        "   Guarded:     PFA {}  PFR {}",
        style(percent(guarded.pfa.total)).green(),
        percent(guarded.pfr.total)
    );
    if !global.quiet {
        for warning in risk.warnings.iter().chain(limits.warnings.iter()) {
            eprintln!("{} {}", style("!").yellow(), warning);
        }
    }
    Ok(())
}
