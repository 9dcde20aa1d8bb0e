//! `tmt budget` command - print the uncertainty budget of a test point

use console::style;
use miette::Result;
use std::path::PathBuf;

use crate::cli::helpers::{load_test_point, print_warnings, truncate_str};
use crate::cli::output::{print_structured, sig, Table};
use crate::cli::{GlobalOpts, OutputFormat};
use crate::core::budget::{assemble_budget, Budget, BudgetInputs, MeasurementMode};
use crate::core::Config;

#[derive(clap::Args, Debug)]
pub struct BudgetArgs {
    /// Test point file (*.tmt.yaml)
    pub file: PathBuf,
}

pub fn run(args: BudgetArgs, global: &GlobalOpts) -> Result<()> {
    let config = Config::load();
    let units = config.unit_system();
    let tp = load_test_point(&args.file)?;
    let settings = tp.settings(&config);

    let budget = assemble_budget(
        &BudgetInputs {
            uut_nominal: &tp.uut.nominal,
            uut_tolerance: &tp.uut.tolerance,
            tmdes: &tp.tmde,
            manual: &tp.manual,
            repeatability: &tp.repeatability,
            measurement: &tp.measurement,
            confidence: settings.confidence,
        },
        &units,
    )
    .map_err(miette::Report::new)?;

    let format = global.format.resolve(config.default_format.as_deref());
    if print_structured(&budget, format)? {
        return Ok(());
    }

    if format == OutputFormat::Auto && !global.quiet {
        println!(
            "{} {} ({} {})",
            style("Budget").bold(),
            style(&tp.title).cyan(),
            sig(tp.uut.nominal.value, 6),
            tp.uut.nominal.unit
        );
    }
    print!("{}", budget_table(&budget).render(format)?);
    if format == OutputFormat::Auto {
        println!();
        print_result(&budget);
    }
    print_warnings(&budget.warnings, global.quiet);
    Ok(())
}

/// Percent share of the combined variance per row
pub(crate) fn variance_shares(budget: &Budget) -> Vec<f64> {
    let direct = budget.result.mode == MeasurementMode::Direct;
    let variances: Vec<f64> = budget
        .components
        .iter()
        .map(|c| {
            let x = c.contribution.unwrap_or(c.value);
            let weight = if direct { c.quantity as f64 } else { 1.0 };
            x * x * weight
        })
        .collect();
    let total: f64 = variances.iter().sum();
    variances
        .iter()
        .map(|v| if total > 0.0 { v / total * 100.0 } else { 0.0 })
        .collect()
}

pub(crate) fn budget_table(budget: &Budget) -> Table {
    let unit = &budget.nominal.unit;
    let mut table = Table::new([
        "Component".to_string(),
        "Type".to_string(),
        "u (ppm)".to_string(),
        format!("u ({})", unit),
        "dof".to_string(),
        "Distribution".to_string(),
        "ci".to_string(),
        "Contribution".to_string(),
    ]);
    for (c, share) in budget.components.iter().zip(variance_shares(budget)) {
        let name = if c.quantity > 1 {
            format!("{} (x{})", c.name, c.quantity)
        } else {
            c.name.clone()
        };
        table.push([
            truncate_str(&name, 36),
            c.uncertainty_type.to_string(),
            sig(c.ppm, 4),
            format!("{} {}", sig(c.value, 4), c.unit),
            c.dof.to_string(),
            c.distribution.clone(),
            c.sensitivity.map(|s| sig(s, 4)).unwrap_or_else(|| "1".to_string()),
            format!("{:.1}%", share),
        ]);
    }
    table
}

pub(crate) fn print_result(budget: &Budget) {
    let r = &budget.result;
    let unit = &budget.nominal.unit;
    println!(
        "   Combined u:  {} ppm  ({} {})",
        sig(r.combined_ppm, 4),
        sig(r.combined_native, 4),
        unit
    );
    println!("   dof (eff):   {}", r.effective_dof);
    println!(
        "   k:           {} at {:.2}% confidence",
        sig(r.k, 4),
        r.confidence * 100.0
    );
    println!(
        "   Expanded U:  {} ppm  ({} {})",
        style(sig(r.expanded_ppm, 4)).green(),
        sig(r.expanded_native, 4),
        unit
    );
    if let Some(value) = budget.nominal_result {
        println!("   Equation:    {} {}", sig(value, 8), unit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::budget::BudgetComponent;
    use crate::core::budget::{combine_budget, Dof, UncertaintyType};
    use crate::core::tolerance::NominalPoint;

    fn row(value: f64, quantity: u32) -> BudgetComponent {
        BudgetComponent {
            name: "x".to_string(),
            source: "Manual".to_string(),
            uncertainty_type: UncertaintyType::B,
            value,
            unit: "V".to_string(),
            ppm: value * 1e5,
            dof: Dof::Infinite,
            distribution: "Normal".to_string(),
            quantity,
            sensitivity: None,
            contribution: None,
        }
    }

    #[test]
    fn test_variance_shares_weight_quantity() {
        let components = vec![row(1.0, 1), row(1.0, 3)];
        let result = combine_budget(&components, MeasurementMode::Direct, 0.95).unwrap();
        let budget = Budget {
            nominal: NominalPoint::new(10.0, "V"),
            components,
            result,
            nominal_result: None,
            warnings: vec![],
        };
        let shares = variance_shares(&budget);
        assert!((shares[0] - 25.0).abs() < 1e-9);
        assert!((shares[1] - 75.0).abs() < 1e-9);
        assert!(budget_table(&budget).render(OutputFormat::Csv).unwrap().contains("x (x3)"));
    }
}
