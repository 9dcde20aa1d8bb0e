//! End-to-end analysis of one test point
//!
//! budget -> risk at the tolerance limits -> guard band -> calibration
//! interval. Solver failures become warnings; only invalid inputs fail.

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::core::budget::{
    assemble_budget, Budget, BudgetError, BudgetInputs, ManualComponent, Measurement,
    RepeatabilitySet, Tmde,
};
use crate::core::guardband::{
    gb_multiplier_from_limits, guard_band_limits, risk_with_guard_band, GuardBandLimits,
    GuardBandProblem, GuardBandSolution, IntervalProblem, IntervalSolution, SolveError,
    SolveOutcome,
};
use crate::core::risk::{compute_risk, RiskError, RiskInputs, RiskResult, RiskTerms, ToleranceLimits};
use crate::core::tolerance::{propagate, NominalPoint, Role, ToleranceSpec};
use crate::core::units::UnitConverter;
use crate::core::warning::Warning;

#[derive(Debug, Error, Diagnostic)]
pub enum AnalysisError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Budget(#[from] BudgetError),

    #[error("risk: {0}")]
    #[diagnostic(code(tmt::risk::input))]
    Risk(#[from] RiskError),

    #[error("cannot serialize analysis inputs: {0}")]
    #[diagnostic(code(tmt::analysis::digest))]
    Digest(#[from] serde_json::Error),
}

/// Acceptance limits fixed by the user instead of solved
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ManualGuardBand {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high: Option<f64>,
}

/// Resolved risk requirements for one analysis
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskSettings {
    pub confidence: f64,
    pub reliability: f64,
    pub required_pfa: f64,
    pub required_tur: Option<f64>,
    pub precision: f64,
    /// Overrides the limits derived from the UUT tolerance
    pub limits: Option<ToleranceLimits>,
    /// Grid the guard-band limits are rounded to
    pub measuring_resolution: Option<f64>,
    pub guard_band: Option<ManualGuardBand>,
    pub calibration_interval: Option<f64>,
    /// Reliability observed at the current interval; defaults to `reliability`
    pub assumed_reliability: Option<f64>,
}

/// Everything that determines an [`AnalysisReport`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisInputs {
    pub nominal: NominalPoint,
    pub tolerance: ToleranceSpec,
    pub tmdes: Vec<Tmde>,
    pub manual: Vec<ManualComponent>,
    pub repeatability: Vec<RepeatabilitySet>,
    pub measurement: Measurement,
    pub settings: RiskSettings,
}

impl AnalysisInputs {
    /// SHA-256 of the canonical JSON form, used to skip unchanged files
    pub fn digest(&self) -> Result<String, serde_json::Error> {
        let canonical = serde_json::to_string(self)?;
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        Ok(format!("{:x}", hasher.finalize()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GuardBandReport {
    /// Absent when the limits were fixed by the user
    #[serde(skip_serializing_if = "Option::is_none")]
    pub solution: Option<GuardBandSolution>,
    pub limits: GuardBandLimits,
    /// Multiplier implied by the final (rounded or manual) limits
    #[serde(skip_serializing_if = "Option::is_none")]
    pub implied_multiplier: Option<f64>,
    pub pfa: RiskTerms,
    pub pfr: RiskTerms,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntervalReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adjusted: Option<IntervalSolution>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub with_guard_band: Option<IntervalSolution>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_reliability: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisReport {
    pub digest: String,
    pub budget: Budget,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk: Option<RiskResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guard_band: Option<GuardBandReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<IntervalReport>,
    pub warnings: Vec<Warning>,
}

/// Run the whole pipeline
pub fn analyze(
    inputs: &AnalysisInputs,
    units: &dyn UnitConverter,
) -> Result<AnalysisReport, AnalysisError> {
    let settings = &inputs.settings;
    let budget = assemble_budget(
        &BudgetInputs {
            uut_nominal: &inputs.nominal,
            uut_tolerance: &inputs.tolerance,
            tmdes: &inputs.tmdes,
            manual: &inputs.manual,
            repeatability: &inputs.repeatability,
            measurement: &inputs.measurement,
            confidence: settings.confidence,
        },
        units,
    )?;
    let mut warnings = budget.warnings.clone();

    let mut report = AnalysisReport {
        digest: inputs.digest()?,
        budget,
        risk: None,
        guard_band: None,
        interval: None,
        warnings: Vec::new(),
    };

    let Some(limits) = resolve_limits(inputs, units, &mut warnings) else {
        warnings.push(Warning::input(
            "Risk",
            "no tolerance limits; risk analysis skipped",
        ));
        report.warnings = warnings;
        return Ok(report);
    };

    let risk = compute_risk(&RiskInputs {
        limits,
        u_cal: report.budget.result.combined_native,
        expanded: report.budget.result.expanded_native,
        reliability: settings.reliability,
        required_tur: settings.required_tur,
        tmde_span: tmde_span(inputs, units, &mut warnings),
    })?;
    warnings.extend(risk.warnings.iter().cloned());

    let gb = guard_band(&risk, settings, &mut warnings);
    if let Some(interval) = settings.calibration_interval {
        report.interval = Some(interval_report(
            &risk,
            settings,
            interval,
            gb.as_ref(),
            &mut warnings,
        ));
    }
    report.guard_band = gb;
    report.risk = Some(risk);
    report.warnings = warnings;
    Ok(report)
}

fn resolve_limits(
    inputs: &AnalysisInputs,
    units: &dyn UnitConverter,
    warnings: &mut Vec<Warning>,
) -> Option<ToleranceLimits> {
    if let Some(limits) = inputs.settings.limits {
        return Some(ToleranceLimits {
            nominal: limits.nominal.or(Some(inputs.nominal.value)),
            ..limits
        });
    }
    if inputs.tolerance.is_empty() {
        return None;
    }
    match propagate(&inputs.tolerance, &inputs.nominal, Role::Uut, units) {
        Ok(prop) if prop.deviation_high > prop.deviation_low => {
            let (lower, upper) = prop.absolute_limits();
            Some(ToleranceLimits {
                lower: Some(lower),
                upper: Some(upper),
                average: None,
                nominal: Some(inputs.nominal.value),
            })
        }
        Ok(_) => None,
        Err(e) => {
            warnings.push(Warning::input("Limits", e.to_string()));
            None
        }
    }
}

/// Summed TMDE tolerance width in UUT units, weighted by quantity
fn tmde_span(
    inputs: &AnalysisInputs,
    units: &dyn UnitConverter,
    warnings: &mut Vec<Warning>,
) -> Option<f64> {
    if inputs.tmdes.is_empty() {
        return None;
    }
    let mut total = 0.0;
    for tmde in &inputs.tmdes {
        let span = propagate(&tmde.tolerance, &tmde.nominal, Role::Tmde, units)
            .map_err(|e| e.to_string())
            .and_then(|p| p.span_in(&inputs.nominal.unit, units).map_err(|e| e.to_string()));
        match span {
            Ok(s) => total += s * tmde.quantity.max(1) as f64,
            Err(e) => {
                warnings.push(Warning::units(format!("{} TAR", tmde.name), e));
                return None;
            }
        }
    }
    Some(total)
}

fn guard_band(
    risk: &RiskResult,
    settings: &RiskSettings,
    warnings: &mut Vec<Warning>,
) -> Option<GuardBandReport> {
    let topology = risk.topology;

    let (solution, limits) = match settings.guard_band {
        Some(manual) => {
            let acceptance = topology.acceptance_from_absolute(manual.low, manual.high);
            let (low, high) = topology.to_absolute(&acceptance);
            let multiplier = gb_multiplier_from_limits(&topology, low, high).unwrap_or(1.0);
            let limits = GuardBandLimits {
                low,
                high,
                multiplier,
                rounded: false,
                warnings: Vec::new(),
            };
            (None, limits)
        }
        None => {
            // The solver works from the target reliability, not the TUR-adjusted one
            let u_uut = match topology.uut_uncertainty(
                settings.reliability,
                risk.u_cal,
                &topology.tolerance(),
            ) {
                Ok(u) => u,
                Err(e) => {
                    warnings.push(Warning::numeric("Guard band", e.to_string()));
                    return None;
                }
            };
            let mut problem =
                GuardBandProblem::new(topology, u_uut, risk.u_cal, settings.required_pfa);
            problem.precision = settings.precision;
            match problem.solve() {
                Ok(solution) => {
                    let resolution = match solution.outcome {
                        SolveOutcome::NoSolutionNeeded => 0.0,
                        SolveOutcome::Converged => settings.measuring_resolution.unwrap_or(0.0),
                    };
                    let limits = guard_band_limits(&topology, solution.multiplier, resolution);
                    (Some(solution), limits)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "guard band not solved");
                    warnings.push(Warning::convergence("Guard band", e.to_string()));
                    return None;
                }
            }
        }
    };
    warnings.extend(limits.warnings.iter().cloned());

    let acceptance = topology.acceptance_from_absolute(limits.low, limits.high);
    let implied_multiplier = gb_multiplier_from_limits(&topology, limits.low, limits.high);
    match risk_with_guard_band(&topology, settings.reliability, risk.u_cal, &acceptance) {
        Ok(gb) => Some(GuardBandReport {
            solution,
            limits,
            implied_multiplier,
            pfa: gb.pfa,
            pfr: gb.pfr,
        }),
        Err(e) => {
            warnings.push(Warning::numeric("Guard band", e.to_string()));
            None
        }
    }
}

fn interval_report(
    risk: &RiskResult,
    settings: &RiskSettings,
    interval: f64,
    guard_band: Option<&GuardBandReport>,
    warnings: &mut Vec<Warning>,
) -> IntervalReport {
    let problem = IntervalProblem {
        topology: risk.topology,
        u_cal: risk.u_cal,
        target_reliability: settings.reliability,
        assumed_reliability: settings.assumed_reliability.unwrap_or(settings.reliability),
        interval,
        required_pfa: settings.required_pfa,
        tur: risk.tur,
        required_tur: settings.required_tur,
    };

    let mut record = |subject: &str, result: Result<IntervalSolution, SolveError>| match result {
        Ok(solution) => Some(solution),
        Err(e) => {
            warnings.push(Warning::convergence(subject, e.to_string()));
            None
        }
    };

    let adjusted = record("Calibration interval", problem.solve_interval());
    let required_reliability = record(
        "Required reliability",
        problem.solve_required_reliability(),
    )
    .map(|s| s.predicted_reliability);
    let with_guard_band = match guard_band.filter(|gb| gb.limits.multiplier < 1.0) {
        Some(gb) => {
            let acceptance = risk
                .topology
                .acceptance_from_absolute(gb.limits.low, gb.limits.high);
            record(
                "Guard-banded interval",
                problem.interval_with_guard_band(&acceptance),
            )
        }
        None => None,
    };

    IntervalReport {
        adjusted,
        with_guard_band,
        required_reliability,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tolerance::{Distribution, ToleranceComponent};
    use crate::core::units::UnitSystem;

    fn scenario() -> AnalysisInputs {
        AnalysisInputs {
            nominal: NominalPoint::new(10.0, "V"),
            tolerance: ToleranceSpec {
                reading: Some(ToleranceComponent::symmetric(100.0, "ppm")),
                ..Default::default()
            },
            tmdes: vec![Tmde {
                name: "Reference".to_string(),
                nominal: NominalPoint::new(10.0, "V"),
                tolerance: ToleranceSpec {
                    reading: Some(
                        ToleranceComponent::symmetric(25.0, "ppm")
                            .with_distribution(Distribution::StdUncertainty),
                    ),
                    ..Default::default()
                },
                quantity: 1,
                variable_type: None,
                instrument: None,
            }],
            manual: vec![],
            repeatability: vec![],
            measurement: Measurement::default(),
            settings: RiskSettings {
                confidence: 0.95,
                reliability: 0.95,
                required_pfa: 0.002,
                required_tur: None,
                precision: 1e-5,
                limits: None,
                measuring_resolution: None,
                guard_band: None,
                calibration_interval: None,
                assumed_reliability: None,
            },
        }
    }

    #[test]
    fn test_end_to_end_scenario() {
        let units = UnitSystem::standard();
        let report = analyze(&scenario(), &units).unwrap();
        assert!((report.budget.result.combined_native - 0.00025).abs() < 1e-12);

        let risk = report.risk.as_ref().unwrap();
        let expanded = report.budget.result.expanded_native;
        let tur = risk.tur.unwrap();
        assert!((tur - 0.002 / (2.0 * expanded)).abs() < 1e-9);
        assert!((risk.u_uut - 0.00044476709818398855).abs() < 1e-9);
        assert!((risk.pfa.total - 0.007366099294253112).abs() < 1e-7);
        assert!((risk.pfr.total - 0.032813349465208086).abs() < 1e-7);
        assert!((risk.tar.unwrap() - 4.0).abs() < 1e-9);

        let gb = report.guard_band.as_ref().unwrap();
        let solution = gb.solution.unwrap();
        assert!((solution.multiplier - 0.900390625).abs() < 1e-12);
        assert!(gb.pfa.total <= 0.002);
    }

    #[test]
    fn test_tur_adjustment_leaves_guard_band_on_target_reliability() {
        let units = UnitSystem::standard();
        let mut inputs = scenario();
        inputs.settings.required_tur = Some(4.0);
        let report = analyze(&inputs, &units).unwrap();

        // TUR 2.04 < 4 lowers the reliability used for the unguarded risk
        let risk = report.risk.as_ref().unwrap();
        assert!((risk.reliability - 0.9291031418367044).abs() < 1e-7);
        assert!((risk.u_uut - 0.000494012055420025).abs() < 1e-9);
        assert!((risk.pfa.total - 0.011816187810422037).abs() < 1e-6);
        assert!((risk.pfr.total - 0.039767798077164293).abs() < 1e-6);

        let gb = report.guard_band.as_ref().unwrap();
        assert!((gb.solution.unwrap().multiplier - 0.900390625).abs() < 1e-12);
        assert!(gb.pfa.total <= 0.002);

        inputs.settings.required_tur = None;
        let unadjusted = analyze(&inputs, &units).unwrap();
        assert_eq!(gb.pfa, unadjusted.guard_band.unwrap().pfa);
    }

    #[test]
    fn test_digest_tracks_inputs() {
        let a = scenario();
        let mut b = scenario();
        assert_eq!(a.digest().unwrap(), b.digest().unwrap());
        b.settings.reliability = 0.9;
        assert_ne!(a.digest().unwrap(), b.digest().unwrap());
        assert_eq!(a.digest().unwrap().len(), 64);
    }

    #[test]
    fn test_manual_guard_band() {
        let units = UnitSystem::standard();
        let mut inputs = scenario();
        inputs.settings.guard_band = Some(ManualGuardBand {
            low: Some(9.9991),
            high: Some(10.0009),
        });
        let report = analyze(&inputs, &units).unwrap();
        let gb = report.guard_band.unwrap();
        assert!(gb.solution.is_none());
        assert!((gb.implied_multiplier.unwrap() - 0.9).abs() < 1e-6);
        assert!(gb.pfa.total < report.risk.unwrap().pfa.total);
    }

    #[test]
    fn test_no_limits_skips_risk() {
        let units = UnitSystem::standard();
        let mut inputs = scenario();
        inputs.tolerance = ToleranceSpec::default();
        let report = analyze(&inputs, &units).unwrap();
        assert!(report.risk.is_none());
        assert!(report.warnings.iter().any(|w| w.subject == "Risk"));
    }

    #[test]
    fn test_interval_report() {
        let units = UnitSystem::standard();
        let mut inputs = scenario();
        inputs.settings.calibration_interval = Some(12.0);
        let report = analyze(&inputs, &units).unwrap();
        let interval = report.interval.unwrap();
        let adjusted = interval.adjusted.unwrap();
        assert!(adjusted.interval < 12.0);
        assert!(interval.required_reliability.unwrap() > 0.95);
        assert!(interval.with_guard_band.is_some());
    }
}
