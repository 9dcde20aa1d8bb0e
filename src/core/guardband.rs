//! Guard-band and calibration-interval solvers
//!
//! The guard-band search shrinks the acceptance limits toward the center
//! by a multiplier until the estimated PFA meets a target: a coarse linear
//! phase in steps of 0.05, then bisection. Every loop has a hard cap.

use serde::Serialize;
use thiserror::Error;

use crate::core::risk::{Acceptance, RiskTerms, Topology};
use crate::core::warning::Warning;

/// Multiplier decrement in the coarse phase and initial bisection step
pub const COARSE_STEP: f64 = 0.05;
pub const MAX_COARSE_STEPS: usize = 200;
pub const MAX_REFINE_STEPS: usize = 50;
/// PFA band width below the target accepted as converged
pub const DEFAULT_PRECISION: f64 = 1e-5;

const MAX_INTERVAL_STEPS: usize = 20;
const INTERVAL_TOLERANCE: f64 = 1e-5;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SolveError {
    #[error("PFA target {required} cannot be reached by any guard band (PFA {pfa} at multiplier {multiplier})")]
    Unreachable {
        required: f64,
        multiplier: f64,
        pfa: f64,
    },

    #[error("no convergence after {iterations} iterations (multiplier {multiplier}, PFA {pfa})")]
    NotConverged {
        iterations: usize,
        multiplier: f64,
        pfa: f64,
    },

    #[error("undefined: {0}")]
    Undefined(String),
}

/// Solver state threaded through the search loop
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SearchState {
    pub multiplier: f64,
    pub pfa: f64,
    pub step: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SolveOutcome {
    /// PFA already met the target without a guard band
    NoSolutionNeeded,
    Converged,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GuardBandSolution {
    pub outcome: SolveOutcome,
    pub multiplier: f64,
    pub pfa: f64,
    pub coarse_steps: usize,
    pub refine_steps: usize,
}

/// A guard-band multiplier search for one topology
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GuardBandProblem {
    pub topology: Topology,
    /// UUT uncertainty at the tolerance limits
    pub u_uut: f64,
    pub u_cal: f64,
    pub required_pfa: f64,
    pub precision: f64,
}

impl GuardBandProblem {
    pub fn new(topology: Topology, u_uut: f64, u_cal: f64, required_pfa: f64) -> Self {
        Self {
            topology,
            u_uut,
            u_cal,
            required_pfa,
            precision: DEFAULT_PRECISION,
        }
    }

    /// Reliability at the tolerance limits; held fixed during the search
    fn end_of_period_reliability(&self) -> f64 {
        let u_dev = (self.u_uut.powi(2) + self.u_cal.powi(2)).sqrt();
        self.topology.reliability_at(u_dev)
    }

    /// PFA with acceptance scaled by `multiplier`, re-deriving uUUT at those limits
    fn pfa_at(&self, reliability: f64, multiplier: f64) -> Result<f64, SolveError> {
        let acceptance = self.topology.scaled(multiplier);
        let u_uut = self
            .topology
            .uut_uncertainty(reliability, self.u_cal, &acceptance)
            .map_err(|e| SolveError::Undefined(e.to_string()))?;
        Ok(self.topology.pfa(u_uut, self.u_cal, &acceptance).total)
    }

    fn within_band(&self, pfa: f64) -> bool {
        pfa >= self.required_pfa - self.precision && pfa <= self.required_pfa
    }

    pub fn solve(&self) -> Result<GuardBandSolution, SolveError> {
        if !(self.required_pfa > 0.0 && self.required_pfa < 1.0) {
            return Err(SolveError::Undefined(format!(
                "required PFA {} is outside (0, 1)",
                self.required_pfa
            )));
        }
        let reliability = self.end_of_period_reliability();
        let mut state = SearchState {
            multiplier: 1.0,
            pfa: self.pfa_at(reliability, 1.0)?,
            step: COARSE_STEP,
        };
        if state.pfa <= self.required_pfa {
            tracing::debug!(pfa = state.pfa, "no guard band needed");
            return Ok(GuardBandSolution {
                outcome: SolveOutcome::NoSolutionNeeded,
                multiplier: 1.0,
                pfa: state.pfa,
                coarse_steps: 0,
                refine_steps: 0,
            });
        }

        let mut coarse_steps = 0;
        while state.pfa > self.required_pfa {
            if coarse_steps >= MAX_COARSE_STEPS {
                tracing::warn!(multiplier = state.multiplier, "coarse guard-band search hit its cap");
                return Err(SolveError::NotConverged {
                    iterations: coarse_steps,
                    multiplier: state.multiplier,
                    pfa: state.pfa,
                });
            }
            let next = state.multiplier - COARSE_STEP;
            if next <= 0.0 {
                return Err(SolveError::Unreachable {
                    required: self.required_pfa,
                    multiplier: state.multiplier,
                    pfa: state.pfa,
                });
            }
            state.multiplier = next;
            state.pfa = self.pfa_at(reliability, next)?;
            coarse_steps += 1;
        }
        tracing::debug!(
            multiplier = state.multiplier,
            pfa = state.pfa,
            coarse_steps,
            "coarse phase done"
        );

        let mut refine_steps = 0;
        while !self.within_band(state.pfa) {
            if refine_steps >= MAX_REFINE_STEPS {
                tracing::warn!(multiplier = state.multiplier, "guard-band bisection hit its cap");
                return Err(SolveError::NotConverged {
                    iterations: coarse_steps + refine_steps,
                    multiplier: state.multiplier,
                    pfa: state.pfa,
                });
            }
            state = self.refine_step(reliability, state)?;
            refine_steps += 1;
        }
        tracing::debug!(
            multiplier = state.multiplier,
            pfa = state.pfa,
            refine_steps,
            "guard band converged"
        );

        Ok(GuardBandSolution {
            outcome: SolveOutcome::Converged,
            multiplier: state.multiplier,
            pfa: state.pfa,
            coarse_steps,
            refine_steps,
        })
    }

    /// One bisection step: halve the step, move up if under target, down if over
    fn refine_step(&self, reliability: f64, state: SearchState) -> Result<SearchState, SolveError> {
        let step = state.step / 2.0;
        let multiplier = if state.pfa < self.required_pfa {
            state.multiplier + step
        } else {
            state.multiplier - step
        };
        Ok(SearchState {
            multiplier,
            pfa: self.pfa_at(reliability, multiplier)?,
            step,
        })
    }
}

/// Round down to the resolution grid
pub fn res_down(value: f64, resolution: f64) -> f64 {
    if !(resolution > 0.0) || !value.is_finite() || value == 0.0 {
        return value;
    }
    let q = value / resolution;
    if (q - q.round()).abs() < 1e-6 {
        return q.round() * resolution;
    }
    q.floor() * resolution
}

/// Round up to the resolution grid
pub fn res_up(value: f64, resolution: f64) -> f64 {
    if !(resolution > 0.0) || !value.is_finite() || value == 0.0 {
        return value;
    }
    let q = value / resolution;
    if (q - q.round()).abs() < 1e-6 {
        return q.round() * resolution;
    }
    q.ceil() * resolution
}

/// Absolute guard-banded acceptance limits
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GuardBandLimits {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub low: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub high: Option<f64>,
    pub multiplier: f64,
    pub rounded: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<Warning>,
}

/// Apply `multiplier` and round each limit inward to `resolution`
pub fn guard_band_limits(topology: &Topology, multiplier: f64, resolution: f64) -> GuardBandLimits {
    let (raw_low, raw_high) = topology.to_absolute(&topology.scaled(multiplier));
    let mut limits = GuardBandLimits {
        low: raw_low,
        high: raw_high,
        multiplier,
        rounded: false,
        warnings: Vec::new(),
    };
    if !(resolution > 0.0) {
        return limits;
    }

    let low = raw_low.map(|l| res_up(l, resolution));
    let high = raw_high.map(|h| res_down(h, resolution));
    let center = topology.center();
    let collapsed = match (low, high) {
        (Some(l), Some(h)) => l >= h,
        (None, Some(h)) => h <= center,
        (Some(l), None) => l >= center,
        (None, None) => false,
    };
    if collapsed {
        limits.warnings.push(Warning::input(
            "Guard band",
            format!(
                "resolution {} collapses the acceptance region; limits left unrounded",
                resolution
            ),
        ));
    } else {
        limits.low = low;
        limits.high = high;
        limits.rounded = true;
    }
    limits
}

/// Multiplier implied by explicit acceptance limits
pub fn gb_multiplier_from_limits(
    topology: &Topology,
    low: Option<f64>,
    high: Option<f64>,
) -> Option<f64> {
    let c = topology.center();
    match *topology {
        Topology::TwoSided { high: tol, .. } | Topology::UpperOnly { upper: tol, .. } => {
            let h = high?;
            (tol.abs() > 0.0).then(|| (h - c).abs() / tol.abs())
        }
        Topology::LowerOnly { lower: tol, .. } => {
            let l = low?;
            (tol.abs() > 0.0).then(|| (c - l).abs() / tol.abs())
        }
    }
}

/// PFA and PFR at explicit acceptance limits
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GuardBandRisk {
    pub pfa: RiskTerms,
    pub pfr: RiskTerms,
    pub u_uut: f64,
}

/// Risk at explicit acceptance limits, with uUUT backed out at those limits
pub fn risk_with_guard_band(
    topology: &Topology,
    reliability: f64,
    u_cal: f64,
    acceptance: &Acceptance,
) -> Result<GuardBandRisk, SolveError> {
    let u_uut = topology
        .uut_uncertainty(reliability, u_cal, acceptance)
        .map_err(|e| SolveError::Undefined(e.to_string()))?;
    if u_uut <= 0.0 {
        return Err(SolveError::Undefined(
            "UUT uncertainty is zero at the guard-band limits".to_string(),
        ));
    }
    Ok(GuardBandRisk {
        pfa: topology.pfa(u_uut, u_cal, acceptance),
        pfr: topology.pfr(u_uut, u_cal, acceptance),
        u_uut,
    })
}

/// Inputs shared by the interval and reliability back-solvers
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntervalProblem {
    pub topology: Topology,
    pub u_cal: f64,
    /// Reliability target the interval is managed to
    pub target_reliability: f64,
    /// Reliability observed or assumed at the current interval
    pub assumed_reliability: f64,
    /// Current calibration interval (any time unit)
    pub interval: f64,
    pub required_pfa: f64,
    pub tur: Option<f64>,
    pub required_tur: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct IntervalSolution {
    pub interval: f64,
    pub observed_reliability: f64,
    pub predicted_reliability: f64,
    /// The search fell below the target and was clamped to it
    pub clamped: bool,
    pub iterations: usize,
}

impl IntervalProblem {
    /// Assumed reliability, adjusted for the required TUR when one is given
    pub fn observed_reliability(&self) -> Result<f64, SolveError> {
        match (self.tur, self.required_tur) {
            (Some(tur), Some(req)) => self
                .topology
                .tur_adjusted_reliability(self.assumed_reliability, self.u_cal, tur, req)
                .map_err(|e| SolveError::Undefined(e.to_string())),
            _ => Ok(self.assumed_reliability),
        }
    }

    /// PFA at the tolerance limits for a reliability; None when uUUT collapses
    fn pfa_for(&self, reliability: f64) -> Option<f64> {
        let tolerance = self.topology.tolerance();
        let u_uut = self
            .topology
            .uut_uncertainty(reliability, self.u_cal, &tolerance)
            .ok()?;
        (u_uut > 0.0).then(|| self.topology.pfa(u_uut, self.u_cal, &tolerance).total)
    }

    /// Reliability that brings PFA to the requirement, never below the target
    pub fn solve_required_reliability(&self) -> Result<IntervalSolution, SolveError> {
        let observed = self.observed_reliability()?;
        let undefined = || SolveError::Undefined("PFA is undefined at this reliability".to_string());
        let mut pfa = self.pfa_for(observed).ok_or_else(undefined)?;

        if pfa <= self.required_pfa {
            return Ok(IntervalSolution {
                interval: self.interval,
                observed_reliability: observed,
                predicted_reliability: self.target_reliability,
                clamped: false,
                iterations: 0,
            });
        }

        let mut predicted = 1.0 - (1.0 - observed).abs() / 2.0;
        pfa = self.pfa_for(predicted).ok_or_else(undefined)?;
        let mut change = (predicted - observed).abs();
        let mut iterations = 1;
        while (pfa - self.required_pfa).abs() >= INTERVAL_TOLERANCE && iterations < MAX_INTERVAL_STEPS {
            change /= 2.0;
            predicted += if pfa < self.required_pfa { -change } else { change };
            if let Some(p) = self.pfa_for(predicted) {
                pfa = p;
            }
            iterations += 1;
        }

        let mut clamped = false;
        if predicted < self.target_reliability {
            predicted = self.target_reliability;
            clamped = true;
        }
        if !clamped && (pfa - self.required_pfa).abs() >= INTERVAL_TOLERANCE {
            return Err(SolveError::NotConverged {
                iterations,
                multiplier: predicted,
                pfa,
            });
        }

        Ok(IntervalSolution {
            interval: self.interval,
            observed_reliability: observed,
            predicted_reliability: predicted,
            clamped,
            iterations,
        })
    }

    /// Calibration interval scaled by the exponential reliability model
    pub fn solve_interval(&self) -> Result<IntervalSolution, SolveError> {
        let mut solution = self.solve_required_reliability()?;
        solution.interval = scale_interval(
            self.interval,
            solution.predicted_reliability,
            solution.observed_reliability,
        )?;
        Ok(solution)
    }

    /// Interval when measurements are accepted at guard-banded limits
    pub fn interval_with_guard_band(
        &self,
        acceptance: &Acceptance,
    ) -> Result<IntervalSolution, SolveError> {
        let observed = self.observed_reliability()?;
        let bias = self
            .topology
            .uut_uncertainty(self.target_reliability, self.u_cal, acceptance)
            .map_err(|e| SolveError::Undefined(e.to_string()))?;
        let u_dev = (self.u_cal.powi(2) + bias.powi(2)).sqrt();
        let predicted = self.topology.reliability_at(u_dev);
        Ok(IntervalSolution {
            interval: scale_interval(self.interval, predicted, observed)?,
            observed_reliability: observed,
            predicted_reliability: predicted,
            clamped: false,
            iterations: 0,
        })
    }
}

fn scale_interval(interval: f64, predicted: f64, observed: f64) -> Result<f64, SolveError> {
    if !(observed > 0.0 && observed < 1.0) || !(predicted > 0.0 && predicted < 1.0) {
        return Err(SolveError::Undefined(format!(
            "reliabilities must lie in (0, 1): predicted {}, observed {}",
            predicted, observed
        )));
    }
    let scaled = predicted.ln() / observed.ln() * interval;
    if scaled > 0.0 && scaled.is_finite() {
        Ok(scaled)
    } else {
        Err(SolveError::Undefined(format!("interval {} is not positive", scaled)))
    }
}
