//! Monte Carlo cross-check of the analytic decision-risk model

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::core::risk::{Acceptance, Topology};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MonteCarloRisk {
    pub samples: u32,
    pub seed: u64,
    pub pfa: f64,
    pub pfr: f64,
    /// Binomial standard error of the PFA estimate
    pub pfa_std_error: f64,
    pub pfr_std_error: f64,
}

fn normal(rng: &mut StdRng) -> f64 {
    // Box-Muller; 1 - u keeps the log argument in (0, 1]
    let u1: f64 = 1.0 - rng.random::<f64>();
    let u2: f64 = rng.random();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

fn inside(low: Option<f64>, high: Option<f64>, v: f64) -> bool {
    low.map_or(true, |l| v >= l) && high.map_or(true, |h| v <= h)
}

/// Estimate PFA and PFR by sampling true deviations and measurement errors
pub fn simulate_decision_risk(
    topology: &Topology,
    u_uut: f64,
    u_cal: f64,
    acceptance: &Acceptance,
    samples: u32,
    seed: u64,
) -> MonteCarloRisk {
    let mut rng = StdRng::seed_from_u64(seed);
    let tolerance = topology.tolerance();
    let mut false_accepts = 0u64;
    let mut false_rejects = 0u64;

    for _ in 0..samples {
        let truth = u_uut * normal(&mut rng);
        let measured = truth + u_cal * normal(&mut rng);
        let in_tolerance = inside(tolerance.low, tolerance.high, truth);
        let accepted = inside(acceptance.low, acceptance.high, measured);
        match (in_tolerance, accepted) {
            (false, true) => false_accepts += 1,
            (true, false) => false_rejects += 1,
            _ => {}
        }
    }

    let n = samples.max(1) as f64;
    let pfa = false_accepts as f64 / n;
    let pfr = false_rejects as f64 / n;
    MonteCarloRisk {
        samples,
        seed,
        pfa,
        pfr,
        pfa_std_error: (pfa * (1.0 - pfa) / n).sqrt(),
        pfr_std_error: (pfr * (1.0 - pfr) / n).sqrt(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::risk::ToleranceLimits;

    #[test]
    fn test_agrees_with_analytic_model() {
        let t = Topology::from_limits(&ToleranceLimits::two_sided(-10.0, 10.0)).unwrap();
        let acceptance = t.tolerance();
        let analytic_pfa = t.pfa(5.0, 5.0, &acceptance).total;
        let analytic_pfr = t.pfr(5.0, 5.0, &acceptance).total;
        let mc = simulate_decision_risk(&t, 5.0, 5.0, &acceptance, 500_000, 42);
        assert!(((mc.pfa - analytic_pfa) / analytic_pfa).abs() < 0.05);
        assert!(((mc.pfr - analytic_pfr) / analytic_pfr).abs() < 0.05);
    }

    #[test]
    fn test_seed_is_reproducible() {
        let t = Topology::UpperOnly {
            center: 0.0,
            upper: 1.0,
        };
        let a = simulate_decision_risk(&t, 0.5, 0.2, &t.tolerance(), 10_000, 7);
        let b = simulate_decision_risk(&t, 0.5, 0.2, &t.tolerance(), 10_000, 7);
        assert_eq!(a, b);
    }

    #[test]
    fn test_perfect_measurement_has_no_risk() {
        let t = Topology::from_limits(&ToleranceLimits::two_sided(-1.0, 1.0)).unwrap();
        let mc = simulate_decision_risk(&t, 1.0, 0.0, &t.tolerance(), 10_000, 1);
        assert_eq!(mc.pfa, 0.0);
        assert_eq!(mc.pfr, 0.0);
    }
}
