//! Calibration decision risk
//!
//! Models the unit under test's true deviation `x ~ N(0, uUUT)` and the
//! measured deviation `y = x + e`, `e ~ N(0, uCal)`. False accept is
//! `x` out of tolerance while `y` is accepted; false reject is the reverse.
//! Both are evaluated with the bivariate normal CDF at correlation
//! `ρ = uUUT / uDev`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::special::{bivariate_norm_cdf, norm_cdf, norm_inv, DomainError};
use crate::core::warning::Warning;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RiskError {
    #[error("no tolerance limits given")]
    NoLimits,

    #[error("lower limit {low} is not below upper limit {high}")]
    InvertedLimits { low: f64, high: f64 },

    #[error("reliability {0} must lie strictly between 0 and 1")]
    Reliability(f64),

    #[error("a one-sided limit needs an average or nominal value")]
    MissingCenter,

    #[error("center {center} is not inside the one-sided limit {limit}")]
    CenterOutsideLimit { center: f64, limit: f64 },

    #[error("calibration uncertainty {0} must be a finite, non-negative number")]
    Uncertainty(f64),

    #[error("tolerance limit {0} is not a finite number")]
    NonFiniteLimit(f64),
}

impl From<DomainError> for RiskError {
    fn from(e: DomainError) -> Self {
        let DomainError::Probability(p) = e;
        RiskError::Reliability(p)
    }
}

/// Absolute tolerance limits as entered; either side may be absent
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ToleranceLimits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lower: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upper: Option<f64>,
    /// Process average, the center for one-sided limits
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nominal: Option<f64>,
}

impl ToleranceLimits {
    pub fn two_sided(lower: f64, upper: f64) -> Self {
        Self {
            lower: Some(lower),
            upper: Some(upper),
            ..Default::default()
        }
    }
}

/// Shape of the tolerance; limits are stored as deviations from `center`
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Topology {
    TwoSided { center: f64, low: f64, high: f64 },
    UpperOnly { center: f64, upper: f64 },
    LowerOnly { center: f64, lower: f64 },
}

/// Acceptance limits as deviations from the topology center
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Acceptance {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub low: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub high: Option<f64>,
}

impl Topology {
    pub fn from_limits(limits: &ToleranceLimits) -> Result<Self, RiskError> {
        for v in [limits.lower, limits.upper].into_iter().flatten() {
            if !v.is_finite() {
                return Err(RiskError::NonFiniteLimit(v));
            }
        }
        match (limits.lower, limits.upper) {
            (None, None) => Err(RiskError::NoLimits),
            (Some(low), Some(high)) => {
                if low >= high {
                    return Err(RiskError::InvertedLimits { low, high });
                }
                let mut center = (low + high) / 2.0;
                // an off-center process average inside the limits takes over
                if let Some(avg) = limits.average {
                    if avg > low && avg < high {
                        center = avg;
                    }
                }
                Ok(Topology::TwoSided {
                    center,
                    low: low - center,
                    high: high - center,
                })
            }
            (None, Some(upper)) => {
                let center = limits
                    .average
                    .or(limits.nominal)
                    .ok_or(RiskError::MissingCenter)?;
                if center >= upper {
                    return Err(RiskError::CenterOutsideLimit {
                        center,
                        limit: upper,
                    });
                }
                Ok(Topology::UpperOnly {
                    center,
                    upper: upper - center,
                })
            }
            (Some(lower), None) => {
                let center = limits
                    .average
                    .or(limits.nominal)
                    .ok_or(RiskError::MissingCenter)?;
                if center <= lower {
                    return Err(RiskError::CenterOutsideLimit {
                        center,
                        limit: lower,
                    });
                }
                Ok(Topology::LowerOnly {
                    center,
                    lower: lower - center,
                })
            }
        }
    }

    pub fn center(&self) -> f64 {
        match *self {
            Topology::TwoSided { center, .. }
            | Topology::UpperOnly { center, .. }
            | Topology::LowerOnly { center, .. } => center,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Topology::TwoSided { .. } => "two-sided",
            Topology::UpperOnly { .. } => "upper only",
            Topology::LowerOnly { .. } => "lower only",
        }
    }

    /// Tolerance limits as deviations from the center
    pub fn tolerance(&self) -> Acceptance {
        self.scaled(1.0)
    }

    /// Tolerance limits scaled toward the center by `multiplier`
    pub fn scaled(&self, multiplier: f64) -> Acceptance {
        match *self {
            Topology::TwoSided { low, high, .. } => Acceptance {
                low: Some(low * multiplier),
                high: Some(high * multiplier),
            },
            Topology::UpperOnly { upper, .. } => Acceptance {
                low: None,
                high: Some(upper * multiplier),
            },
            Topology::LowerOnly { lower, .. } => Acceptance {
                low: Some(lower * multiplier),
                high: None,
            },
        }
    }

    /// Acceptance limits from absolute values; a missing side keeps the tolerance limit
    pub fn acceptance_from_absolute(&self, low: Option<f64>, high: Option<f64>) -> Acceptance {
        let tol = self.tolerance();
        let c = self.center();
        Acceptance {
            low: tol.low.map(|t| low.map_or(t, |l| l - c)),
            high: tol.high.map(|t| high.map_or(t, |h| h - c)),
        }
    }

    pub fn to_absolute(&self, acceptance: &Acceptance) -> (Option<f64>, Option<f64>) {
        let c = self.center();
        (acceptance.low.map(|l| l + c), acceptance.high.map(|h| h + c))
    }

    /// Total deviation uncertainty that puts `reliability` of units inside `bounds`
    pub fn deviation_uncertainty(
        &self,
        reliability: f64,
        bounds: &Acceptance,
    ) -> Result<f64, DomainError> {
        match self {
            Topology::TwoSided { .. } => {
                let half = (bounds.high.unwrap_or(0.0) - bounds.low.unwrap_or(0.0)).abs() / 2.0;
                Ok(half / norm_inv((1.0 + reliability) / 2.0)?)
            }
            Topology::UpperOnly { .. } => Ok(bounds.high.unwrap_or(0.0).abs() / norm_inv(reliability)?),
            Topology::LowerOnly { .. } => {
                Ok(bounds.low.unwrap_or(0.0) / norm_inv(1.0 - reliability)?)
            }
        }
    }

    /// UUT true-value uncertainty implied by `reliability`; 0 when uCal dominates
    pub fn uut_uncertainty(
        &self,
        reliability: f64,
        u_cal: f64,
        bounds: &Acceptance,
    ) -> Result<f64, DomainError> {
        let u_dev = self.deviation_uncertainty(reliability, bounds)?;
        let v = u_dev * u_dev - u_cal * u_cal;
        Ok(if v > 0.0 { v.sqrt() } else { 0.0 })
    }

    /// Fraction of units inside tolerance for a total deviation uncertainty
    pub fn reliability_at(&self, u_dev: f64) -> f64 {
        match *self {
            Topology::TwoSided { low, high, .. } => norm_cdf(high / u_dev) - norm_cdf(low / u_dev),
            Topology::UpperOnly { upper, .. } => norm_cdf(upper / u_dev),
            Topology::LowerOnly { lower, .. } => 1.0 - norm_cdf(lower / u_dev),
        }
    }

    /// Probability of false accept at the given acceptance limits
    pub fn pfa(&self, u_uut: f64, u_cal: f64, acceptance: &Acceptance) -> RiskTerms {
        let (u_dev, rho) = joint(u_uut, u_cal);
        let bvn = |x: f64, y: f64| bivariate_norm_cdf(x, y, rho);
        match *self {
            Topology::TwoSided { low, high, .. } => {
                let (al, au) = (acceptance.low.unwrap_or(low), acceptance.high.unwrap_or(high));
                RiskTerms::new(
                    bvn(low / u_uut, au / u_dev) - bvn(low / u_uut, al / u_dev),
                    bvn(-high / u_uut, -al / u_dev) - bvn(-high / u_uut, -au / u_dev),
                )
            }
            Topology::UpperOnly { upper, .. } => {
                let au = acceptance.high.unwrap_or(upper);
                RiskTerms::new(
                    0.0,
                    1.0 - norm_cdf(upper / u_uut) - bvn(-upper / u_uut, -au / u_dev),
                )
            }
            Topology::LowerOnly { lower, .. } => {
                let al = acceptance.low.unwrap_or(lower);
                RiskTerms::new(
                    norm_cdf(lower / u_uut) - bvn(lower / u_uut, al / u_dev),
                    0.0,
                )
            }
        }
    }

    /// Probability of false reject at the given acceptance limits
    pub fn pfr(&self, u_uut: f64, u_cal: f64, acceptance: &Acceptance) -> RiskTerms {
        let (u_dev, rho) = joint(u_uut, u_cal);
        let bvn = |x: f64, y: f64| bivariate_norm_cdf(x, y, rho);
        match *self {
            Topology::TwoSided { low, high, .. } => {
                let (al, au) = (acceptance.low.unwrap_or(low), acceptance.high.unwrap_or(high));
                RiskTerms::new(
                    bvn(high / u_uut, al / u_dev) - bvn(low / u_uut, al / u_dev),
                    bvn(-low / u_uut, -au / u_dev) - bvn(-high / u_uut, -au / u_dev),
                )
            }
            Topology::UpperOnly { upper, .. } => {
                let au = acceptance.high.unwrap_or(upper);
                RiskTerms::new(0.0, norm_cdf(upper / u_uut) - bvn(upper / u_uut, au / u_dev))
            }
            Topology::LowerOnly { lower, .. } => {
                let al = acceptance.low.unwrap_or(lower);
                RiskTerms::new(
                    1.0 - norm_cdf(lower / u_uut) - bvn(-lower / u_uut, -al / u_dev),
                    0.0,
                )
            }
        }
    }

    /// Tolerance width over the expanded uncertainty
    pub fn tur(&self, expanded: f64) -> Option<f64> {
        if !(expanded > 0.0) {
            return None;
        }
        Some(match *self {
            Topology::TwoSided { low, high, .. } => ((high - low) / (2.0 * expanded)).abs(),
            Topology::UpperOnly { upper, .. } => (upper / expanded).abs(),
            Topology::LowerOnly { lower, .. } => (lower / expanded).abs(),
        })
    }

    /// Tolerance width over the TMDE tolerance width
    pub fn tar(&self, tmde_span: f64) -> Option<f64> {
        if !(tmde_span > 0.0) {
            return None;
        }
        Some(match *self {
            Topology::TwoSided { low, high, .. } => ((high - low) / tmde_span).abs(),
            Topology::UpperOnly { upper, .. } => (upper / (tmde_span / 2.0)).abs(),
            Topology::LowerOnly { lower, .. } => (lower / (tmde_span / 2.0)).abs(),
        })
    }

    /// Reliability re-estimated as if the calibration had just met `required_tur`
    pub fn tur_adjusted_reliability(
        &self,
        reliability: f64,
        u_cal: f64,
        tur: f64,
        required_tur: f64,
    ) -> Result<f64, DomainError> {
        if !(required_tur > 0.0) || !(tur > 0.0) {
            return Ok(reliability);
        }
        let assumed_cal = u_cal * tur / required_tur;
        let bias = self.uut_uncertainty(reliability, assumed_cal, &self.tolerance())?;
        let u_dev = (u_cal * u_cal + bias * bias).sqrt();
        Ok(self.reliability_at(u_dev))
    }
}

fn joint(u_uut: f64, u_cal: f64) -> (f64, f64) {
    let u_dev = (u_uut * u_uut + u_cal * u_cal).sqrt();
    let rho = if u_uut > 0.0 && u_dev > 0.0 {
        u_uut / u_dev
    } else {
        0.0
    };
    (u_dev, rho)
}

/// A probability split into its lower-tail and upper-tail terms
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RiskTerms {
    pub total: f64,
    pub lower: f64,
    pub upper: f64,
    /// A term evaluated to NaN and was counted as 0
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub undefined: bool,
}

impl RiskTerms {
    fn new(lower: f64, upper: f64) -> Self {
        let undefined = lower.is_nan() || upper.is_nan();
        let lower = if lower.is_nan() { 0.0 } else { lower.max(0.0) };
        let upper = if upper.is_nan() { 0.0 } else { upper.max(0.0) };
        Self {
            total: lower + upper,
            lower,
            upper,
            undefined,
        }
    }
}

/// What [`compute_risk`] needs from the budget and the test point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskInputs {
    pub limits: ToleranceLimits,
    /// Combined standard uncertainty, UUT units
    pub u_cal: f64,
    /// Expanded uncertainty, UUT units
    pub expanded: f64,
    /// Target in-tolerance probability
    pub reliability: f64,
    pub required_tur: Option<f64>,
    /// Summed TMDE tolerance width, UUT units
    pub tmde_span: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskResult {
    pub topology: Topology,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tur: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tar: Option<f64>,
    pub pfa: RiskTerms,
    pub pfr: RiskTerms,
    pub u_cal: f64,
    pub u_uut: f64,
    pub u_dev: f64,
    pub correlation: f64,
    /// Reliability used after any TUR adjustment
    pub reliability: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acceptance_low: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acceptance_high: Option<f64>,
    pub warnings: Vec<Warning>,
}

/// PFA/PFR, TUR and TAR with acceptance at the tolerance limits
pub fn compute_risk(inputs: &RiskInputs) -> Result<RiskResult, RiskError> {
    let RiskInputs {
        limits,
        u_cal,
        expanded,
        reliability,
        required_tur,
        tmde_span,
    } = *inputs;
    if !(reliability > 0.0 && reliability < 1.0) {
        return Err(RiskError::Reliability(reliability));
    }
    if !u_cal.is_finite() || u_cal < 0.0 {
        return Err(RiskError::Uncertainty(u_cal));
    }
    let topology = Topology::from_limits(&limits)?;
    let mut warnings = Vec::new();

    let tur = topology.tur(expanded);
    let tar = tmde_span.and_then(|s| topology.tar(s));

    let reliability = match (required_tur, tur) {
        (Some(req), Some(tur)) => topology.tur_adjusted_reliability(reliability, u_cal, tur, req)?,
        _ => reliability,
    };

    let acceptance = topology.tolerance();
    let u_uut = topology.uut_uncertainty(reliability, u_cal, &acceptance)?;
    if u_uut == 0.0 {
        tracing::warn!(u_cal, reliability, "UUT uncertainty collapsed to zero");
        warnings.push(Warning::numeric(
            "uUUT",
            "calibration uncertainty exceeds deviation uncertainty for this reliability",
        ));
    } else if u_uut <= u_cal / 10.0 {
        warnings.push(Warning::numeric(
            "uUUT",
            "UUT uncertainty is at most a tenth of the calibration uncertainty; risk figures are unreliable",
        ));
    }

    let pfa = topology.pfa(u_uut, u_cal, &acceptance);
    let pfr = topology.pfr(u_uut, u_cal, &acceptance);
    for (name, terms) in [("PFA", &pfa), ("PFR", &pfr)] {
        if terms.undefined {
            warnings.push(Warning::numeric(name, "a term was undefined and counted as 0"));
        }
    }

    let (u_dev, correlation) = joint(u_uut, u_cal);
    let (acceptance_low, acceptance_high) = topology.to_absolute(&acceptance);
    tracing::debug!(pfa = pfa.total, pfr = pfr.total, u_uut, "risk computed");

    Ok(RiskResult {
        topology,
        tur,
        tar,
        pfa,
        pfr,
        u_cal,
        u_uut,
        u_dev,
        correlation,
        reliability,
        acceptance_low,
        acceptance_high,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const U_REF: f64 = 3.6077539524405324;

    fn symmetric_inputs(u_cal: f64) -> RiskInputs {
        RiskInputs {
            limits: ToleranceLimits::two_sided(-10.0, 10.0),
            u_cal,
            expanded: 1.959964 * u_cal,
            reliability: 0.95,
            required_tur: None,
            tmde_span: None,
        }
    }

    #[test]
    fn test_topology_selection() {
        let t = Topology::from_limits(&ToleranceLimits::two_sided(9.0, 11.0)).unwrap();
        assert_eq!(
            t,
            Topology::TwoSided {
                center: 10.0,
                low: -1.0,
                high: 1.0
            }
        );

        let t = Topology::from_limits(&ToleranceLimits {
            upper: Some(5.0),
            average: Some(2.0),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(t, Topology::UpperOnly { center: 2.0, upper: 3.0 });

        let t = Topology::from_limits(&ToleranceLimits {
            lower: Some(1.0),
            nominal: Some(4.0),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(t, Topology::LowerOnly { center: 4.0, lower: -3.0 });
    }

    #[test]
    fn test_topology_rejects_bad_limits() {
        assert_eq!(
            Topology::from_limits(&ToleranceLimits::default()),
            Err(RiskError::NoLimits)
        );
        assert!(matches!(
            Topology::from_limits(&ToleranceLimits::two_sided(2.0, 1.0)),
            Err(RiskError::InvertedLimits { .. })
        ));
        assert_eq!(
            Topology::from_limits(&ToleranceLimits {
                upper: Some(1.0),
                ..Default::default()
            }),
            Err(RiskError::MissingCenter)
        );
        assert!(matches!(
            Topology::from_limits(&ToleranceLimits {
                upper: Some(1.0),
                average: Some(2.0),
                ..Default::default()
            }),
            Err(RiskError::CenterOutsideLimit { .. })
        ));
    }

    #[test]
    fn test_average_recenters_two_sided() {
        let t = Topology::from_limits(&ToleranceLimits {
            lower: Some(0.0),
            upper: Some(10.0),
            average: Some(4.0),
            nominal: None,
        })
        .unwrap();
        assert_eq!(t.center(), 4.0);
        assert_eq!(t.tolerance().low, Some(-4.0));
    }

    #[test]
    fn test_uut_uncertainty_back_out() {
        let t = Topology::from_limits(&ToleranceLimits::two_sided(-10.0, 10.0)).unwrap();
        let u = t.uut_uncertainty(0.95, U_REF, &t.tolerance()).unwrap();
        assert!((u - U_REF).abs() < 1e-9);
        // uCal larger than the deviation spread
        assert_eq!(t.uut_uncertainty(0.95, 10.0, &t.tolerance()).unwrap(), 0.0);
    }

    #[test]
    fn test_golden_two_sided_pfa_pfr() {
        let r = compute_risk(&symmetric_inputs(U_REF)).unwrap();
        assert!((r.u_uut - U_REF).abs() < 1e-9);
        assert!((r.pfa.total - 0.0021622993198965957).abs() < 1e-8);
        assert!((r.pfr.total - 0.0465877026391122).abs() < 1e-8);
        // symmetric limits split evenly
        assert!((r.pfa.lower - r.pfa.upper).abs() < 1e-10);
        assert!((r.correlation - 1.0 / 2f64.sqrt()).abs() < 1e-12);
        assert!(r.warnings.is_empty());
    }

    #[test]
    fn test_pfa_pfr_match_one_sided_identities() {
        // upper-only with the lower tail pushed to -inf equals the upper term of two-sided
        let two = Topology::from_limits(&ToleranceLimits::two_sided(-10.0, 10.0)).unwrap();
        let up = Topology::UpperOnly {
            center: 0.0,
            upper: 10.0,
        };
        let low = Topology::LowerOnly {
            center: 0.0,
            lower: -10.0,
        };
        let a = two.pfa(U_REF, U_REF, &two.tolerance());
        let b = up.pfa(U_REF, U_REF, &up.tolerance());
        let c = low.pfa(U_REF, U_REF, &low.tolerance());
        // the far tail contributes ~1e-5 to the two-sided figures
        assert!((a.upper - b.upper).abs() < 1e-4);
        assert!((a.lower - c.lower).abs() < 1e-4);
        assert!((b.upper - c.lower).abs() < 1e-9);

        let b = up.pfr(U_REF, U_REF, &up.tolerance());
        let c = low.pfr(U_REF, U_REF, &low.tolerance());
        assert!((b.total - c.total).abs() < 1e-9);
    }

    #[test]
    fn test_zero_uut_uncertainty_warns_and_continues() {
        let r = compute_risk(&symmetric_inputs(6.0)).unwrap();
        assert_eq!(r.u_uut, 0.0);
        assert_eq!(r.pfa.total, 0.0);
        assert!(r.pfr.total > 0.0);
        assert!(r
            .warnings
            .iter()
            .any(|w| w.message.contains("exceeds deviation uncertainty")));
    }

    #[test]
    fn test_tur_and_tar() {
        let t = Topology::from_limits(&ToleranceLimits::two_sided(9.999, 10.001)).unwrap();
        let tur = t.tur(0.00049).unwrap();
        assert!((tur - 0.002 / 0.00098).abs() < 1e-9);
        let tar = t.tar(0.0005).unwrap();
        assert!((tar - 4.0).abs() < 1e-9);
        assert_eq!(t.tur(0.0), None);

        let up = Topology::UpperOnly {
            center: 0.0,
            upper: 4.0,
        };
        assert_eq!(up.tur(1.0), Some(4.0));
        assert_eq!(up.tar(2.0), Some(4.0));
    }

    #[test]
    fn test_tur_adjustment_is_identity_at_required_tur() {
        let t = Topology::from_limits(&ToleranceLimits::two_sided(-10.0, 10.0)).unwrap();
        let r = t.tur_adjusted_reliability(0.95, U_REF, 4.0, 4.0).unwrap();
        assert!((r - 0.95).abs() < 1e-9);
        // a worse actual TUR than required lowers the estimate
        let r = t.tur_adjusted_reliability(0.95, U_REF, 2.0, 4.0).unwrap();
        assert!(r < 0.95);
    }

    #[test]
    fn test_invalid_inputs() {
        let mut inputs = symmetric_inputs(U_REF);
        inputs.reliability = 1.0;
        assert_eq!(compute_risk(&inputs), Err(RiskError::Reliability(1.0)));
        let mut inputs = symmetric_inputs(U_REF);
        inputs.u_cal = -1.0;
        assert_eq!(compute_risk(&inputs), Err(RiskError::Uncertainty(-1.0)));
    }

    #[test]
    fn test_acceptance_from_absolute() {
        let t = Topology::from_limits(&ToleranceLimits::two_sided(9.0, 11.0)).unwrap();
        let a = t.acceptance_from_absolute(Some(9.5), None);
        assert_eq!(a.low, Some(-0.5));
        assert_eq!(a.high, Some(1.0));
        assert_eq!(t.to_absolute(&a), (Some(9.5), Some(11.0)));
    }
}
