//! Tolerance specifications and their conversion to standard uncertainty
//!
//! A [`ToleranceSpec`] is the manufacturer accuracy statement for an
//! instrument at one measurement point: reading, range, floor and dB
//! terms, plus the display resolution for the unit under test. Each term
//! is converted to ppm of the nominal value and divided by its
//! distribution divisor to get a standard uncertainty.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::core::units::{UnitConverter, UnitError};
use crate::core::warning::Warning;

/// Statistical distribution assumed for a tolerance term
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Distribution {
    #[default]
    Rectangular,
    Triangular,
    UShaped,
    #[serde(rename = "normal_90")]
    Normal90,
    #[serde(rename = "normal_95")]
    Normal95,
    #[serde(rename = "normal_95_45")]
    Normal9545,
    #[serde(rename = "normal_99")]
    Normal99,
    #[serde(rename = "normal_99_73")]
    Normal9973,
    Rayleigh,
    /// The stated value is already one standard uncertainty
    StdUncertainty,
}

impl Distribution {
    /// Divisor converting a half-span into a standard uncertainty
    pub fn divisor(&self) -> f64 {
        match self {
            Distribution::Rectangular => 3f64.sqrt(),
            Distribution::Triangular => 6f64.sqrt(),
            Distribution::UShaped => 2f64.sqrt(),
            Distribution::Normal90 => 1.645,
            Distribution::Normal95 => 1.960,
            Distribution::Normal9545 => 2.000,
            Distribution::Normal99 => 2.576,
            Distribution::Normal9973 => 3.000,
            Distribution::Rayleigh => 4.179,
            Distribution::StdUncertainty => 1.0,
        }
    }
}

impl fmt::Display for Distribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Distribution::Rectangular => "Rectangular",
            Distribution::Triangular => "Triangular",
            Distribution::UShaped => "U-Shaped",
            Distribution::Normal90 => "Normal (90%)",
            Distribution::Normal95 => "Normal (95%)",
            Distribution::Normal9545 => "Normal (95.45%)",
            Distribution::Normal99 => "Normal (99%)",
            Distribution::Normal9973 => "Normal (99.73%)",
            Distribution::Rayleigh => "Rayleigh",
            Distribution::StdUncertainty => "Std Uncertainty",
        };
        write!(f, "{}", label)
    }
}

/// The value all relative tolerance terms refer to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NominalPoint {
    pub value: f64,
    pub unit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl NominalPoint {
    pub fn new(value: f64, unit: impl Into<String>) -> Self {
        Self {
            value,
            unit: unit.into(),
            name: None,
        }
    }
}

impl fmt::Display for NominalPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.unit)
    }
}

/// Which instrument a specification belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Uut,
    Tmde,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    Reading,
    Range,
    Floor,
    Db,
    Resolution,
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentKind::Reading => write!(f, "Reading"),
            ComponentKind::Range => write!(f, "Range"),
            ComponentKind::Floor => write!(f, "Floor"),
            ComponentKind::Db => write!(f, "dB"),
            ComponentKind::Resolution => write!(f, "Resolution"),
        }
    }
}

/// One ± term of a tolerance specification
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToleranceComponent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high: Option<f64>,

    /// Defaults to `-high`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,

    #[serde(default)]
    pub distribution: Distribution,

    /// Explicit divisor, overrides the distribution's
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub divisor: Option<f64>,
}

impl ToleranceComponent {
    /// Symmetric ±`high` term
    pub fn symmetric(high: f64, unit: impl Into<String>) -> Self {
        Self {
            high: Some(high.abs()),
            low: Some(-high.abs()),
            unit: Some(unit.into()),
            ..Default::default()
        }
    }

    pub fn with_distribution(mut self, distribution: Distribution) -> Self {
        self.distribution = distribution;
        self
    }

    /// (low, high) limits, or None if neither is given
    pub fn bounds(&self) -> Option<(f64, f64)> {
        match (self.high, self.low) {
            (Some(high), Some(low)) => Some((low, high)),
            (Some(high), None) => Some((-high, high)),
            (None, Some(low)) => Some((low, -low)),
            (None, None) => None,
        }
    }

    pub fn divisor(&self) -> f64 {
        match self.divisor {
            Some(d) if d.is_finite() && d > 0.0 => d,
            _ => self.distribution.divisor(),
        }
    }
}

/// Percent-of-range term with its full-scale value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeTolerance {
    #[serde(flatten)]
    pub tolerance: ToleranceComponent,

    /// Full-scale value of the range, in the nominal unit
    pub full_scale: f64,
}

/// ±dB term around a log-referenced nominal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbTolerance {
    #[serde(flatten)]
    pub tolerance: ToleranceComponent,

    /// 20 for field quantities, 10 for power quantities
    #[serde(default = "default_db_multiplier")]
    pub multiplier: f64,

    /// Reference value in the nominal unit
    #[serde(default = "default_db_reference")]
    pub reference: f64,
}

fn default_db_multiplier() -> f64 {
    20.0
}

fn default_db_reference() -> f64 {
    1.0
}

/// Least significant digit of the unit under test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub value: f64,

    /// Defaults to the nominal unit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

/// Accuracy statement of an instrument at one measurement point
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToleranceSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reading: Option<ToleranceComponent>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<RangeTolerance>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub floor: Option<ToleranceComponent>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db: Option<DbTolerance>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
}

impl ToleranceSpec {
    pub fn is_empty(&self) -> bool {
        self.reading.is_none()
            && self.range.is_none()
            && self.floor.is_none()
            && self.db.is_none()
            && self.resolution.is_none()
    }

    /// Short text form, e.g. "±0.01 % rdg + ±1 mV"
    pub fn summary(&self, nominal_unit: &str) -> String {
        let mut parts = Vec::new();
        let term = |c: &ToleranceComponent, default_unit: &str, suffix: &str| {
            c.bounds().map(|(low, high)| {
                let unit = c.unit.as_deref().unwrap_or(default_unit);
                if (low + high).abs() < f64::EPSILON * high.abs().max(1.0) {
                    format!("±{} {}{}", high.abs(), unit, suffix)
                } else {
                    format!("+{}/{} {}{}", high, low, unit, suffix)
                }
            })
        };
        if let Some(ref c) = self.reading {
            parts.extend(term(c, "%", " rdg"));
        }
        if let Some(ref r) = self.range {
            parts.extend(term(&r.tolerance, "%", " FS"));
        }
        if let Some(ref c) = self.floor {
            parts.extend(term(c, nominal_unit, ""));
        }
        if let Some(ref d) = self.db {
            parts.extend(term(&d.tolerance, "dB", ""));
        }
        if parts.is_empty() {
            "-".to_string()
        } else {
            parts.join(" + ")
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ToleranceError {
    #[error("nominal value is missing a unit")]
    MissingNominalUnit,

    #[error("nominal unit '{0}' has no SI conversion")]
    UnknownNominalUnit(String),

    #[error("nominal value {0} is not a finite number")]
    NonFiniteNominal(f64),
}

/// One row of a propagation breakdown
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentContribution {
    pub kind: ComponentKind,
    /// Half-span in ppm of nominal
    pub ppm: f64,
    /// Standard uncertainty in ppm of nominal
    pub standard_uncertainty: f64,
    pub divisor: f64,
    pub distribution: String,
    /// Half-span in nominal units
    pub native_half_span: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub absolute_low: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub absolute_high: Option<f64>,
    pub explanation: String,
}

/// Result of [`propagate`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Propagation {
    pub nominal: NominalPoint,
    /// Root-sum-square of component standard uncertainties, ppm
    pub standard_uncertainty: f64,
    pub breakdown: Vec<ComponentContribution>,
    /// Linear sum of tolerance half-spans excluding resolution, ppm
    pub total_tolerance_span: f64,
    /// Summed low-side deviation in nominal units (negative for a normal spec)
    pub deviation_low: f64,
    /// Summed high-side deviation in nominal units
    pub deviation_high: f64,
    pub warnings: Vec<Warning>,
}

impl Propagation {
    /// Absolute (low, high) tolerance limits around the nominal
    pub fn absolute_limits(&self) -> (f64, f64) {
        (
            self.nominal.value + self.deviation_low,
            self.nominal.value + self.deviation_high,
        )
    }

    /// Full tolerance width converted into another unit of the same quantity
    pub fn span_in(&self, unit: &str, units: &dyn UnitConverter) -> Result<f64, UnitError> {
        let span = self.deviation_high - self.deviation_low;
        units.convert(span.abs(), &self.nominal.unit, unit)
    }

    pub fn resolution(&self) -> Option<&ComponentContribution> {
        self.breakdown
            .iter()
            .find(|c| c.kind == ComponentKind::Resolution)
    }
}

/// Convert a tolerance specification into a standard uncertainty in ppm
///
/// Components whose units cannot be converted are excluded and reported
/// as warnings; only an unusable nominal is an error.
pub fn propagate(
    spec: &ToleranceSpec,
    nominal: &NominalPoint,
    role: Role,
    units: &dyn UnitConverter,
) -> Result<Propagation, ToleranceError> {
    if nominal.unit.trim().is_empty() {
        return Err(ToleranceError::MissingNominalUnit);
    }
    if units.lookup(&nominal.unit).is_none() {
        return Err(ToleranceError::UnknownNominalUnit(nominal.unit.clone()));
    }
    if !nominal.value.is_finite() {
        return Err(ToleranceError::NonFiniteNominal(nominal.value));
    }

    let mut out = Propagation {
        nominal: nominal.clone(),
        standard_uncertainty: 0.0,
        breakdown: Vec::new(),
        total_tolerance_span: 0.0,
        deviation_low: 0.0,
        deviation_high: 0.0,
        warnings: Vec::new(),
    };

    let linear_terms = [
        (ComponentKind::Reading, spec.reading.as_ref(), None),
        (
            ComponentKind::Range,
            spec.range.as_ref().map(|r| &r.tolerance),
            spec.range.as_ref().map(|r| r.full_scale),
        ),
        (ComponentKind::Floor, spec.floor.as_ref(), None),
    ];
    for (kind, component, full_scale) in linear_terms {
        let Some(component) = component else { continue };
        match linear_term(kind, component, full_scale, nominal, units) {
            Ok(Some(row)) => out.push(row, component.bounds()),
            Ok(None) => {}
            Err(e) => exclude(&mut out, kind, e),
        }
    }

    if let Some(ref db) = spec.db {
        match db_term(db, nominal, units) {
            Ok(Some(row)) => {
                let (low, high) = (
                    row.absolute_low.unwrap_or(nominal.value) - nominal.value,
                    row.absolute_high.unwrap_or(nominal.value) - nominal.value,
                );
                out.deviation_low += low;
                out.deviation_high += high;
                out.total_tolerance_span += row.ppm.abs();
                out.breakdown.push(row);
            }
            Ok(None) => {}
            Err(e) => exclude(&mut out, ComponentKind::Db, e),
        }
    }

    if let Some(ref resolution) = spec.resolution {
        match role {
            Role::Uut => match resolution_term(resolution, nominal, units) {
                Ok(Some(row)) => out.breakdown.push(row),
                Ok(None) => {}
                Err(e) => exclude(&mut out, ComponentKind::Resolution, e),
            },
            Role::Tmde => out.warnings.push(Warning::input(
                "Resolution",
                "resolution applies to the unit under test only and was ignored",
            )),
        }
    }

    out.standard_uncertainty = out
        .breakdown
        .iter()
        .map(|c| c.standard_uncertainty.powi(2))
        .sum::<f64>()
        .sqrt();
    Ok(out)
}

impl Propagation {
    fn push(&mut self, row: ComponentContribution, bounds: Option<(f64, f64)>) {
        if let Some((low, high)) = bounds {
            let half = (high - low) / 2.0;
            if half != 0.0 {
                self.deviation_low += low / half * row.native_half_span;
                self.deviation_high += high / half * row.native_half_span;
            }
        }
        self.total_tolerance_span += row.ppm.abs();
        self.breakdown.push(row);
    }
}

fn exclude(out: &mut Propagation, kind: ComponentKind, err: UnitError) {
    tracing::warn!(component = %kind, error = %err, "excluding tolerance component");
    out.warnings
        .push(Warning::units(kind.to_string(), format!("excluded: {}", err)));
}

fn linear_term(
    kind: ComponentKind,
    component: &ToleranceComponent,
    full_scale: Option<f64>,
    nominal: &NominalPoint,
    units: &dyn UnitConverter,
) -> Result<Option<ComponentContribution>, UnitError> {
    let Some((low, high)) = component.bounds() else {
        return Ok(None);
    };
    let half = (high - low) / 2.0;
    if half == 0.0 || !half.is_finite() {
        return Ok(None);
    }

    let unit = match (kind, component.unit.as_deref()) {
        (_, Some(u)) => u,
        (ComponentKind::Floor, None) => nominal.unit.as_str(),
        _ => "%",
    };

    let native = if units.is_relative(unit) {
        let factor = units
            .lookup(unit)
            .ok_or_else(|| UnitError::Unknown(unit.to_string()))?
            .to_si;
        let base = match kind {
            ComponentKind::Range => full_scale.unwrap_or(nominal.value),
            _ => nominal.value,
        };
        half * factor * base.abs()
    } else {
        units.convert(half, unit, &nominal.unit)?
    };

    let ppm = units.to_ppm(native, &nominal.unit, nominal.value, &nominal.unit)?;
    let divisor = component.divisor();
    Ok(Some(ComponentContribution {
        kind,
        ppm: ppm.value.abs(),
        standard_uncertainty: (ppm.value / divisor).abs(),
        divisor,
        distribution: component.distribution.to_string(),
        native_half_span: native.abs(),
        absolute_low: Some(nominal.value + low / half * native.abs()),
        absolute_high: Some(nominal.value + high / half * native.abs()),
        explanation: format!("+{}/{} {} -> {}", high, low, unit, ppm.explanation),
    }))
}

fn db_term(
    db: &DbTolerance,
    nominal: &NominalPoint,
    units: &dyn UnitConverter,
) -> Result<Option<ComponentContribution>, UnitError> {
    let Some((low, high)) = db.tolerance.bounds() else {
        return Ok(None);
    };
    if nominal.value <= 0.0 || db.reference <= 0.0 {
        return Err(UnitError::ZeroReference {
            unit: "dB".to_string(),
        });
    }
    let db_nominal = db.multiplier * (nominal.value / db.reference).log10();
    let abs_high = db.reference * 10f64.powf((db_nominal + high) / db.multiplier);
    let abs_low = db.reference * 10f64.powf((db_nominal + low) / db.multiplier);
    let half = (abs_high - abs_low) / 2.0;
    if half == 0.0 || !half.is_finite() {
        return Ok(None);
    }

    let ppm = units.to_ppm(half, &nominal.unit, nominal.value, &nominal.unit)?;
    let divisor = db.tolerance.divisor();
    Ok(Some(ComponentContribution {
        kind: ComponentKind::Db,
        ppm: ppm.value.abs(),
        standard_uncertainty: (ppm.value / divisor).abs(),
        divisor,
        distribution: db.tolerance.distribution.to_string(),
        native_half_span: half.abs(),
        absolute_low: Some(abs_low),
        absolute_high: Some(abs_high),
        explanation: format!(
            "+{}/{} dB around {:.4} dB -> {} .. {} {}",
            high, low, db_nominal, abs_low, abs_high, nominal.unit
        ),
    }))
}

fn resolution_term(
    resolution: &Resolution,
    nominal: &NominalPoint,
    units: &dyn UnitConverter,
) -> Result<Option<ComponentContribution>, UnitError> {
    if resolution.value == 0.0 || !resolution.value.is_finite() {
        return Ok(None);
    }
    let unit = resolution.unit.as_deref().unwrap_or(&nominal.unit);
    let half = resolution.value.abs() / 2.0;
    let ppm = units.to_ppm(half, unit, nominal.value, &nominal.unit)?;
    let divisor = Distribution::Rectangular.divisor();
    Ok(Some(ComponentContribution {
        kind: ComponentKind::Resolution,
        ppm: ppm.value.abs(),
        standard_uncertainty: ppm.value.abs() / divisor,
        divisor,
        distribution: Distribution::Rectangular.to_string(),
        native_half_span: ppm.value.abs() / 1e6 * nominal.value.abs(),
        absolute_low: None,
        absolute_high: None,
        explanation: format!("{} {} / 2 -> {}", resolution.value, unit, ppm.explanation),
    }))
}
