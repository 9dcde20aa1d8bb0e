//! Uncertainty budgets
//!
//! Collects the contributors of a test point (unit-under-test resolution,
//! TMDE tolerances, manual entries and Type A repeatability) into a list of
//! [`BudgetComponent`]s and combines them into a combined and expanded
//! uncertainty. Direct measurements combine ppm values with
//! Welch-Satterthwaite degrees of freedom; derived measurements go through
//! a measurement equation and its sensitivity coefficients.

use miette::Diagnostic;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use thiserror::Error;

use crate::core::equation::{Equation, EquationError};
use crate::core::special::{norm_inv, DomainError};
use crate::core::tolerance::{
    propagate, ComponentKind, Distribution, NominalPoint, Role, ToleranceError, ToleranceSpec,
};
use crate::core::units::{UnitConverter, UnitError};
use crate::core::warning::Warning;

#[derive(Debug, Error, Diagnostic)]
pub enum BudgetError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Equation(#[from] EquationError),

    #[error("unit under test: {0}")]
    #[diagnostic(code(tmt::budget::uut))]
    Uut(ToleranceError),

    #[error("TMDE '{name}': {source}")]
    #[diagnostic(code(tmt::budget::tmde))]
    Tmde {
        name: String,
        #[source]
        source: ToleranceError,
    },

    #[error("derived measurement has no equation")]
    #[diagnostic(
        code(tmt::budget::missing_equation),
        help("set measurement.equation, for example 'P = V * I'")
    )]
    MissingEquation,

    #[error("no TMDE supplies variable type(s): {}", .0.join(", "))]
    #[diagnostic(
        code(tmt::budget::missing_tmde),
        help("give a TMDE a matching variable_type")
    )]
    MissingTmde(Vec<String>),

    #[error("confidence {0} must lie strictly between 0 and 1")]
    #[diagnostic(code(tmt::budget::confidence))]
    InvalidConfidence(f64),

    #[error(transparent)]
    #[diagnostic(code(tmt::budget::units))]
    Unit(#[from] UnitError),
}

impl From<DomainError> for BudgetError {
    fn from(e: DomainError) -> Self {
        let DomainError::Probability(p) = e;
        BudgetError::InvalidConfidence(p)
    }
}

/// GUM evaluation type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UncertaintyType {
    /// Statistical analysis of repeated observations
    A,
    #[default]
    B,
}

impl fmt::Display for UncertaintyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UncertaintyType::A => write!(f, "A"),
            UncertaintyType::B => write!(f, "B"),
        }
    }
}

/// Degrees of freedom; YAML accepts a number or `inf`
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Dof {
    Finite(f64),
    #[default]
    Infinite,
}

impl Dof {
    pub fn is_infinite(&self) -> bool {
        matches!(self, Dof::Infinite)
    }
}

impl fmt::Display for Dof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dof::Finite(v) if v.fract() == 0.0 => write!(f, "{}", v),
            Dof::Finite(v) => write!(f, "{:.1}", v),
            Dof::Infinite => write!(f, "∞"),
        }
    }
}

impl Serialize for Dof {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Dof::Finite(v) => serializer.serialize_f64(*v),
            Dof::Infinite => serializer.serialize_str("inf"),
        }
    }
}

impl<'de> Deserialize<'de> for Dof {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Num(f64),
            Text(String),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Num(v) if v.is_infinite() && v > 0.0 => Ok(Dof::Infinite),
            Raw::Num(v) if v > 0.0 => Ok(Dof::Finite(v)),
            Raw::Num(v) => Err(serde::de::Error::custom(format!(
                "degrees of freedom must be positive, got {}",
                v
            ))),
            Raw::Text(s) => match s.trim().to_lowercase().as_str() {
                "inf" | "infinite" | "infinity" | "∞" | ".inf" => Ok(Dof::Infinite),
                other => other.parse::<f64>().ok().filter(|v| *v > 0.0).map(Dof::Finite).ok_or_else(
                    || serde::de::Error::custom(format!("invalid degrees of freedom '{}'", s)),
                ),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeasurementMode {
    #[default]
    Direct,
    Derived,
}

impl fmt::Display for MeasurementMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeasurementMode::Direct => write!(f, "direct"),
            MeasurementMode::Derived => write!(f, "derived"),
        }
    }
}

/// How the result is obtained from the TMDE readings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    #[serde(default)]
    pub mode: MeasurementMode,

    /// Measurement equation for derived mode, e.g. `P = V * I`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equation: Option<String>,

    /// Equation symbol -> TMDE variable type
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, String>,
}

/// Test and measurement equipment used at a test point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tmde {
    pub name: String,

    /// Point the instrument is operated at
    pub nominal: NominalPoint,

    pub tolerance: ToleranceSpec,

    /// Identical units used in the measurement
    #[serde(default = "default_quantity")]
    pub quantity: u32,

    /// Equation variable type this instrument supplies (derived mode)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variable_type: Option<String>,

    /// Instrument library entry the tolerance came from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instrument: Option<String>,
}

fn default_quantity() -> u32 {
    1
}

/// A contributor entered directly rather than derived from a tolerance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualComponent {
    pub name: String,
    pub value: f64,
    pub unit: String,
    #[serde(default = "manual_distribution")]
    pub distribution: Distribution,
    #[serde(default, rename = "type")]
    pub uncertainty_type: UncertaintyType,
    #[serde(default)]
    pub dof: Dof,
}

fn manual_distribution() -> Distribution {
    Distribution::StdUncertainty
}

/// Repeated readings taken at the test point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepeatabilitySet {
    pub name: String,
    pub unit: String,
    pub readings: Vec<f64>,
    /// Report the standard deviation of the mean instead of a single reading
    #[serde(default)]
    pub use_mean: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RepeatabilityStats {
    pub count: usize,
    pub mean: f64,
    /// Sample standard deviation (n - 1)
    pub std_dev: f64,
    pub dof: f64,
}

impl RepeatabilitySet {
    pub fn stats(&self) -> Option<RepeatabilityStats> {
        let n = self.readings.len();
        if n < 2 || self.readings.iter().any(|r| !r.is_finite()) {
            return None;
        }
        let mean = self.readings.iter().sum::<f64>() / n as f64;
        let var = self
            .readings
            .iter()
            .map(|r| (r - mean).powi(2))
            .sum::<f64>()
            / (n - 1) as f64;
        Some(RepeatabilityStats {
            count: n,
            mean,
            std_dev: var.sqrt(),
            dof: (n - 1) as f64,
        })
    }

    /// Standard uncertainty contributed by these readings
    pub fn standard_uncertainty(&self) -> Option<f64> {
        self.stats().map(|s| {
            if self.use_mean {
                s.std_dev / (s.count as f64).sqrt()
            } else {
                s.std_dev
            }
        })
    }
}

/// One row of an uncertainty budget
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetComponent {
    pub name: String,
    /// Where it came from: `UUT`, the TMDE name, `Manual` or `Repeatability`
    pub source: String,
    #[serde(rename = "type")]
    pub uncertainty_type: UncertaintyType,
    /// Standard uncertainty of the input in `unit`
    pub value: f64,
    pub unit: String,
    /// Contribution to the result in ppm of the result nominal
    pub ppm: f64,
    pub dof: Dof,
    pub distribution: String,
    pub quantity: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sensitivity: Option<f64>,
    /// |c * u| in result units
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contribution: Option<f64>,
}

impl BudgetComponent {
    fn contribution_native(&self) -> f64 {
        self.contribution.unwrap_or(self.value)
    }
}

/// Combined and expanded uncertainty
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalcResult {
    pub mode: MeasurementMode,
    pub combined_ppm: f64,
    pub combined_native: f64,
    pub effective_dof: Dof,
    pub confidence: f64,
    pub k: f64,
    pub expanded_ppm: f64,
    pub expanded_native: f64,
}

/// Combine budget rows into a combined and expanded uncertainty
///
/// Direct mode weights each row by its quantity and computes
/// Welch-Satterthwaite degrees of freedom. Derived mode root-sums the
/// sensitivity-weighted contributions and always reports infinite dof.
pub fn combine_budget(
    components: &[BudgetComponent],
    mode: MeasurementMode,
    confidence: f64,
) -> Result<CalcResult, BudgetError> {
    if !(confidence > 0.0 && confidence < 1.0) {
        return Err(BudgetError::InvalidConfidence(confidence));
    }

    let (combined_ppm, combined_native, effective_dof) = match mode {
        MeasurementMode::Direct => {
            let variance: f64 = components
                .iter()
                .map(|c| c.quantity as f64 * c.ppm.powi(2))
                .sum();
            let native: f64 = components
                .iter()
                .map(|c| c.quantity as f64 * c.value.powi(2))
                .sum();
            let denominator: f64 = components
                .iter()
                .filter_map(|c| match c.dof {
                    Dof::Finite(v) if c.ppm != 0.0 => {
                        Some((c.quantity as f64 * c.ppm.powi(2)).powi(2) / v)
                    }
                    _ => None,
                })
                .sum();
            let dof = if denominator > 0.0 && variance > 0.0 {
                Dof::Finite(variance.powi(2) / denominator)
            } else {
                Dof::Infinite
            };
            (variance.sqrt(), native.sqrt(), dof)
        }
        MeasurementMode::Derived => {
            let ppm: f64 = components.iter().map(|c| c.ppm.powi(2)).sum();
            let native: f64 = components
                .iter()
                .map(|c| c.contribution_native().powi(2))
                .sum();
            (ppm.sqrt(), native.sqrt(), Dof::Infinite)
        }
    };

    let k = coverage_factor(effective_dof, confidence)?;
    Ok(CalcResult {
        mode,
        combined_ppm,
        combined_native,
        effective_dof,
        confidence,
        k,
        expanded_ppm: k * combined_ppm,
        expanded_native: k * combined_native,
    })
}

const T_TABLE_DOF: [f64; 19] = [
    1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 15.0, 20.0, 25.0, 30.0, 40.0, 50.0, 60.0,
    100.0, 120.0,
];

/// Two-sided Student-t quantiles for the tabulated confidence levels
const T_TABLES: [(f64, [f64; 19]); 5] = [
    (
        0.90,
        [
            6.31375, 2.91999, 2.35336, 2.13185, 2.01505, 1.94318, 1.89458, 1.85955, 1.83311,
            1.81246, 1.75305, 1.72472, 1.70814, 1.69726, 1.68385, 1.67591, 1.67065, 1.66023,
            1.65765,
        ],
    ),
    (
        0.95,
        [
            12.7062, 4.30265, 3.18245, 2.77645, 2.57058, 2.44691, 2.36462, 2.30600, 2.26216,
            2.22814, 2.13145, 2.08596, 2.05954, 2.04227, 2.02108, 2.00856, 2.00030, 1.98397,
            1.97993,
        ],
    ),
    (
        0.9545,
        [
            13.9678, 4.52655, 3.30683, 2.86932, 2.64865, 2.51653, 2.42881, 2.36642, 2.31981,
            2.28368, 2.18117, 2.13303, 2.10509, 2.08685, 2.06446, 2.05125, 2.04253, 2.02531,
            2.02105,
        ],
    ),
    (
        0.99,
        [
            63.6567, 9.92484, 5.84091, 4.60409, 4.03214, 3.70743, 3.49948, 3.35539, 3.24984,
            3.16927, 2.94671, 2.84534, 2.78744, 2.75000, 2.70446, 2.67779, 2.66028, 2.62589,
            2.61742,
        ],
    ),
    (
        0.9973,
        [
            235.784, 19.2060, 9.21870, 6.62007, 5.50698, 4.90399, 4.52991, 4.27658, 4.09420,
            3.95689, 3.58639, 3.42212, 3.32960, 3.27030, 3.19874, 3.15712, 3.12991, 3.07673,
            3.06369,
        ],
    ),
];

/// Coverage factor for a two-sided interval at `confidence`
///
/// Infinite dof (or dof above the table) uses the normal quantile.
/// Tabulated confidence levels interpolate linearly in dof; other levels use
/// the Cornish-Fisher expansion of the t quantile.
pub fn coverage_factor(dof: Dof, confidence: f64) -> Result<f64, DomainError> {
    let z = norm_inv(1.0 - (1.0 - confidence) / 2.0)?;
    let nu = match dof {
        Dof::Infinite => return Ok(z),
        Dof::Finite(v) if v > T_TABLE_DOF[T_TABLE_DOF.len() - 1] => return Ok(z),
        Dof::Finite(v) => v.max(1.0),
    };

    if let Some((_, row)) = T_TABLES
        .iter()
        .find(|(level, _)| (level - confidence).abs() < 1e-6)
    {
        let upper = T_TABLE_DOF
            .iter()
            .position(|d| *d >= nu)
            .unwrap_or(T_TABLE_DOF.len() - 1);
        if upper == 0 || T_TABLE_DOF[upper] == nu {
            return Ok(row[upper]);
        }
        let (d0, d1) = (T_TABLE_DOF[upper - 1], T_TABLE_DOF[upper]);
        let w = (nu - d0) / (d1 - d0);
        return Ok(row[upper - 1] + w * (row[upper] - row[upper - 1]));
    }

    let z2 = z * z;
    let g1 = (z2 + 1.0) * z / 4.0;
    let g2 = ((5.0 * z2 + 16.0) * z2 + 3.0) * z / 96.0;
    let g3 = (((3.0 * z2 + 19.0) * z2 + 17.0) * z2 - 15.0) * z / 384.0;
    let g4 = ((((79.0 * z2 + 776.0) * z2 + 1482.0) * z2 - 1920.0) * z2 - 945.0) * z / 92160.0;
    Ok(z + g1 / nu + g2 / nu.powi(2) + g3 / nu.powi(3) + g4 / nu.powi(4))
}

/// Everything needed to build one budget
#[derive(Debug, Clone, Copy)]
pub struct BudgetInputs<'a> {
    pub uut_nominal: &'a NominalPoint,
    pub uut_tolerance: &'a ToleranceSpec,
    pub tmdes: &'a [Tmde],
    pub manual: &'a [ManualComponent],
    pub repeatability: &'a [RepeatabilitySet],
    pub measurement: &'a Measurement,
    pub confidence: f64,
}

/// An assembled uncertainty budget
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Budget {
    pub nominal: NominalPoint,
    pub components: Vec<BudgetComponent>,
    pub result: CalcResult,
    /// Equation value at the TMDE nominals (derived mode), in result units
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nominal_result: Option<f64>,
    pub warnings: Vec<Warning>,
}

/// Build and combine the budget for one test point
pub fn assemble_budget(
    inputs: &BudgetInputs<'_>,
    units: &dyn UnitConverter,
) -> Result<Budget, BudgetError> {
    let nominal = inputs.uut_nominal;
    let uut = propagate(inputs.uut_tolerance, nominal, Role::Uut, units).map_err(BudgetError::Uut)?;
    let mut warnings = uut.warnings.clone();
    let mut components = Vec::new();

    if let Some(res) = uut.resolution() {
        let value = res.standard_uncertainty / 1e6 * nominal.value.abs();
        components.push(BudgetComponent {
            name: "UUT Resolution".to_string(),
            source: "UUT".to_string(),
            uncertainty_type: UncertaintyType::B,
            value,
            unit: nominal.unit.clone(),
            ppm: res.standard_uncertainty,
            dof: Dof::Infinite,
            distribution: res.distribution.clone(),
            quantity: 1,
            sensitivity: None,
            contribution: (inputs.measurement.mode == MeasurementMode::Derived).then_some(value),
        });
    }

    let nominal_result = match inputs.measurement.mode {
        MeasurementMode::Direct => {
            direct_tmde_components(inputs, units, &mut components, &mut warnings)?;
            None
        }
        MeasurementMode::Derived => Some(derived_tmde_components(
            inputs,
            units,
            &mut components,
            &mut warnings,
        )?),
    };

    manual_components(inputs, units, &mut components, &mut warnings);
    repeatability_components(inputs, units, &mut components, &mut warnings);

    if components.is_empty() {
        warnings.push(Warning::input(
            "Budget",
            "no uncertainty contributors; combined uncertainty is zero",
        ));
    }

    let result = combine_budget(&components, inputs.measurement.mode, inputs.confidence)?;
    tracing::debug!(
        mode = %result.mode,
        combined_ppm = result.combined_ppm,
        k = result.k,
        "budget combined"
    );

    Ok(Budget {
        nominal: nominal.clone(),
        components,
        result,
        nominal_result,
        warnings,
    })
}

fn direct_tmde_components(
    inputs: &BudgetInputs<'_>,
    units: &dyn UnitConverter,
    components: &mut Vec<BudgetComponent>,
    warnings: &mut Vec<Warning>,
) -> Result<(), BudgetError> {
    let nominal = inputs.uut_nominal;
    for tmde in inputs.tmdes {
        let prop = propagate(&tmde.tolerance, &tmde.nominal, Role::Tmde, units).map_err(|e| {
            BudgetError::Tmde {
                name: tmde.name.clone(),
                source: e,
            }
        })?;
        warnings.extend(prop.warnings.iter().map(|w| Warning {
            subject: format!("{} {}", tmde.name, w.subject),
            ..w.clone()
        }));

        for row in prop.breakdown.iter().filter(|r| r.kind != ComponentKind::Resolution) {
            let native_tmde = row.standard_uncertainty / 1e6 * tmde.nominal.value.abs();
            let converted = units
                .convert(native_tmde, &tmde.nominal.unit, &nominal.unit)
                .and_then(|v| units.to_ppm(v, &nominal.unit, nominal.value, &nominal.unit).map(|p| (v, p)));
            match converted {
                Ok((value, ppm)) => components.push(BudgetComponent {
                    name: format!("{} {}", tmde.name, row.kind),
                    source: tmde.name.clone(),
                    uncertainty_type: UncertaintyType::B,
                    value,
                    unit: nominal.unit.clone(),
                    ppm: ppm.value,
                    dof: Dof::Infinite,
                    distribution: row.distribution.clone(),
                    quantity: tmde.quantity.max(1),
                    sensitivity: None,
                    contribution: None,
                }),
                Err(e) => {
                    tracing::warn!(tmde = %tmde.name, error = %e, "TMDE component excluded");
                    warnings.push(Warning::units(
                        format!("{} {}", tmde.name, row.kind),
                        format!("excluded: {}", e),
                    ));
                }
            }
        }
    }
    Ok(())
}

/// Append one component per equation variable; returns the equation value
fn derived_tmde_components(
    inputs: &BudgetInputs<'_>,
    units: &dyn UnitConverter,
    components: &mut Vec<BudgetComponent>,
    warnings: &mut Vec<Warning>,
) -> Result<f64, BudgetError> {
    let source = inputs
        .measurement
        .equation
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .ok_or(BudgetError::MissingEquation)?;
    let equation = Equation::parse(source)?;
    let nominal = inputs.uut_nominal;

    let mut missing = Vec::new();
    let mut scope = HashMap::new();
    let mut inputs_by_symbol = Vec::new();

    for symbol in equation.variables() {
        let var_type = inputs
            .measurement
            .variables
            .get(&symbol)
            .ok_or_else(|| EquationError::UnmappedVariable(symbol.clone()))?;
        let tmdes: Vec<&Tmde> = inputs
            .tmdes
            .iter()
            .filter(|t| t.variable_type.as_deref() == Some(var_type.as_str()))
            .collect();
        let Some(first) = tmdes.first() else {
            missing.push(var_type.clone());
            continue;
        };

        let value_base = units.to_base(first.nominal.value, &first.nominal.unit)?;
        let mut variance_base = 0.0;
        for tmde in &tmdes {
            let prop = propagate(&tmde.tolerance, &tmde.nominal, Role::Tmde, units).map_err(
                |e| BudgetError::Tmde {
                    name: tmde.name.clone(),
                    source: e,
                },
            )?;
            warnings.extend(prop.warnings.iter().cloned());
            let tmde_base = units.to_base(tmde.nominal.value, &tmde.nominal.unit)?;
            let u_base = prop.standard_uncertainty / 1e6 * tmde_base.abs();
            variance_base += tmde.quantity.max(1) as f64 * u_base.powi(2);
        }
        scope.insert(symbol.clone(), value_base);
        inputs_by_symbol.push((symbol, var_type.clone(), first.nominal.unit.clone(), variance_base.sqrt()));
    }

    if !missing.is_empty() {
        missing.sort();
        missing.dedup();
        return Err(BudgetError::MissingTmde(missing));
    }

    let value_base = equation.evaluate(&scope)?;
    let nominal_result = units.from_base(value_base, &nominal.unit)?;

    for (symbol, var_type, input_unit, u_base) in inputs_by_symbol {
        let c = equation.sensitivity(&symbol, &scope)?;
        let contribution = units.from_base((c * u_base).abs(), &nominal.unit)?;
        let ppm = match units.to_ppm(contribution, &nominal.unit, nominal.value, &nominal.unit) {
            Ok(p) => p.value,
            Err(e) => {
                warnings.push(Warning::units(&symbol, format!("ppm undefined: {}", e)));
                0.0
            }
        };
        components.push(BudgetComponent {
            name: format!("{} ({})", symbol, var_type),
            source: var_type,
            uncertainty_type: UncertaintyType::B,
            value: units.from_base(u_base, &input_unit)?,
            unit: input_unit,
            ppm,
            dof: Dof::Infinite,
            distribution: "Combined".to_string(),
            quantity: 1,
            sensitivity: Some(c),
            contribution: Some(contribution),
        });
    }

    if (nominal_result - nominal.value).abs() > 1e-6 * nominal.value.abs().max(f64::MIN_POSITIVE) {
        warnings.push(Warning::input(
            "Equation",
            format!(
                "equation gives {} {} at the TMDE nominals; UUT nominal is {}",
                nominal_result, nominal.unit, nominal
            ),
        ));
    }
    Ok(nominal_result)
}

fn manual_components(
    inputs: &BudgetInputs<'_>,
    units: &dyn UnitConverter,
    components: &mut Vec<BudgetComponent>,
    warnings: &mut Vec<Warning>,
) {
    let nominal = inputs.uut_nominal;
    let derived = inputs.measurement.mode == MeasurementMode::Derived;
    for m in inputs.manual {
        let standard = m.value.abs() / m.distribution.divisor();
        let ppm = match units.to_ppm(standard, &m.unit, nominal.value, &nominal.unit) {
            Ok(p) => p.value,
            Err(e) => {
                tracing::warn!(component = %m.name, error = %e, "manual component excluded");
                warnings.push(Warning::units(&m.name, format!("excluded: {}", e)));
                continue;
            }
        };
        let value = ppm / 1e6 * nominal.value.abs();
        components.push(BudgetComponent {
            name: m.name.clone(),
            source: "Manual".to_string(),
            uncertainty_type: m.uncertainty_type,
            value,
            unit: nominal.unit.clone(),
            ppm,
            dof: m.dof,
            distribution: m.distribution.to_string(),
            quantity: 1,
            sensitivity: None,
            contribution: derived.then_some(value),
        });
    }
}

fn repeatability_components(
    inputs: &BudgetInputs<'_>,
    units: &dyn UnitConverter,
    components: &mut Vec<BudgetComponent>,
    warnings: &mut Vec<Warning>,
) {
    let nominal = inputs.uut_nominal;
    let derived = inputs.measurement.mode == MeasurementMode::Derived;
    for set in inputs.repeatability {
        let (Some(stats), Some(u)) = (set.stats(), set.standard_uncertainty()) else {
            warnings.push(Warning::input(
                &set.name,
                "repeatability needs at least two finite readings; ignored",
            ));
            continue;
        };
        match units.to_ppm(u, &set.unit, nominal.value, &nominal.unit) {
            Ok(ppm) => {
                let value = ppm.value / 1e6 * nominal.value.abs();
                components.push(BudgetComponent {
                    name: set.name.clone(),
                    source: "Repeatability".to_string(),
                    uncertainty_type: UncertaintyType::A,
                    value,
                    unit: nominal.unit.clone(),
                    ppm: ppm.value,
                    dof: Dof::Finite(stats.dof),
                    distribution: "Normal".to_string(),
                    quantity: 1,
                    sensitivity: None,
                    contribution: derived.then_some(value),
                })
            }
            Err(e) => warnings.push(Warning::units(&set.name, format!("excluded: {}", e))),
        }
    }
}
