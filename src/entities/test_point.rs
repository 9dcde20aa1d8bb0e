//! Test point entity - one calibration point with its uncertainty budget
//!
//! A test point names the unit under test (nominal and tolerance), the
//! equipment used to measure it, and the decision-risk requirements the
//! measurement has to meet. Analysis results are stored back into the
//! document together with the digest of the inputs that produced them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::analysis::{AnalysisInputs, AnalysisReport, ManualGuardBand, RiskSettings};
use crate::core::budget::{ManualComponent, Measurement, RepeatabilitySet, Tmde};
use crate::core::config::Config;
use crate::core::entity::{Entity, Status};
use crate::core::identity::{EntityId, EntityPrefix};
use crate::core::risk::ToleranceLimits;
use crate::core::tolerance::{NominalPoint, ToleranceSpec};

/// The unit under test at this point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Uut {
    pub nominal: NominalPoint,

    #[serde(default)]
    pub tolerance: ToleranceSpec,

    /// Instrument library entry describing the UUT
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instrument: Option<String>,
}

/// Per-point risk requirements; unset values fall back to config
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Requirements {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,

    /// End-of-period reliability target
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reliability: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_pfa: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_tur: Option<f64>,

    /// Tolerance limits when they differ from the UUT tolerance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<ToleranceLimits>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measuring_resolution: Option<f64>,

    /// Fixed acceptance limits; skips the guard-band solver
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard_band: Option<ManualGuardBand>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calibration_interval: Option<f64>,

    /// Reliability observed at the current interval
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assumed_reliability: Option<f64>,
}

/// Analysis summary persisted in the document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredResults {
    /// Digest of the inputs these results were computed from
    pub digest: String,

    pub analyzed: Option<DateTime<Utc>>,

    pub combined_uncertainty: f64,
    pub k: f64,
    pub expanded_uncertainty: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tur: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tar: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pfa: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pfr: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gb_multiplier: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gb_low: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gb_high: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gb_pfa: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gb_pfr: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adjusted_interval: Option<f64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl StoredResults {
    pub fn from_report(report: &AnalysisReport) -> Self {
        let result = &report.budget.result;
        let mut stored = StoredResults {
            digest: report.digest.clone(),
            analyzed: Some(Utc::now()),
            combined_uncertainty: result.combined_native,
            k: result.k,
            expanded_uncertainty: result.expanded_native,
            warnings: report.warnings.iter().map(|w| w.to_string()).collect(),
            ..Default::default()
        };
        if let Some(risk) = &report.risk {
            stored.tur = risk.tur;
            stored.tar = risk.tar;
            stored.pfa = Some(risk.pfa.total);
            stored.pfr = Some(risk.pfr.total);
        }
        if let Some(gb) = &report.guard_band {
            stored.gb_multiplier = gb.implied_multiplier.or(Some(gb.limits.multiplier));
            stored.gb_low = gb.limits.low;
            stored.gb_high = gb.limits.high;
            stored.gb_pfa = Some(gb.pfa.total);
            stored.gb_pfr = Some(gb.pfr.total);
        }
        stored.adjusted_interval = report
            .interval
            .as_ref()
            .and_then(|i| i.adjusted.as_ref())
            .map(|s| s.interval);
        stored
    }
}

/// Test point entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestPoint {
    /// Unique identifier (TP-...)
    pub id: EntityId,

    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub uut: Uut,

    #[serde(default)]
    pub tmde: Vec<Tmde>,

    #[serde(default)]
    pub measurement: Measurement,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub manual: Vec<ManualComponent>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub repeatability: Vec<RepeatabilitySet>,

    #[serde(default)]
    pub requirements: Requirements,

    /// Written by `tmt analyze --write`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<StoredResults>,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub status: Status,

    pub created: DateTime<Utc>,

    pub author: String,

    #[serde(default = "default_revision")]
    pub entity_revision: u32,
}

fn default_revision() -> u32 {
    1
}

impl Entity for TestPoint {
    const PREFIX: &'static str = "TP";

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn status(&self) -> Status {
        self.status
    }

    fn created(&self) -> DateTime<Utc> {
        self.created
    }

    fn author(&self) -> &str {
        &self.author
    }
}

impl TestPoint {
    pub fn new(title: impl Into<String>, nominal: NominalPoint, author: impl Into<String>) -> Self {
        Self {
            id: EntityId::new(EntityPrefix::Tp),
            title: title.into(),
            description: None,
            uut: Uut {
                nominal,
                tolerance: ToleranceSpec::default(),
                instrument: None,
            },
            tmde: Vec::new(),
            measurement: Measurement::default(),
            manual: Vec::new(),
            repeatability: Vec::new(),
            requirements: Requirements::default(),
            results: None,
            tags: Vec::new(),
            status: Status::default(),
            created: Utc::now(),
            author: author.into(),
            entity_revision: 1,
        }
    }

    /// Risk settings with per-point values winning over config
    pub fn settings(&self, config: &Config) -> RiskSettings {
        let req = &self.requirements;
        RiskSettings {
            confidence: req.confidence.unwrap_or_else(|| config.confidence()),
            reliability: req.reliability.unwrap_or_else(|| config.reliability()),
            required_pfa: req.required_pfa.unwrap_or_else(|| config.required_pfa()),
            required_tur: Some(req.required_tur.unwrap_or_else(|| config.required_tur())),
            precision: config.precision(),
            limits: req.limits,
            measuring_resolution: req.measuring_resolution,
            guard_band: req.guard_band,
            calibration_interval: req.calibration_interval,
            assumed_reliability: req.assumed_reliability,
        }
    }

    pub fn analysis_inputs(&self, config: &Config) -> AnalysisInputs {
        AnalysisInputs {
            nominal: self.uut.nominal.clone(),
            tolerance: self.uut.tolerance.clone(),
            tmdes: self.tmde.clone(),
            manual: self.manual.clone(),
            repeatability: self.repeatability.clone(),
            measurement: self.measurement.clone(),
            settings: self.settings(config),
        }
    }

    /// True when stored results were computed from exactly these inputs
    pub fn is_current(&self, inputs: &AnalysisInputs) -> bool {
        match (self.results.as_ref(), inputs.digest()) {
            (Some(stored), Ok(digest)) => stored.digest == digest,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"
id: TP-01J9Z8X7W6V5T4S3R2Q1P0NMKJ
title: 10 V DC
uut:
  nominal: { value: 10, unit: V }
  tolerance:
    reading: { high: 100, unit: ppm }
tmde:
  - name: Reference
    nominal: { value: 10, unit: V }
    tolerance:
      reading: { high: 25, unit: ppm, distribution: std_uncertainty }
requirements:
  reliability: 0.9
  required_tur: 0
created: 2024-01-01T00:00:00Z
author: test
"#;

    #[test]
    fn test_parse_document() {
        let tp: TestPoint = serde_yml::from_str(DOC).unwrap();
        assert_eq!(tp.id.prefix(), EntityPrefix::Tp);
        assert_eq!(tp.uut.nominal.unit, "V");
        assert_eq!(tp.tmde[0].quantity, 1);
        assert_eq!(tp.status, Status::Draft);
        assert!(tp.results.is_none());
    }

    #[test]
    fn test_requirements_override_config() {
        let tp: TestPoint = serde_yml::from_str(DOC).unwrap();
        let config = Config::default();
        let settings = tp.settings(&config);
        assert_eq!(settings.reliability, 0.9);
        assert_eq!(settings.required_pfa, config.required_pfa());
        assert_eq!(settings.confidence, 0.95);
    }

    #[test]
    fn test_stored_results_track_digest() {
        let mut tp: TestPoint = serde_yml::from_str(DOC).unwrap();
        let config = Config::default();
        let inputs = tp.analysis_inputs(&config);
        assert!(!tp.is_current(&inputs));

        let units = config.unit_system();
        let report = crate::core::analysis::analyze(&inputs, &units).unwrap();
        tp.results = Some(StoredResults::from_report(&report));
        assert!(tp.is_current(&inputs));

        tp.requirements.reliability = Some(0.85);
        assert!(!tp.is_current(&tp.analysis_inputs(&config)));

        let yaml = serde_yml::to_string(&tp).unwrap();
        let back: TestPoint = serde_yml::from_str(&yaml).unwrap();
        assert_eq!(back.results, tp.results);
    }
}
