//! Instrument entity - accuracy specifications by function and range
//!
//! An instrument lists measurement functions (DC voltage, resistance, ...)
//! and for each function the ranges with their accuracy statement. Looking
//! up a measurement value yields the ranges that cover it and a ready
//! tolerance for the budget.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::entity::{Entity, Status};
use crate::core::identity::{EntityId, EntityPrefix};
use crate::core::tolerance::{RangeTolerance, Resolution, ToleranceComponent, ToleranceSpec};
use crate::core::units::{UnitConverter, UnitError};

#[derive(Debug, Error)]
pub enum InstrumentError {
    #[error(transparent)]
    Unit(#[from] UnitError),

    #[error("range {min}..{max} is inverted")]
    InvertedRange { min: f64, max: f64 },
}

/// One range of a function with its accuracy statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentRange {
    /// Lower end of the range, in the function unit
    #[serde(default)]
    pub min: f64,

    /// Upper end (full scale), in the function unit
    pub max: f64,

    /// Percent of reading unless a unit is given
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reading: Option<ToleranceComponent>,

    /// Percent of range unless a unit is given
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<ToleranceComponent>,

    /// In the function unit unless a unit is given
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub floor: Option<ToleranceComponent>,

    /// Least significant digit, in the function unit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<f64>,
}

/// A measurement function (e.g. DCV) and its ranges
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentFunction {
    pub name: String,
    pub unit: String,
    #[serde(default)]
    pub ranges: Vec<InstrumentRange>,
}

/// Instrument library entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instrument {
    /// Unique identifier (INST-...)
    pub id: EntityId,

    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default)]
    pub functions: Vec<InstrumentFunction>,

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

impl Entity for Instrument {
    const PREFIX: &'static str = "INST";

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

/// A range that covers a looked-up value
#[derive(Debug, Clone, PartialEq)]
pub struct RangeMatch<'a> {
    pub function: &'a InstrumentFunction,
    pub range: &'a InstrumentRange,
    /// The looked-up value expressed in the function unit
    pub value_in_function_unit: f64,
}

impl Instrument {
    pub fn new(title: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            id: EntityId::new(EntityPrefix::Inst),
            title: title.into(),
            manufacturer: None,
            model: None,
            functions: Vec::new(),
            status: Status::default(),
            created: Utc::now(),
            author: author.into(),
            entity_revision: 1,
        }
    }

    /// Ranges of same-quantity functions with `min <= |v| <= max`.
    /// Functions whose unit is unknown are skipped.
    pub fn find_matching_ranges(
        &self,
        value: f64,
        unit: &str,
        units: &dyn UnitConverter,
    ) -> Result<Vec<RangeMatch<'_>>, InstrumentError> {
        let quantity = units
            .quantity_of(unit)
            .ok_or_else(|| UnitError::Unknown(unit.to_string()))?;
        let mut matches = Vec::new();
        for function in &self.functions {
            match units.quantity_of(&function.unit) {
                Some(q) if q == quantity => {}
                Some(_) => continue,
                None => {
                    tracing::warn!(function = %function.name, unit = %function.unit, "skipping function with unknown unit");
                    continue;
                }
            }
            let v = units.convert(value, unit, &function.unit)?;
            for range in &function.ranges {
                if range.min > range.max {
                    return Err(InstrumentError::InvertedRange {
                        min: range.min,
                        max: range.max,
                    });
                }
                if range.min <= v.abs() && v.abs() <= range.max {
                    matches.push(RangeMatch {
                        function,
                        range,
                        value_in_function_unit: v,
                    });
                }
            }
        }
        Ok(matches)
    }

    /// The covering range with the smallest full scale
    pub fn best_range(
        &self,
        value: f64,
        unit: &str,
        units: &dyn UnitConverter,
    ) -> Result<Option<RangeMatch<'_>>, InstrumentError> {
        Ok(self
            .find_matching_ranges(value, unit, units)?
            .into_iter()
            .min_by(|a, b| a.range.max.total_cmp(&b.range.max)))
    }
}

fn symmetric(component: &ToleranceComponent, unit: String) -> ToleranceComponent {
    let half = component
        .bounds()
        .map(|(low, high)| high.abs().max(low.abs()))
        .unwrap_or(0.0);
    ToleranceComponent {
        divisor: component.divisor,
        ..ToleranceComponent::symmetric(half, unit).with_distribution(component.distribution)
    }
}

impl RangeMatch<'_> {
    /// Tolerance for a measurement at `value` in `unit`, ready for a budget
    pub fn tolerance_for(
        &self,
        unit: &str,
        units: &dyn UnitConverter,
    ) -> Result<ToleranceSpec, InstrumentError> {
        let function_unit = self.function.unit.as_str();
        let to_measurement = |v: f64| units.convert(v, function_unit, unit);

        let reading = self.range.reading.as_ref().map(|c| {
            symmetric(c, c.unit.clone().unwrap_or_else(|| "%".to_string()))
        });

        let range = match &self.range.range {
            Some(c) => Some(RangeTolerance {
                tolerance: symmetric(c, c.unit.clone().unwrap_or_else(|| "%".to_string())),
                full_scale: to_measurement(self.range.max)?,
            }),
            None => None,
        };

        // A floor without a unit is stated in the function unit
        let floor = match &self.range.floor {
            Some(c) if c.unit.is_none() => {
                let mut converted = symmetric(c, unit.to_string());
                converted.high = converted.high.map(to_measurement).transpose()?;
                converted.low = converted.low.map(to_measurement).transpose()?;
                Some(converted)
            }
            Some(c) => Some(symmetric(c, c.unit.clone().unwrap_or_default())),
            None => None,
        };

        let resolution = match self.range.resolution {
            Some(r) => Some(Resolution {
                value: to_measurement(r)?,
                unit: Some(unit.to_string()),
            }),
            None => None,
        };

        Ok(ToleranceSpec {
            reading,
            range,
            floor,
            db: None,
            resolution,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::units::UnitSystem;

    const DMM: &str = r#"
id: INST-01J9Z8X7W6V5T4S3R2Q1P0NMKJ
title: 6.5 digit DMM
functions:
  - name: DCV
    unit: V
    ranges:
      - { max: 0.1, reading: { high: 0.005 }, range: { high: 0.0035 }, resolution: 1.0e-7 }
      - { max: 1, reading: { high: 0.004 }, range: { high: 0.0007 }, resolution: 1.0e-6 }
      - { max: 10, reading: { high: 0.0035 }, range: { high: 0.0005 }, resolution: 1.0e-5 }
  - name: DCI
    unit: A
    ranges:
      - { max: 1, reading: { high: 0.05 }, floor: { high: 0.0001 } }
created: 2024-01-01T00:00:00Z
author: test
"#;

    fn dmm() -> Instrument {
        serde_yml::from_str(DMM).unwrap()
    }

    #[test]
    fn test_matching_ranges_by_quantity() {
        let units = UnitSystem::standard();
        let inst = dmm();
        let matches = inst.find_matching_ranges(500.0, "mV", &units).unwrap();
        assert_eq!(matches.len(), 2);
        assert!(matches.iter().all(|m| m.function.name == "DCV"));
        assert!((matches[0].value_in_function_unit - 0.5).abs() < 1e-12);

        let best = inst.best_range(500.0, "mV", &units).unwrap().unwrap();
        assert_eq!(best.range.max, 1.0);
        assert!(inst.best_range(20.0, "V", &units).unwrap().is_none());
    }

    #[test]
    fn test_negative_values_match_by_magnitude() {
        let units = UnitSystem::standard();
        let inst = dmm();
        let best = inst.best_range(-5.0, "V", &units).unwrap().unwrap();
        assert_eq!(best.range.max, 10.0);
    }

    #[test]
    fn test_tolerance_for_range() {
        let units = UnitSystem::standard();
        let inst = dmm();
        let best = inst.best_range(500.0, "mV", &units).unwrap().unwrap();
        let spec = best.tolerance_for("mV", &units).unwrap();

        let reading = spec.reading.unwrap();
        assert_eq!(reading.unit.as_deref(), Some("%"));
        assert_eq!(reading.low, Some(-0.004));
        let range = spec.range.unwrap();
        assert!((range.full_scale - 1000.0).abs() < 1e-9);
        let resolution = spec.resolution.unwrap();
        assert!((resolution.value - 1e-3).abs() < 1e-12);
        assert_eq!(resolution.unit.as_deref(), Some("mV"));
    }

    #[test]
    fn test_floor_converted_to_measurement_unit() {
        let units = UnitSystem::standard();
        let inst = dmm();
        let best = inst.best_range(100.0, "mA", &units).unwrap().unwrap();
        let spec = best.tolerance_for("mA", &units).unwrap();
        let floor = spec.floor.unwrap();
        assert_eq!(floor.unit.as_deref(), Some("mA"));
        assert!((floor.high.unwrap() - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_unknown_unit_is_error() {
        let units = UnitSystem::standard();
        assert!(dmm().find_matching_ranges(1.0, "furlong", &units).is_err());
    }
}
