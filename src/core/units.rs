//! Unit conversion service
//!
//! Converts tolerance values between physical units, SI base values and
//! parts-per-million of a reference (nominal) value. The lookup table is
//! built once and never mutated; engine code receives it through the
//! [`UnitConverter`] trait.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

/// Quantity name shared by the dimensionless relative units
pub const RATIO: &str = "Ratio";

/// One unit symbol: scale to SI and the physical quantity it measures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitDef {
    pub to_si: f64,
    pub quantity: String,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum UnitError {
    #[error("unknown unit '{0}'")]
    Unknown(String),

    #[error("unit mismatch: cannot convert {unit} ({quantity}) to {target} ({target_quantity})")]
    QuantityMismatch {
        unit: String,
        quantity: String,
        target: String,
        target_quantity: String,
    },

    #[error("cannot express {unit} relative to a zero or undefined reference value")]
    ZeroReference { unit: String },

    #[error("value is not a finite number")]
    NonFinite,
}

/// A value in ppm of a reference, with a human-readable derivation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PpmValue {
    pub value: f64,
    pub explanation: String,
}

/// Lookup and conversion contract used by the propagator and risk model
pub trait UnitConverter {
    /// Look up a unit symbol
    fn lookup(&self, symbol: &str) -> Option<&UnitDef>;

    fn quantity_of(&self, symbol: &str) -> Option<&str> {
        self.lookup(symbol).map(|u| u.quantity.as_str())
    }

    fn is_relative(&self, symbol: &str) -> bool {
        self.quantity_of(symbol) == Some(RATIO)
    }

    /// Convert a value in `unit` to its SI base value
    fn to_base(&self, value: f64, unit: &str) -> Result<f64, UnitError> {
        let def = self
            .lookup(unit)
            .ok_or_else(|| UnitError::Unknown(unit.to_string()))?;
        Ok(value * def.to_si)
    }

    /// Convert an SI base value into `unit`
    fn from_base(&self, value: f64, unit: &str) -> Result<f64, UnitError> {
        let def = self
            .lookup(unit)
            .ok_or_else(|| UnitError::Unknown(unit.to_string()))?;
        Ok(value / def.to_si)
    }

    /// Convert `value` from one unit to another of the same quantity
    fn convert(&self, value: f64, from: &str, to: &str) -> Result<f64, UnitError> {
        self.ensure_same_quantity(from, to)?;
        let base = self.to_base(value, from)?;
        self.from_base(base, to)
    }

    fn ensure_same_quantity(&self, unit: &str, target: &str) -> Result<(), UnitError> {
        let quantity = self
            .quantity_of(unit)
            .ok_or_else(|| UnitError::Unknown(unit.to_string()))?;
        let target_quantity = self
            .quantity_of(target)
            .ok_or_else(|| UnitError::Unknown(target.to_string()))?;
        if quantity != target_quantity {
            return Err(UnitError::QuantityMismatch {
                unit: unit.to_string(),
                quantity: quantity.to_string(),
                target: target.to_string(),
                target_quantity: target_quantity.to_string(),
            });
        }
        Ok(())
    }

    /// Express `value unit` in ppm of `nominal nominal_unit`
    fn to_ppm(
        &self,
        value: f64,
        unit: &str,
        nominal: f64,
        nominal_unit: &str,
    ) -> Result<PpmValue, UnitError> {
        if !value.is_finite() {
            return Err(UnitError::NonFinite);
        }
        if self.is_relative(unit) {
            let def = self
                .lookup(unit)
                .ok_or_else(|| UnitError::Unknown(unit.to_string()))?;
            let ppm = value * def.to_si * 1e6;
            return Ok(PpmValue {
                value: ppm,
                explanation: format!("{} {} = {} ppm", value, unit, ppm),
            });
        }

        self.ensure_same_quantity(unit, nominal_unit)?;
        let nominal_base = self.to_base(nominal, nominal_unit)?;
        if !nominal_base.is_finite() || nominal_base == 0.0 {
            return Err(UnitError::ZeroReference {
                unit: unit.to_string(),
            });
        }
        let value_base = self.to_base(value, unit)?;
        let ppm = value_base / nominal_base.abs() * 1e6;
        Ok(PpmValue {
            value: ppm,
            explanation: format!(
                "({} {} / |{} {}|) x 1e6 = {} ppm",
                value, unit, nominal, nominal_unit, ppm
            ),
        })
    }

    /// Express a ppm value as a deviation in `target`, relative to the reference
    fn ppm_to_unit(
        &self,
        ppm: f64,
        target: &str,
        nominal: f64,
        nominal_unit: &str,
    ) -> Result<f64, UnitError> {
        if self.is_relative(target) {
            let def = self
                .lookup(target)
                .ok_or_else(|| UnitError::Unknown(target.to_string()))?;
            return Ok(ppm / 1e6 / def.to_si);
        }
        self.ensure_same_quantity(target, nominal_unit)?;
        let nominal_base = self.to_base(nominal, nominal_unit)?;
        if !nominal_base.is_finite() || nominal_base == 0.0 {
            return Err(UnitError::ZeroReference {
                unit: target.to_string(),
            });
        }
        let deviation_base = ppm / 1e6 * nominal_base.abs();
        self.from_base(deviation_base, target)
    }
}

/// Immutable unit table
#[derive(Debug, Clone)]
pub struct UnitSystem {
    units: HashMap<String, UnitDef>,
}

const STANDARD_UNITS: &[(&str, f64, &str)] = &[
    // Voltage
    ("V", 1.0, "Voltage"),
    ("kV", 1e3, "Voltage"),
    ("mV", 1e-3, "Voltage"),
    ("µV", 1e-6, "Voltage"),
    ("uV", 1e-6, "Voltage"),
    ("nV", 1e-9, "Voltage"),
    // Current
    ("A", 1.0, "Current"),
    ("kA", 1e3, "Current"),
    ("mA", 1e-3, "Current"),
    ("µA", 1e-6, "Current"),
    ("uA", 1e-6, "Current"),
    ("nA", 1e-9, "Current"),
    ("pA", 1e-12, "Current"),
    // Resistance
    ("Ω", 1.0, "Resistance"),
    ("ohm", 1.0, "Resistance"),
    ("mΩ", 1e-3, "Resistance"),
    ("mohm", 1e-3, "Resistance"),
    ("kΩ", 1e3, "Resistance"),
    ("kohm", 1e3, "Resistance"),
    ("MΩ", 1e6, "Resistance"),
    ("Mohm", 1e6, "Resistance"),
    ("GΩ", 1e9, "Resistance"),
    ("Gohm", 1e9, "Resistance"),
    // Capacitance
    ("F", 1.0, "Capacitance"),
    ("mF", 1e-3, "Capacitance"),
    ("µF", 1e-6, "Capacitance"),
    ("uF", 1e-6, "Capacitance"),
    ("nF", 1e-9, "Capacitance"),
    ("pF", 1e-12, "Capacitance"),
    // Inductance
    ("H", 1.0, "Inductance"),
    ("mH", 1e-3, "Inductance"),
    ("µH", 1e-6, "Inductance"),
    ("uH", 1e-6, "Inductance"),
    ("nH", 1e-9, "Inductance"),
    // Power
    ("W", 1.0, "Power"),
    ("kW", 1e3, "Power"),
    ("MW", 1e6, "Power"),
    ("mW", 1e-3, "Power"),
    ("µW", 1e-6, "Power"),
    ("uW", 1e-6, "Power"),
    // Frequency
    ("Hz", 1.0, "Frequency"),
    ("mHz", 1e-3, "Frequency"),
    ("kHz", 1e3, "Frequency"),
    ("MHz", 1e6, "Frequency"),
    ("GHz", 1e9, "Frequency"),
    // Time
    ("s", 1.0, "Time"),
    ("ms", 1e-3, "Time"),
    ("µs", 1e-6, "Time"),
    ("us", 1e-6, "Time"),
    ("ns", 1e-9, "Time"),
    ("ps", 1e-12, "Time"),
    ("min", 60.0, "Time"),
    ("h", 3600.0, "Time"),
    // Temperature (differences)
    ("K", 1.0, "Temperature"),
    ("mK", 1e-3, "Temperature"),
    ("°C", 1.0, "Temperature"),
    ("degC", 1.0, "Temperature"),
    ("°F", 5.0 / 9.0, "Temperature"),
    ("degF", 5.0 / 9.0, "Temperature"),
    // Length
    ("m", 1.0, "Length"),
    ("km", 1e3, "Length"),
    ("cm", 1e-2, "Length"),
    ("mm", 1e-3, "Length"),
    ("µm", 1e-6, "Length"),
    ("um", 1e-6, "Length"),
    ("nm", 1e-9, "Length"),
    ("in", 0.0254, "Length"),
    ("ft", 0.3048, "Length"),
    ("mil", 2.54e-5, "Length"),
    // Mass
    ("kg", 1.0, "Mass"),
    ("g", 1e-3, "Mass"),
    ("mg", 1e-6, "Mass"),
    ("µg", 1e-9, "Mass"),
    ("ug", 1e-9, "Mass"),
    ("lb", 0.453_592_37, "Mass"),
    ("oz", 0.028_349_523_125, "Mass"),
    // Angle
    ("rad", 1.0, "Angle"),
    ("mrad", 1e-3, "Angle"),
    ("µrad", 1e-6, "Angle"),
    ("urad", 1e-6, "Angle"),
    ("deg", std::f64::consts::PI / 180.0, "Angle"),
    ("°", std::f64::consts::PI / 180.0, "Angle"),
    ("arcmin", std::f64::consts::PI / 10_800.0, "Angle"),
    ("arcsec", std::f64::consts::PI / 648_000.0, "Angle"),
    // Volume
    ("m3", 1.0, "Volume"),
    ("L", 1e-3, "Volume"),
    ("mL", 1e-6, "Volume"),
    ("µL", 1e-9, "Volume"),
    ("uL", 1e-9, "Volume"),
    ("gal", 3.785_411_784e-3, "Volume"),
    // Velocity
    ("m/s", 1.0, "Velocity"),
    ("km/h", 1.0 / 3.6, "Velocity"),
    ("ft/s", 0.3048, "Velocity"),
    ("mph", 0.447_04, "Velocity"),
    // Acceleration
    ("m/s2", 1.0, "Acceleration"),
    ("m/s²", 1.0, "Acceleration"),
    ("gn", 9.806_65, "Acceleration"),
    // Pressure
    ("Pa", 1.0, "Pressure"),
    ("hPa", 1e2, "Pressure"),
    ("kPa", 1e3, "Pressure"),
    ("MPa", 1e6, "Pressure"),
    ("bar", 1e5, "Pressure"),
    ("mbar", 1e2, "Pressure"),
    ("psi", 6_894.757_293_168, "Pressure"),
    ("atm", 101_325.0, "Pressure"),
    ("torr", 101_325.0 / 760.0, "Pressure"),
    ("mmHg", 133.322_387_415, "Pressure"),
    ("inHg", 3_386.388_64, "Pressure"),
    ("inH2O", 249.088_91, "Pressure"),
    // Force
    ("N", 1.0, "Force"),
    ("mN", 1e-3, "Force"),
    ("kN", 1e3, "Force"),
    ("lbf", 4.448_221_615_260_5, "Force"),
    ("ozf", 0.278_013_850_953_78, "Force"),
    ("kgf", 9.806_65, "Force"),
    // Torque
    ("N·m", 1.0, "Torque"),
    ("Nm", 1.0, "Torque"),
    ("mN·m", 1e-3, "Torque"),
    ("lbf·in", 0.112_984_829_027_6, "Torque"),
    ("lbf·ft", 1.355_817_948_331_4, "Torque"),
    ("ozf·in", 7.061_551_814_2e-3, "Torque"),
    // Flow
    ("m3/s", 1.0, "Flow"),
    ("L/min", 1e-3 / 60.0, "Flow"),
    ("mL/min", 1e-6 / 60.0, "Flow"),
    ("gal/min", 3.785_411_784e-3 / 60.0, "Flow"),
    // Energy
    ("J", 1.0, "Energy"),
    ("mJ", 1e-3, "Energy"),
    ("kJ", 1e3, "Energy"),
    ("Wh", 3_600.0, "Energy"),
    ("kWh", 3.6e6, "Energy"),
    ("cal", 4.184, "Energy"),
    // Illuminance
    ("lx", 1.0, "Illuminance"),
    ("fc", 10.763_910_416_7, "Illuminance"),
    // Magnetic flux density
    ("T", 1.0, "Magnetic Field"),
    ("mT", 1e-3, "Magnetic Field"),
    ("µT", 1e-6, "Magnetic Field"),
    ("uT", 1e-6, "Magnetic Field"),
    ("G", 1e-4, "Magnetic Field"),
    // Dimensionless
    ("%", 1e-2, RATIO),
    ("ppm", 1e-6, RATIO),
    ("ppb", 1e-9, RATIO),
];

impl UnitSystem {
    /// The built-in unit table
    pub fn standard() -> Self {
        let units = STANDARD_UNITS
            .iter()
            .map(|(symbol, to_si, quantity)| {
                (
                    symbol.to_string(),
                    UnitDef {
                        to_si: *to_si,
                        quantity: quantity.to_string(),
                    },
                )
            })
            .collect();
        Self { units }
    }

    /// Standard table plus user-defined units; built-in symbols win
    pub fn with_extra(extra: &BTreeMap<String, UnitDef>) -> Self {
        let mut system = Self::standard();
        for (symbol, def) in extra {
            if system.units.contains_key(symbol) {
                tracing::warn!(unit = %symbol, "ignoring configured unit that shadows a built-in symbol");
                continue;
            }
            if !(def.to_si.is_finite() && def.to_si > 0.0) {
                tracing::warn!(unit = %symbol, to_si = def.to_si, "ignoring configured unit with invalid scale");
                continue;
            }
            system.units.insert(symbol.clone(), def.clone());
        }
        system
    }
}

impl Default for UnitSystem {
    fn default() -> Self {
        Self::standard()
    }
}

impl UnitConverter for UnitSystem {
    fn lookup(&self, symbol: &str) -> Option<&UnitDef> {
        self.units.get(symbol.trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn units() -> UnitSystem {
        UnitSystem::standard()
    }

    #[test]
    fn test_millivolt_in_ppm_of_one_volt() {
        let ppm = units().to_ppm(1.0, "mV", 1.0, "V").unwrap();
        assert!((ppm.value - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn test_percent_is_relative() {
        let ppm = units().to_ppm(1.0, "%", 100.0, "V").unwrap();
        assert!((ppm.value - 10_000.0).abs() < 1e-9);
        let ppm = units().to_ppm(250.0, "ppb", 10.0, "V").unwrap();
        assert!((ppm.value - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_ppm_passes_through_even_for_zero_nominal() {
        let ppm = units().to_ppm(12.5, "ppm", 0.0, "V").unwrap();
        assert_eq!(ppm.value, 12.5);
    }

    #[test]
    fn test_quantity_mismatch_is_an_error() {
        let err = units().to_ppm(1.0, "V", 1.0, "A").unwrap_err();
        assert!(matches!(err, UnitError::QuantityMismatch { .. }));
        assert!(err.to_string().contains("Voltage"));
    }

    #[test]
    fn test_zero_nominal_is_an_error() {
        let err = units().to_ppm(1.0, "mV", 0.0, "V").unwrap_err();
        assert!(matches!(err, UnitError::ZeroReference { .. }));
    }

    #[test]
    fn test_unknown_unit() {
        assert!(matches!(
            units().to_base(1.0, "furlong"),
            Err(UnitError::Unknown(_))
        ));
    }

    #[test]
    fn test_gram_and_standard_gravity_are_distinct() {
        let u = units();
        assert_eq!(u.quantity_of("g"), Some("Mass"));
        assert_eq!(u.quantity_of("gn"), Some("Acceleration"));
    }

    #[test]
    fn test_ppm_to_unit() {
        let u = units();
        // 100 ppm of 10 V is 1 mV
        let mv = u.ppm_to_unit(100.0, "mV", 10.0, "V").unwrap();
        assert!((mv - 1.0).abs() < 1e-12);
        assert!((u.ppm_to_unit(100.0, "%", 10.0, "V").unwrap() - 0.01).abs() < 1e-15);
        assert!(u.ppm_to_unit(100.0, "A", 10.0, "V").is_err());
    }

    #[test]
    fn test_convert_between_prefixes() {
        let u = units();
        assert!((u.convert(5000.0, "mV", "V").unwrap() - 5.0).abs() < 1e-12);
        assert!((u.convert(1.0, "psi", "kPa").unwrap() - 6.894_757).abs() < 1e-6);
    }

    #[test]
    fn test_extra_units_cannot_shadow_builtins() {
        let mut extra = BTreeMap::new();
        extra.insert(
            "V".to_string(),
            UnitDef {
                to_si: 2.0,
                quantity: "Voltage".to_string(),
            },
        );
        extra.insert(
            "dyn".to_string(),
            UnitDef {
                to_si: 1e-5,
                quantity: "Force".to_string(),
            },
        );
        let u = UnitSystem::with_extra(&extra);
        assert_eq!(u.lookup("V").unwrap().to_si, 1.0);
        assert!((u.convert(1e5, "dyn", "N").unwrap() - 1.0).abs() < 1e-12);
    }
}
