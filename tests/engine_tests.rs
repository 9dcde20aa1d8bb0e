//! Library-level scenarios: YAML test point in, analysis report out

use tmt::core::analysis::analyze;
use tmt::core::budget::{Dof, MeasurementMode};
use tmt::core::Config;
use tmt::entities::TestPoint;

const DC_VOLTS: &str = r#"
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
  reliability: 0.95
  required_tur: 0
created: 2024-01-01T00:00:00Z
author: test
"#;

const POWER: &str = r#"
id: TP-01J9Z8X7W6V5T4S3R2Q1P0NMKK
title: 5 W DC power
uut:
  nominal: { value: 5, unit: W }
  tolerance:
    reading: { high: 1, unit: "%" }
tmde:
  - name: Voltmeter
    nominal: { value: 10, unit: V }
    tolerance:
      floor: { high: 0.01, unit: V, distribution: std_uncertainty }
    variable_type: voltage
  - name: Ammeter
    nominal: { value: 500, unit: mA }
    tolerance:
      floor: { high: 1, unit: mA, distribution: std_uncertainty }
    variable_type: current
measurement:
  mode: derived
  equation: "P = V * I"
  variables: { V: voltage, I: current }
requirements:
  required_tur: 0
created: 2024-01-01T00:00:00Z
author: test
"#;

fn point(doc: &str) -> TestPoint {
    serde_yml::from_str(doc).unwrap()
}

#[test]
fn test_dc_volts_scenario() {
    let config = Config::default();
    let units = config.unit_system();
    let report = analyze(&point(DC_VOLTS).analysis_inputs(&config), &units).unwrap();

    let result = &report.budget.result;
    assert_eq!(result.mode, MeasurementMode::Direct);
    assert!(matches!(result.effective_dof, Dof::Infinite));
    assert!((result.combined_native - 0.00025).abs() < 1e-12);

    let risk = report.risk.as_ref().unwrap();
    assert!((risk.pfa.total - 0.007366099294253112).abs() < 1e-7);
    assert!((risk.pfr.total - 0.032813349465208086).abs() < 1e-7);
    assert!((risk.tar.unwrap() - 4.0).abs() < 1e-9);
    // symmetric tolerance around the nominal splits the risk evenly
    assert!((risk.pfa.lower - risk.pfa.upper).abs() < 1e-12);
}

#[test]
fn test_guard_band_rounds_to_resolution() {
    let doc = DC_VOLTS.replace(
        "required_tur: 0",
        "required_tur: 0\n  required_pfa: 0.002\n  measuring_resolution: 0.0001",
    );
    let config = Config::default();
    let units = config.unit_system();
    let report = analyze(&point(&doc).analysis_inputs(&config), &units).unwrap();

    let gb = report.guard_band.as_ref().unwrap();
    assert!((gb.limits.multiplier - 0.900390625).abs() < 1e-9);
    assert!(gb.limits.rounded);
    assert!((gb.limits.high.unwrap() - 10.0009).abs() < 1e-9);
    assert!((gb.limits.low.unwrap() - 9.9991).abs() < 1e-9);
    assert!((gb.implied_multiplier.unwrap() - 0.9).abs() < 1e-6);
    assert!(gb.pfa.total <= 0.002);
    assert!(gb.pfa.total < report.risk.as_ref().unwrap().pfa.total);
}

#[test]
fn test_required_tur_adjusts_risk_but_not_guard_band() {
    let doc = DC_VOLTS.replace("required_tur: 0", "required_tur: 4\n  required_pfa: 0.002");
    let config = Config::default();
    let units = config.unit_system();
    let report = analyze(&point(&doc).analysis_inputs(&config), &units).unwrap();

    let risk = report.risk.as_ref().unwrap();
    assert!((risk.tur.unwrap() - 2.0408538276986156).abs() < 1e-6);
    assert!((risk.reliability - 0.9291031418367044).abs() < 1e-7);
    assert!((risk.pfa.total - 0.011816187810422037).abs() < 1e-6);
    assert!((risk.pfr.total - 0.039767798077164293).abs() < 1e-6);

    // the guard band is solved against the 0.95 target, not the adjusted reliability
    let gb = report.guard_band.as_ref().unwrap();
    assert!((gb.limits.multiplier - 0.900390625).abs() < 1e-12);
    assert!(gb.pfa.total <= 0.002);
}

#[test]
fn test_upper_only_limit() {
    let doc = DC_VOLTS.replace(
        "required_tur: 0",
        "required_tur: 0\n  limits: { upper: 10.001 }",
    );
    let config = Config::default();
    let units = config.unit_system();
    let report = analyze(&point(&doc).analysis_inputs(&config), &units).unwrap();

    let risk = report.risk.as_ref().unwrap();
    assert_eq!(risk.topology.label(), "upper only");
    assert_eq!(risk.pfa.lower, 0.0);
    assert!(risk.pfa.upper > 0.0);
}

#[test]
fn test_derived_power_scenario() {
    let config = Config::default();
    let units = config.unit_system();
    let report = analyze(&point(POWER).analysis_inputs(&config), &units).unwrap();

    let budget = &report.budget;
    assert_eq!(budget.result.mode, MeasurementMode::Derived);
    assert!((budget.nominal_result.unwrap() - 5.0).abs() < 1e-12);
    let expected = ((0.5f64 * 0.01).powi(2) + (10.0f64 * 0.001).powi(2)).sqrt();
    assert!((budget.result.combined_native - expected).abs() < 1e-12);

    let risk = report.risk.as_ref().unwrap();
    assert!(risk.pfa.total > 0.0 && risk.pfa.total < 1.0);
}
