//! TMT: Tessera Metrology Toolkit
//!
//! Measurement uncertainty budgets and calibration decision risk: combined
//! and expanded uncertainty, PFA/PFR, TUR/TAR, guard bands and calibration
//! intervals, for test points kept as plain YAML files.

pub mod cli;
pub mod core;
pub mod entities;
pub mod schema;
pub mod yaml;
