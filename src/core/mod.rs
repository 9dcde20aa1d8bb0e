//! Core module - the metrology engine and project plumbing

pub mod analysis;
pub mod budget;
pub mod config;
pub mod entity;
pub mod equation;
pub mod guardband;
pub mod identity;
pub mod montecarlo;
pub mod project;
pub mod risk;
pub mod special;
pub mod tolerance;
pub mod units;
pub mod warning;

pub use analysis::{analyze, AnalysisError, AnalysisInputs, AnalysisReport, RiskSettings};
pub use budget::{assemble_budget, combine_budget, coverage_factor, Budget, BudgetError};
pub use config::{Config, ConfigError};
pub use entity::{Entity, Status};
pub use equation::{Equation, EquationError};
pub use guardband::{GuardBandProblem, GuardBandSolution, SolveError};
pub use identity::{EntityId, EntityPrefix, IdParseError};
pub use project::{Project, ProjectError};
pub use risk::{compute_risk, RiskError, RiskResult, Topology, ToleranceLimits};
pub use tolerance::{propagate, NominalPoint, ToleranceSpec};
pub use units::{UnitConverter, UnitError, UnitSystem};
pub use warning::{Warning, WarningKind};
