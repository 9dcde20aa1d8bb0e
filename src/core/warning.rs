//! Non-fatal conditions attached to computed results

use serde::{Deserialize, Serialize};
use std::fmt;

/// Warning families reported alongside a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// Input was accepted but is suspicious or partially ignored
    InputValidation,
    /// A fallback value replaced an undefined numeric result
    NumericDomain,
    /// An iterative solver stopped without meeting its target
    Convergence,
    /// A component was dropped because its unit could not be converted
    UnitConversion,
}

impl fmt::Display for WarningKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WarningKind::InputValidation => write!(f, "input"),
            WarningKind::NumericDomain => write!(f, "numeric"),
            WarningKind::Convergence => write!(f, "convergence"),
            WarningKind::UnitConversion => write!(f, "units"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Warning {
    pub kind: WarningKind,
    /// What the warning is about (component name, solver, field)
    pub subject: String,
    pub message: String,
}

impl Warning {
    pub fn new(kind: WarningKind, subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            subject: subject.into(),
            message: message.into(),
        }
    }

    pub fn input(subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(WarningKind::InputValidation, subject, message)
    }

    pub fn numeric(subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(WarningKind::NumericDomain, subject, message)
    }

    pub fn convergence(subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(WarningKind::Convergence, subject, message)
    }

    pub fn units(subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(WarningKind::UnitConversion, subject, message)
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.kind, self.subject, self.message)
    }
}
