//! YAML document loading with diagnostics

pub mod diagnostics;

pub use diagnostics::{load_document, parse_document, YamlError, YamlSyntaxError};
