//! YAML document errors rendered with source spans

use miette::{Diagnostic, NamedSource, SourceSpan};
use serde::de::DeserializeOwned;
use std::path::Path;
use thiserror::Error;

/// A document that failed to parse, with the offending location
#[derive(Debug, Error, Diagnostic)]
#[error("{message}")]
#[diagnostic(code(tmt::yaml::document))]
pub struct YamlSyntaxError {
    #[source_code]
    src: NamedSource<String>,

    #[label("here")]
    span: SourceSpan,

    #[help]
    help: Option<String>,

    message: String,
}

impl YamlSyntaxError {
    pub fn from_serde_error(err: &serde_yml::Error, source: &str, filename: &str) -> Self {
        let offset = err
            .location()
            .map(|loc| line_col_to_offset(source, loc.line(), loc.column()))
            .unwrap_or(0);
        let message = err.to_string();
        let help = generate_help(&message);

        Self {
            src: NamedSource::new(filename, source.to_string()),
            span: SourceSpan::from(offset..offset.saturating_add(1)),
            help,
            message,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum YamlError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Syntax(#[from] YamlSyntaxError),

    #[error("cannot read {path}: {source}")]
    #[diagnostic(code(tmt::yaml::io))]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Parse a document held in memory
pub fn parse_document<T: DeserializeOwned>(source: &str, filename: &str) -> Result<T, YamlError> {
    serde_yml::from_str(source)
        .map_err(|e| YamlError::Syntax(YamlSyntaxError::from_serde_error(&e, source, filename)))
}

/// Read and parse a document from disk
pub fn load_document<T: DeserializeOwned>(path: &Path) -> Result<T, YamlError> {
    let display = path.display().to_string();
    let source = std::fs::read_to_string(path).map_err(|source| YamlError::Io {
        path: display.clone(),
        source,
    })?;
    parse_document(&source, &display)
}

/// Byte offset of a 1-based line/column, clamped to the source length
fn line_col_to_offset(source: &str, line: usize, column: usize) -> usize {
    let line_start = source
        .split_inclusive('\n')
        .take(line.saturating_sub(1))
        .map(str::len)
        .sum::<usize>();
    let line_text = source[line_start.min(source.len())..]
        .split('\n')
        .next()
        .unwrap_or("");
    let within = line_text
        .char_indices()
        .nth(column.saturating_sub(1))
        .map(|(i, _)| i)
        .unwrap_or(line_text.len());
    (line_start + within).min(source.len())
}

fn generate_help(message: &str) -> Option<String> {
    let msg = message.to_lowercase();

    if msg.contains("tab") {
        return Some("YAML requires spaces for indentation, not tabs.".to_string());
    }
    if msg.contains("duplicate") {
        return Some("Each key can only appear once.".to_string());
    }
    if msg.contains("unknown variant") && msg.contains("rectangular") {
        return Some(
            "Distributions: rectangular, triangular, u_shaped, normal_90, normal_95, \
             normal_95_45, normal_99, normal_99_73, rayleigh, std_uncertainty"
                .to_string(),
        );
    }
    if msg.contains("missing field `nominal`") {
        return Some("A nominal needs a value and a unit: nominal: { value: 10, unit: V }".to_string());
    }
    if msg.contains("missing field `unit`") {
        return Some("Every nominal, manual component and repeatability set needs a unit.".to_string());
    }
    if msg.contains("mapping values are not allowed") {
        return Some("You may be missing a space after ':' or have incorrect indentation.".to_string());
    }
    if msg.contains("invalid value") && msg.contains("degrees of freedom") {
        return Some("Degrees of freedom are positive numbers or \"inf\".".to_string());
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tolerance::ToleranceComponent;

    #[test]
    fn test_line_col_to_offset() {
        let source = "line1\nline2\nline3";
        assert_eq!(line_col_to_offset(source, 1, 1), 0);
        assert_eq!(line_col_to_offset(source, 2, 1), 6);
        assert_eq!(line_col_to_offset(source, 3, 3), 14);
        assert_eq!(line_col_to_offset(source, 9, 9), source.len());
    }

    #[test]
    fn test_distribution_help() {
        let err = parse_document::<ToleranceComponent>("high: 1\ndistribution: gaussian\n", "t.yaml")
            .unwrap_err();
        let YamlError::Syntax(syntax) = err else {
            panic!("expected syntax error");
        };
        assert!(syntax.message().contains("gaussian"));
        assert!(syntax.help.as_deref().unwrap_or("").contains("normal_95"));
    }

    #[test]
    fn test_missing_file() {
        let err = load_document::<ToleranceComponent>(Path::new("/nonexistent/tp.tmt.yaml")).unwrap_err();
        assert!(matches!(err, YamlError::Io { .. }));
    }
}
