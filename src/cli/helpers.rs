//! Shared helper functions for CLI commands

use console::style;
use miette::Result;
use std::path::Path;

use crate::core::entity::Entity;
use crate::core::warning::Warning;
use crate::entities::{Instrument, TestPoint};
use crate::yaml::load_document;

/// Load a document, rendering YAML errors with their source span and
/// rejecting documents whose ID belongs to another entity type
pub fn load_entity<E: Entity>(path: &Path) -> Result<E> {
    let entity: E = load_document(path).map_err(miette::Report::new)?;
    let prefix = entity.id().prefix();
    if prefix.as_str() != E::PREFIX {
        return Err(miette::miette!(
            "{} holds a {} document, expected {}",
            path.display(),
            prefix,
            E::PREFIX
        ));
    }
    tracing::debug!(
        id = %entity.id(),
        status = %entity.status(),
        author = entity.author(),
        created = %entity.created(),
        "loaded {}",
        entity.title()
    );
    Ok(entity)
}

pub fn load_test_point(path: &Path) -> Result<TestPoint> {
    load_entity(path)
}

pub fn load_instrument(path: &Path) -> Result<Instrument> {
    load_entity(path)
}

/// Print warnings to stderr unless quiet
pub fn print_warnings(warnings: &[Warning], quiet: bool) {
    if quiet {
        return;
    }
    for warning in warnings {
        eprintln!("{} {}", style("!").yellow(), warning);
    }
}

/// Truncate a string to max_len characters, adding "..." if truncated
pub fn truncate_str(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Escape a string for CSV-like output
///
/// Handles commas, quotes, and newlines according to RFC 4180.
pub fn escape_csv(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_str() {
        assert_eq!(truncate_str("hello", 10), "hello");
        assert_eq!(truncate_str("hello world", 8), "hello...");
        assert_eq!(truncate_str("±10 µV range", 6), "±10...");
    }

    #[test]
    fn test_escape_csv() {
        assert_eq!(escape_csv("simple"), "simple");
        assert_eq!(escape_csv("with,comma"), "\"with,comma\"");
        assert_eq!(escape_csv("with\"quote"), "\"with\"\"quote\"");
    }
}
