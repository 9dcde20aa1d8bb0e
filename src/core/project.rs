//! Project discovery and structure

use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::core::identity::{EntityId, EntityPrefix};

/// Extension shared by every project document
pub const DOCUMENT_SUFFIX: &str = ".tmt.yaml";

/// A TMT project: a directory tree rooted at the parent of `.tmt/`
#[derive(Debug)]
pub struct Project {
    root: PathBuf,
}

impl Project {
    /// Find project root by walking up from the current directory
    pub fn discover() -> Result<Self, ProjectError> {
        let current = std::env::current_dir().map_err(|e| ProjectError::IoError(e.to_string()))?;
        Self::discover_from(&current)
    }

    /// Find project root by walking up from the given directory
    pub fn discover_from(start: &Path) -> Result<Self, ProjectError> {
        let mut current = start
            .canonicalize()
            .map_err(|e| ProjectError::IoError(e.to_string()))?;

        loop {
            if current.join(".tmt").is_dir() {
                return Ok(Self { root: current });
            }

            if !current.pop() {
                return Err(ProjectError::NotFound {
                    searched_from: start.to_path_buf(),
                });
            }
        }
    }

    /// Create a new project structure at the given path
    pub fn init(path: &Path) -> Result<Self, ProjectError> {
        let root = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        if root.join(".tmt").exists() {
            return Err(ProjectError::AlreadyExists(root));
        }
        Self::init_force(&root)
    }

    /// Initialize even if `.tmt/` exists; the config file is rewritten
    pub fn init_force(path: &Path) -> Result<Self, ProjectError> {
        let root = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        let tmt_dir = root.join(".tmt");

        std::fs::create_dir_all(&tmt_dir).map_err(|e| ProjectError::IoError(e.to_string()))?;
        std::fs::write(tmt_dir.join("config.yaml"), Self::default_config())
            .map_err(|e| ProjectError::IoError(e.to_string()))?;

        for prefix in EntityPrefix::all() {
            std::fs::create_dir_all(root.join(prefix.directory()))
                .map_err(|e| ProjectError::IoError(e.to_string()))?;
        }

        Ok(Self { root })
    }

    fn default_config() -> &'static str {
        r#"# TMT project configuration

# Default author for new test points
# author: ""

# Default output format (auto, yaml, json, csv, md, tsv)
# default_format: auto

# Risk requirements; test points may override per point
confidence: 0.95
reliability: 0.95
required_pfa: 0.02
required_tur: 4

# Guard-band solver PFA precision
# precision: 1.0e-5

# Samples for `tmt risk --monte-carlo`
# monte_carlo_samples: 100000

# Extra unit symbols (cannot shadow built-in units)
# units:
#   tf:
#     to_si: 9806.65
#     quantity: Force
"#
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the .tmt configuration directory
    pub fn tmt_dir(&self) -> PathBuf {
        self.root.join(".tmt")
    }

    /// Get the path for a new document file
    pub fn entity_path(&self, id: &EntityId) -> PathBuf {
        self.root
            .join(id.prefix().directory())
            .join(format!("{}{}", id, DOCUMENT_SUFFIX))
    }

    /// Iterate all document files of a given prefix type
    pub fn iter_entity_files(&self, prefix: EntityPrefix) -> impl Iterator<Item = PathBuf> {
        collect_documents(&self.root.join(prefix.directory())).into_iter()
    }
}

/// Walk a file or directory for `*.tmt.yaml` documents, sorted by path
pub fn collect_documents(path: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().to_string_lossy().ends_with(DOCUMENT_SUFFIX))
        .map(|e| e.path().to_path_buf())
        .collect();
    files.sort();
    files
}

/// Errors that can occur during project operations
#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("not a TMT project (searched from {searched_from:?}). Run 'tmt init' to create one.")]
    NotFound { searched_from: PathBuf },

    #[error("TMT project already exists at {0:?}")]
    AlreadyExists(PathBuf),

    #[error("IO error: {0}")]
    IoError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_project_init_creates_structure() {
        let tmp = tempdir().unwrap();
        let project = Project::init(tmp.path()).unwrap();

        assert!(project.tmt_dir().join("config.yaml").exists());
        assert!(project.root().join("testpoints").is_dir());
        assert!(project.root().join("instruments").is_dir());
    }

    #[test]
    fn test_project_init_fails_if_exists() {
        let tmp = tempdir().unwrap();
        Project::init(tmp.path()).unwrap();

        let err = Project::init(tmp.path()).unwrap_err();
        assert!(matches!(err, ProjectError::AlreadyExists(_)));
        assert!(Project::init_force(tmp.path()).is_ok());
    }

    #[test]
    fn test_default_config_parses() {
        let tmp = tempdir().unwrap();
        let project = Project::init(tmp.path()).unwrap();
        let config = crate::core::Config::from_file(&project.tmt_dir().join("config.yaml")).unwrap();
        assert_eq!(config.required_tur(), 4.0);
        assert_eq!(config.required_pfa(), 0.02);
    }

    #[test]
    fn test_project_discover_from_subdirectory() {
        let tmp = tempdir().unwrap();
        Project::init(tmp.path()).unwrap();

        let subdir = tmp.path().join("testpoints/dc/volts");
        std::fs::create_dir_all(&subdir).unwrap();

        let project = Project::discover_from(&subdir).unwrap();
        assert_eq!(
            project.root().canonicalize().unwrap(),
            tmp.path().canonicalize().unwrap()
        );
    }

    #[test]
    fn test_project_discover_fails_without_tmt_dir() {
        let tmp = tempdir().unwrap();
        let err = Project::discover_from(tmp.path()).unwrap_err();
        assert!(matches!(err, ProjectError::NotFound { .. }));
    }

    #[test]
    fn test_entity_files() {
        let tmp = tempdir().unwrap();
        let project = Project::init(tmp.path()).unwrap();
        let id = EntityId::new(EntityPrefix::Tp);
        let path = project.entity_path(&id);
        std::fs::write(&path, "x").unwrap();
        std::fs::write(project.root().join("testpoints/notes.txt"), "x").unwrap();

        let files: Vec<_> = project.iter_entity_files(EntityPrefix::Tp).collect();
        assert_eq!(files, vec![path]);
        assert_eq!(project.iter_entity_files(EntityPrefix::Inst).count(), 0);
    }
}
