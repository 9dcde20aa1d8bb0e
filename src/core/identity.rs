//! Document identity using type-prefixed ULIDs

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use ulid::Ulid;

/// Document type prefixes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntityPrefix {
    /// Test point with its uncertainty budget and risk requirements
    Tp,
    /// Instrument library entry
    Inst,
}

impl EntityPrefix {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityPrefix::Tp => "TP",
            EntityPrefix::Inst => "INST",
        }
    }

    pub fn all() -> &'static [EntityPrefix] {
        &[EntityPrefix::Tp, EntityPrefix::Inst]
    }

    /// Project directory holding documents of this type
    pub fn directory(&self) -> &'static str {
        match self {
            EntityPrefix::Tp => "testpoints",
            EntityPrefix::Inst => "instruments",
        }
    }

    /// Determine the prefix from a filename like "TP-xxx.tmt.yaml"
    pub fn from_filename(filename: &str) -> Option<Self> {
        let upper = filename.to_uppercase();
        Self::all()
            .iter()
            .copied()
            .find(|prefix| upper.starts_with(&format!("{}-", prefix.as_str())))
    }

    /// Determine the prefix from the filename, then from parent directories
    pub fn from_path(path: &std::path::Path) -> Option<Self> {
        if let Some(prefix) = path
            .file_name()
            .and_then(|name| Self::from_filename(&name.to_string_lossy()))
        {
            return Some(prefix);
        }

        path.components().find_map(|component| match component {
            std::path::Component::Normal(os_str) => {
                let dir = os_str.to_string_lossy().to_lowercase();
                Self::all()
                    .iter()
                    .copied()
                    .find(|prefix| prefix.directory() == dir)
            }
            _ => None,
        })
    }
}

impl fmt::Display for EntityPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EntityPrefix {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "TP" => Ok(EntityPrefix::Tp),
            "INST" => Ok(EntityPrefix::Inst),
            _ => Err(IdParseError::InvalidPrefix(s.to_string())),
        }
    }
}

/// A unique document identifier combining a type prefix and ULID
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityId {
    prefix: EntityPrefix,
    ulid: Ulid,
}

impl EntityId {
    pub fn new(prefix: EntityPrefix) -> Self {
        Self {
            prefix,
            ulid: Ulid::new(),
        }
    }

    pub fn prefix(&self) -> EntityPrefix {
        self.prefix
    }

    pub fn parse(s: &str) -> Result<Self, IdParseError> {
        s.parse()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.prefix, self.ulid)
    }
}

impl FromStr for EntityId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (prefix_str, ulid_str) = s
            .split_once('-')
            .ok_or_else(|| IdParseError::MissingDelimiter(s.to_string()))?;

        let prefix = prefix_str.parse()?;
        let ulid = Ulid::from_string(ulid_str)
            .map_err(|e| IdParseError::InvalidUlid(ulid_str.to_string(), e.to_string()))?;

        Ok(Self { prefix, ulid })
    }
}

impl Serialize for EntityId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for EntityId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Error)]
pub enum IdParseError {
    #[error("invalid document prefix: '{0}' (valid: TP, INST)")]
    InvalidPrefix(String),

    #[error("missing '-' delimiter in document ID: '{0}'")]
    MissingDelimiter(String),

    #[error("invalid ULID '{0}': {1}")]
    InvalidUlid(String, String),
}
