//! Entity trait - common interface for project documents

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};

use crate::core::identity::EntityId;

/// Common trait for all TMT documents
pub trait Entity: Serialize + DeserializeOwned {
    /// The ID prefix (e.g., "TP", "INST")
    const PREFIX: &'static str;

    fn id(&self) -> &EntityId;

    fn title(&self) -> &str;

    fn status(&self) -> Status;

    fn created(&self) -> DateTime<Utc>;

    fn author(&self) -> &str;
}

/// Document lifecycle: draft -> review -> approved -> released -> obsolete
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[derive(Default)]
pub enum Status {
    #[default]
    Draft,
    Review,
    Approved,
    Released,
    Obsolete,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Draft => write!(f, "draft"),
            Status::Review => write!(f, "review"),
            Status::Approved => write!(f, "approved"),
            Status::Released => write!(f, "released"),
            Status::Obsolete => write!(f, "obsolete"),
        }
    }
}

impl std::str::FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "draft" => Ok(Status::Draft),
            "review" => Ok(Status::Review),
            "approved" => Ok(Status::Approved),
            "released" => Ok(Status::Released),
            "obsolete" => Ok(Status::Obsolete),
            _ => Err(format!("Unknown status: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parse() {
        assert_eq!("Approved".parse::<Status>().unwrap(), Status::Approved);
        assert!("done".parse::<Status>().is_err());
    }
}
