use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScopeParseError {
    #[error("Scope must look like <kind>:<id>, got {0:?}")]
    Malformed(String),

    #[error("Unknown scope kind: {0}")]
    UnknownKind(String),
}

/// Delivery-group key for real-time fan-out.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Scope {
    Child(String),
    User(String),
    Classroom(String),
}

impl Scope {
    pub fn child(id: impl Into<String>) -> Self {
        Scope::Child(id.into())
    }

    pub fn user(id: impl Into<String>) -> Self {
        Scope::User(id.into())
    }

    pub fn classroom(id: impl Into<String>) -> Self {
        Scope::Classroom(id.into())
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Child(id) => write!(f, "child:{}", id),
            Scope::User(id) => write!(f, "user:{}", id),
            Scope::Classroom(id) => write!(f, "classroom:{}", id),
        }
    }
}

impl FromStr for Scope {
    type Err = ScopeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| ScopeParseError::Malformed(s.to_string()))?;

        if id.trim().is_empty() {
            return Err(ScopeParseError::Malformed(s.to_string()));
        }

        match kind {
            "child" => Ok(Scope::Child(id.to_string())),
            "user" => Ok(Scope::User(id.to_string())),
            "classroom" => Ok(Scope::Classroom(id.to_string())),
            other => Err(ScopeParseError::UnknownKind(other.to_string())),
        }
    }
}

impl TryFrom<String> for Scope {
    type Error = ScopeParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Scope> for String {
    fn from(scope: Scope) -> Self {
        scope.to_string()
    }
}
