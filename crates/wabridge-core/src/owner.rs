//! Owner identity — the coach or staff account holding a WhatsApp session.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Longest owner id accepted. Ids become directory names.
pub const MAX_OWNER_ID_LEN: usize = 64;

/// Account role that owns a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OwnerType {
    #[default]
    Coach,
    Staff,
}

impl OwnerType {
    pub fn as_str(self) -> &'static str {
        match self {
            OwnerType::Coach => "coach",
            OwnerType::Staff => "staff",
        }
    }
}

impl fmt::Display for OwnerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OwnerType {
    type Err = OwnerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "coach" => Ok(OwnerType::Coach),
            "staff" => Ok(OwnerType::Staff),
            other => Err(OwnerError::UnknownOwnerType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OwnerError {
    #[error("owner id must be 1-{MAX_OWNER_ID_LEN} characters of [A-Za-z0-9_-], got {0:?}")]
    InvalidOwnerId(String),
    #[error("unknown owner type {0:?} (expected coach or staff)")]
    UnknownOwnerType(String),
    #[error("malformed session directory name {0:?}")]
    MalformedDirName(String),
}

/// Registry key: one session per (owner id, owner type).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnerKey {
    owner_id: String,
    owner_type: OwnerType,
}

impl OwnerKey {
    /// Validate and build a key.
    pub fn new(owner_id: impl Into<String>, owner_type: OwnerType) -> Result<Self, OwnerError> {
        let owner_id = owner_id.into();
        let valid = !owner_id.is_empty()
            && owner_id.len() <= MAX_OWNER_ID_LEN
            && owner_id
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
        if !valid {
            return Err(OwnerError::InvalidOwnerId(owner_id));
        }
        Ok(Self {
            owner_id,
            owner_type,
        })
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn owner_type(&self) -> OwnerType {
        self.owner_type
    }

    /// Directory name used by the auth-state store, e.g. `coach-64f1c2`.
    pub fn dir_name(&self) -> String {
        format!("{}-{}", self.owner_type, self.owner_id)
    }

    /// Inverse of [`OwnerKey::dir_name`].
    pub fn from_dir_name(name: &str) -> Result<Self, OwnerError> {
        let (ty, id) = name
            .split_once('-')
            .ok_or_else(|| OwnerError::MalformedDirName(name.to_string()))?;
        let owner_type = ty
            .parse()
            .map_err(|_| OwnerError::MalformedDirName(name.to_string()))?;
        Self::new(id, owner_type)
    }
}

impl fmt::Display for OwnerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.owner_type, self.owner_id)
    }
}
