use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Prefix shared by every tenant namespace. The catalog scan relies on it.
pub const TENANT_SCHEMA_PREFIX: &str = "tenant_";

lazy_static::lazy_static! {
    static ref TENANT_SCHEMA_REGEX: regex::Regex =
        regex::Regex::new(r"^tenant_([1-9][0-9]*)$").unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidTenantId {
    #[error("tenant id must be positive, got {0}")]
    NotPositive(i64),

    #[error("tenant id is not a number: {0}")]
    NotANumber(String),
}

/// Identifier of a gym, owned by the business domain.
///
/// Always positive, so the derived namespace is a plain lowercase
/// identifier (`tenant_42`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct TenantId(i64);

impl TenantId {
    pub fn new(id: i64) -> Result<Self, InvalidTenantId> {
        if id <= 0 {
            return Err(InvalidTenantId::NotPositive(id));
        }
        Ok(Self(id))
    }

    pub fn get(self) -> i64 {
        self.0
    }

    /// Namespace (PostgreSQL schema) holding this tenant's tables.
    pub fn namespace(self) -> String {
        format!("{}{}", TENANT_SCHEMA_PREFIX, self.0)
    }

    /// Inverse of [`TenantId::namespace`]. Returns `None` for names that do
    /// not follow the tenant naming convention.
    pub fn from_namespace(namespace: &str) -> Option<Self> {
        let caps = TENANT_SCHEMA_REGEX.captures(namespace)?;
        caps[1].parse::<i64>().ok().and_then(|id| Self::new(id).ok())
    }
}

impl TryFrom<i64> for TenantId {
    type Error = InvalidTenantId;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TenantId> for i64 {
    fn from(id: TenantId) -> Self {
        id.0
    }
}

impl FromStr for TenantId {
    type Err = InvalidTenantId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id: i64 = s
            .trim()
            .parse()
            .map_err(|_| InvalidTenantId::NotANumber(s.to_string()))?;
        Self::new(id)
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status stored in `tenant_registry.status`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantStatus {
    Active,
    Dropped,
}

impl TenantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Dropped => "dropped",
        }
    }
}

impl From<String> for TenantStatus {
    fn from(s: String) -> Self {
        match s.to_lowercase().as_str() {
            "dropped" => Self::Dropped,
            _ => Self::Active,
        }
    }
}

/// Row of the shared `tenant_registry` table
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TenantRecord {
    pub tenant_id: i64,
    pub schema_name: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TenantRecord {
    pub fn status(&self) -> TenantStatus {
        TenantStatus::from(self.status.clone())
    }

    pub fn is_active(&self) -> bool {
        self.status() == TenantStatus::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_naming() {
        let id = TenantId::new(42).unwrap();
        assert_eq!(id.namespace(), "tenant_42");
        assert_eq!(TenantId::from_namespace("tenant_42"), Some(id));
    }

    #[test]
    fn test_from_namespace_rejects_foreign_names() {
        assert_eq!(TenantId::from_namespace("public"), None);
        assert_eq!(TenantId::from_namespace("tenant_"), None);
        assert_eq!(TenantId::from_namespace("tenant_007"), None);
        assert_eq!(TenantId::from_namespace("tenant_0"), None);
        assert_eq!(TenantId::from_namespace("tenant_12_archive"), None);
        assert_eq!(TenantId::from_namespace("xtenant_12"), None);
    }

    #[test]
    fn test_tenant_id_must_be_positive() {
        assert_eq!(TenantId::new(0), Err(InvalidTenantId::NotPositive(0)));
        assert_eq!(TenantId::new(-3), Err(InvalidTenantId::NotPositive(-3)));
        assert!("abc".parse::<TenantId>().is_err());
        assert_eq!("17".parse::<TenantId>().unwrap().get(), 17);
    }

    #[test]
    fn test_tenant_id_serde() {
        let id: TenantId = serde_json::from_str("9").unwrap();
        assert_eq!(id.get(), 9);
        assert_eq!(serde_json::to_string(&id).unwrap(), "9");
        assert!(serde_json::from_str::<TenantId>("-1").is_err());
    }

    #[test]
    fn test_status_from_string() {
        assert_eq!(TenantStatus::from("dropped".to_string()), TenantStatus::Dropped);
        assert_eq!(TenantStatus::from("ACTIVE".to_string()), TenantStatus::Active);
    }
}
