//! Named roles: a Grafana Cloud authorization level plus TTL bounds.
//!
//! Roles live under [`ROLE_STORAGE_PREFIX`], one JSON record per name with
//! `gc_role`, `ttl` and `max_ttl` (seconds). Deleting a role has no effect on
//! keys already issued from it, but their leases can no longer be renewed.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{Backend, WriteOperation};
use crate::client::GrafanaCloudRole;
use crate::error::{EngineError, EngineResult};
use crate::storage;

pub const ROLE_STORAGE_PREFIX: &str = "roles/";

/// TTL applied when a role is created without one. Zero defers to the host.
pub const DEFAULT_TTL: Duration = Duration::ZERO;

/// Stored role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleEntry {
    pub gc_role: GrafanaCloudRole,
    #[serde(with = "duration_secs", default)]
    pub ttl: Duration,
    #[serde(with = "duration_secs", default)]
    pub max_ttl: Duration,
}

/// Partial role write. Absent fields keep their stored value on update.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoleUpdate {
    #[serde(default)]
    pub gc_role: Option<String>,
    #[serde(default)]
    pub ttl: Option<DurationInput>,
    #[serde(default)]
    pub max_ttl: Option<DurationInput>,
}

/// Duration given either as integer seconds or as text like `"90"`, `"2h"`, `"1h30m"`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum DurationInput {
    Seconds(i64),
    Text(String),
}

impl DurationInput {
    pub fn to_duration(&self, field: &str) -> EngineResult<Duration> {
        let invalid = || EngineError::validation(format!("invalid {} value: {}", field, self));
        match self {
            DurationInput::Seconds(secs) => u64::try_from(*secs)
                .map(Duration::from_secs)
                .map_err(|_| invalid()),
            DurationInput::Text(text) => parse_duration(text).ok_or_else(invalid),
        }
    }
}

impl std::fmt::Display for DurationInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DurationInput::Seconds(secs) => write!(f, "{}", secs),
            DurationInput::Text(text) => write!(f, "{:?}", text),
        }
    }
}

/// Parse bare seconds or a sequence of `<number><unit>` pairs (units `s`, `m`, `h`, `d`).
fn parse_duration(text: &str) -> Option<Duration> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(secs) = text.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let mut total: u64 = 0;
    let mut digits = String::new();
    for ch in text.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            continue;
        }
        let unit = match ch {
            's' => 1,
            'm' => 60,
            'h' => 3600,
            'd' => 86400,
            _ => return None,
        };
        let value: u64 = digits.parse().ok()?;
        total = total.checked_add(value.checked_mul(unit)?)?;
        digits.clear();
    }
    if !digits.is_empty() {
        return None;
    }
    Some(Duration::from_secs(total))
}

fn role_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\w(([\w\-.]+)?\w)?$").expect("valid role name regex"))
}

/// Check a role name before using it as a storage key.
pub fn validate_role_name(name: &str) -> EngineResult<()> {
    if name.is_empty() {
        return Err(EngineError::validation("missing role name"));
    }
    if !role_name_pattern().is_match(name) {
        return Err(EngineError::validation(format!("invalid role name: {}", name)));
    }
    Ok(())
}

fn parse_gc_role(value: &str) -> EngineResult<GrafanaCloudRole> {
    GrafanaCloudRole::parse(value).ok_or_else(|| {
        let valid: Vec<&str> = GrafanaCloudRole::ALL.iter().map(|r| r.as_str()).collect();
        EngineError::validation(format!(
            "provided gc_role {} is not valid (expected one of: {})",
            value,
            valid.join(", ")
        ))
    })
}

fn role_key(name: &str) -> String {
    format!("{}{}", ROLE_STORAGE_PREFIX, name)
}

impl Backend {
    pub async fn get_role(&self, name: &str) -> EngineResult<Option<RoleEntry>> {
        if name.is_empty() {
            return Err(EngineError::validation("missing role name"));
        }
        Ok(storage::get_json(self.storage(), &role_key(name)).await?)
    }

    /// Create or update a role.
    ///
    /// `ttl <= max_ttl` (when `max_ttl` is non-zero) is checked on the merged
    /// record for every write. Nothing is persisted when validation fails.
    pub async fn write_role(
        &self,
        name: &str,
        update: RoleUpdate,
        operation: WriteOperation,
    ) -> EngineResult<RoleEntry> {
        validate_role_name(name)?;
        let create = operation == WriteOperation::Create;

        let existing = self.get_role(name).await?;
        if existing.is_none() && !create {
            return Err(EngineError::not_found(format!("role {} not found", name)));
        }

        let gc_role = match (&update.gc_role, &existing) {
            (Some(raw), _) => parse_gc_role(raw)?,
            (None, Some(entry)) if !create => entry.gc_role,
            (None, _) => return Err(EngineError::validation("missing gc_role value")),
        };

        let ttl = match (&update.ttl, &existing) {
            (Some(input), _) => input.to_duration("ttl")?,
            (None, Some(entry)) if !create => entry.ttl,
            (None, _) => DEFAULT_TTL,
        };

        let max_ttl = match (&update.max_ttl, &existing) {
            (Some(input), _) => input.to_duration("max_ttl")?,
            (None, Some(entry)) if !create => entry.max_ttl,
            (None, _) => DEFAULT_TTL,
        };

        if !max_ttl.is_zero() && ttl > max_ttl {
            return Err(EngineError::validation("ttl cannot be greater than max_ttl"));
        }

        let entry = RoleEntry {
            gc_role,
            ttl,
            max_ttl,
        };
        storage::put_json(self.storage(), &role_key(name), &entry).await?;

        tracing::info!(
            role = %name,
            gc_role = %entry.gc_role,
            ttl_secs = entry.ttl.as_secs(),
            max_ttl_secs = entry.max_ttl.as_secs(),
            ?operation,
            "Stored role"
        );
        Ok(entry)
    }

    pub async fn role_exists(&self, name: &str) -> EngineResult<bool> {
        Ok(self.get_role(name).await?.is_some())
    }

    /// Remove a role. Already issued keys are left untouched.
    pub async fn delete_role(&self, name: &str) -> EngineResult<()> {
        if name.is_empty() {
            return Err(EngineError::validation("missing role name"));
        }
        self.storage().delete(&role_key(name)).await?;
        tracing::info!(role = %name, "Deleted role");
        Ok(())
    }

    /// List role names in lexical order.
    pub async fn list_roles(&self) -> EngineResult<Vec<String>> {
        Ok(self.storage().list(ROLE_STORAGE_PREFIX).await?)
    }
}

/// Serialize a [`Duration`] as whole seconds.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
