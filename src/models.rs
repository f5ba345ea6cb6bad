//! Persisted row types for the policy database.
//!
//! Every persisted timestamp column is `TIMESTAMP WITHOUT TIME ZONE` (naive, implicitly
//! UTC), matching the original schema's `DateTime(timezone=False)` columns. `sqlx`'s
//! Postgres `DateTime<Utc>` impl only matches `TIMESTAMPTZ`, so these fields are typed
//! `NaiveDateTime` and converted to/from `DateTime<Utc>` only where business logic
//! compares them against `Utc::now()`.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Scope level a [`Policy`] applies at. Determines which selector fields are populated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum PolicyLevel {
    Global,
    Role,
    User,
    Endpoint,
    UserEndpoint,
    RoleEndpoint,
}

#[derive(Clone, Debug, sqlx::FromRow, Serialize, Deserialize)]
pub struct Policy {
    pub id: i64,
    pub level: PolicyLevel,
    pub role: Option<String>,
    pub username: Option<String>,
    pub endpoint: Option<String>,
    pub window_sec: i64,
    pub max_calls: i64,
    pub block_sec: i64,
    pub enabled: bool,
    pub priority: i64,
    pub notes: Option<String>,
    pub created_by: Option<String>,
    pub updated_at: NaiveDateTime,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct ManualBlock {
    pub id: i64,
    pub username: String,
    pub endpoint: String,
    pub block_until: NaiveDateTime,
    pub reason: Option<String>,
    pub created_by: Option<String>,
    pub created_at: NaiveDateTime,
    pub cleared_at: Option<NaiveDateTime>,
    pub cleared_by: Option<String>,
}

impl ManualBlock {
    /// Remaining seconds until `block_until`, floored at 1 so a near-expired block
    /// never reports a zero retry-after. `block_until` is naive-UTC; converted to an
    /// aware timestamp here so it can be compared against `now`.
    pub fn remaining_secs(&self, now: DateTime<Utc>) -> u64 {
        let block_until = Utc.from_utc_datetime(&self.block_until);
        let secs = (block_until - now).num_seconds();
        secs.max(1) as u64
    }

    /// Whether this block is still active: `cleared_at IS NULL AND block_until > now`.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.cleared_at.is_none() && Utc.from_utc_datetime(&self.block_until) > now
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Block,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Allow => "allow",
            Decision::Block => "block",
        }
    }
}

/// One row per rate-limit decision, subject to sampling before being written.
#[derive(Clone, Debug)]
pub struct AuditEvent {
    pub ts: NaiveDateTime,
    pub username: String,
    pub role: String,
    pub endpoint: String,
    pub decision: Decision,
    pub rule_source: String,
    pub window_sec: Option<i64>,
    pub max_calls: Option<i64>,
    pub block_sec: Option<i64>,
    pub calls: Option<i64>,
    pub reason: Option<String>,
}

/// The policy selected by the resolver, or the fallback derived from configuration.
#[derive(Clone, Debug)]
pub struct EffectivePolicy {
    pub enabled: bool,
    pub window_sec: i64,
    pub max_calls: i64,
    pub block_sec: i64,
    /// Rule source tag written to the audit event, e.g. `policy:user_endpoint:7` or `fallback`.
    pub source: String,
}

/// The admin/user account backing `/login` credential verification. Not part of the
/// rate-limit core; consulted only at login time.
#[derive(Clone, Debug, sqlx::FromRow)]
pub struct AdminUser {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
    pub role: String,
    pub active: bool,
    pub created_at: NaiveDateTime,
}
