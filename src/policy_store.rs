//! Policy Store Gateway (C1): reads enabled policies and active manual blocks from the
//! policy database, and appends audit events best-effort.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::{PgPoolOptions, PgPool};
use std::time::Duration;

use crate::error::AppError;
use crate::models::{AdminUser, AuditEvent, ManualBlock, Policy};

/// What the Decision Engine and Policy Cache need from the policy database. Abstracted
/// behind a trait so both can be exercised in tests without a live Postgres instance.
#[async_trait]
pub trait PolicyStoreGateway: Send + Sync {
    async fn list_enabled_policies(&self) -> Result<Vec<Policy>, AppError>;
    async fn find_active_block(&self, username: &str, endpoint: &str) -> Result<Option<ManualBlock>, AppError>;
    async fn append_event(&self, event: &AuditEvent);
    async fn find_admin_user(&self, username: &str) -> Result<Option<AdminUser>, AppError>;
}

pub struct PolicyStore {
    pool: PgPool,
    // Per-call deadline, separate from the pool's own `acquire_timeout`; bounds a query
    // that acquired a connection but is slow to respond.
    call_timeout: Duration,
}

impl PolicyStore {
    pub async fn connect(database_url: &str, connect_timeout: Duration) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(connect_timeout)
            .test_before_acquire(true)
            .max_lifetime(Duration::from_secs(3600))
            .connect(database_url)
            .await?;
        Ok(Self {
            pool,
            call_timeout: connect_timeout,
        })
    }
}

#[async_trait]
impl PolicyStoreGateway for PolicyStore {
    /// Sorted by `priority` descending, then `updated_at` descending as tie-break.
    async fn list_enabled_policies(&self) -> Result<Vec<Policy>, AppError> {
        let query = sqlx::query_as::<_, Policy>(
            r#"
            SELECT id, level, role, username, endpoint, window_sec, max_calls, block_sec,
                   enabled, priority, notes, created_by, updated_at
            FROM rate_limit_policy
            WHERE enabled = true
            ORDER BY priority DESC, updated_at DESC
            "#,
        )
        .fetch_all(&self.pool);

        match tokio::time::timeout(self.call_timeout, query).await {
            Ok(Ok(policies)) => Ok(policies),
            Ok(Err(e)) => {
                tracing::error!(error = %e, "failed to list enabled policies");
                Err(AppError::PolicyDbUnavailable)
            }
            Err(_) => {
                tracing::error!("list_enabled_policies timed out");
                Err(AppError::PolicyDbUnavailable)
            }
        }
    }

    /// Active predicate: `cleared_at IS NULL AND block_until > now()`.
    async fn find_active_block(
        &self,
        username: &str,
        endpoint: &str,
    ) -> Result<Option<ManualBlock>, AppError> {
        let query = sqlx::query_as::<_, ManualBlock>(
            r#"
            SELECT id, username, endpoint, block_until, reason, created_by, created_at,
                   cleared_at, cleared_by
            FROM rate_limit_block
            WHERE username = $1 AND endpoint = $2
              AND cleared_at IS NULL AND block_until > $3
            ORDER BY block_until DESC
            LIMIT 1
            "#,
        )
        .bind(username)
        .bind(endpoint)
        .bind(Utc::now().naive_utc())
        .fetch_optional(&self.pool);

        match tokio::time::timeout(self.call_timeout, query).await {
            Ok(Ok(block)) => Ok(block),
            Ok(Err(e)) => {
                tracing::error!(error = %e, "failed to check manual block");
                Err(AppError::PolicyDbUnavailable)
            }
            Err(_) => {
                tracing::error!("find_active_block timed out");
                Err(AppError::PolicyDbUnavailable)
            }
        }
    }

    /// Best-effort: a failure to persist never changes the request verdict, only gets
    /// logged locally.
    async fn append_event(&self, event: &AuditEvent) {
        let query = sqlx::query(
            r#"
            INSERT INTO rate_limit_event
                (ts, username, role, endpoint, decision, rule_source, window_sec,
                 max_calls, block_sec, calls, reason)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(event.ts)
        .bind(&event.username)
        .bind(&event.role)
        .bind(&event.endpoint)
        .bind(event.decision.as_str())
        .bind(&event.rule_source)
        .bind(event.window_sec)
        .bind(event.max_calls)
        .bind(event.block_sec)
        .bind(event.calls)
        .bind(&event.reason)
        .execute(&self.pool);

        match tokio::time::timeout(self.call_timeout, query).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "failed to persist audit event (dropped)"),
            Err(_) => tracing::warn!("audit event write timed out (dropped)"),
        }
    }

    async fn find_admin_user(&self, username: &str) -> Result<Option<AdminUser>, AppError> {
        let query = sqlx::query_as::<_, AdminUser>(
            "SELECT id, username, password_hash, role, active, created_at FROM admin_user WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(&self.pool);

        match tokio::time::timeout(self.call_timeout, query).await {
            Ok(Ok(user)) => Ok(user),
            Ok(Err(e)) => {
                tracing::error!(error = %e, "failed to look up admin user");
                Err(AppError::Internal("user lookup failed".to_string()))
            }
            Err(_) => {
                tracing::error!("find_admin_user timed out");
                Err(AppError::Internal("user lookup timed out".to_string()))
            }
        }
    }
}

/// An in-process stand-in for the policy database, used by the Decision Engine's tests.
#[cfg(test)]
pub mod fake {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    pub struct FakePolicyStore {
        pub policies: Mutex<Vec<Policy>>,
        pub blocks: Mutex<Vec<ManualBlock>>,
        pub events: Mutex<Vec<AuditEvent>>,
    }

    impl FakePolicyStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_policies(policies: Vec<Policy>) -> Self {
            Self {
                policies: Mutex::new(policies),
                blocks: Mutex::new(Vec::new()),
                events: Mutex::new(Vec::new()),
            }
        }

        pub fn block(&self, block: ManualBlock) {
            self.blocks.lock().push(block);
        }
    }

    #[async_trait]
    impl PolicyStoreGateway for FakePolicyStore {
        async fn list_enabled_policies(&self) -> Result<Vec<Policy>, AppError> {
            Ok(self.policies.lock().clone())
        }

        async fn find_active_block(&self, username: &str, endpoint: &str) -> Result<Option<ManualBlock>, AppError> {
            let now = Utc::now();
            Ok(self
                .blocks
                .lock()
                .iter()
                .find(|b| b.username == username && b.endpoint == endpoint && b.is_active(now))
                .cloned())
        }

        async fn append_event(&self, event: &AuditEvent) {
            self.events.lock().push(event.clone());
        }

        async fn find_admin_user(&self, _username: &str) -> Result<Option<AdminUser>, AppError> {
            Ok(None)
        }
    }
}
