//! Decision Engine (C5): the central state machine orchestrating manual-block check,
//! policy resolution, counter increment, verdict, and sampled audit emission.

use chrono::Utc;
use rand::Rng;
use std::sync::Arc;

use crate::config::{Config, DegradedMode};
use crate::counter_store::{block_key, counter_key, CounterStoreGateway};
use crate::error::AppError;
use crate::models::{AuditEvent, Decision};
use crate::policy_cache::PolicyCache;
use crate::policy_store::PolicyStoreGateway;
use crate::resolver;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Blocked { retry_after_secs: u64 },
    ManuallyBlocked { retry_after_secs: u64 },
}

pub struct DecisionEngine {
    policy_store: Arc<dyn PolicyStoreGateway>,
    counter_store: Arc<dyn CounterStoreGateway>,
    policy_cache: Arc<PolicyCache>,
    config: Arc<Config>,
}

impl DecisionEngine {
    pub fn new(
        policy_store: Arc<dyn PolicyStoreGateway>,
        counter_store: Arc<dyn CounterStoreGateway>,
        policy_cache: Arc<PolicyCache>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            policy_store,
            counter_store,
            policy_cache,
            config,
        }
    }

    pub async fn check(&self, username: &str, role: &str, endpoint: &str) -> Result<Verdict, AppError> {
        // 1. Manual block check. Fail-open on a policy DB outage: serve the counter
        // pipeline anyway.
        match self.policy_store.find_active_block(username, endpoint).await {
            Ok(Some(block)) => {
                let secs = block.remaining_secs(Utc::now());
                self.emit(
                    username,
                    role,
                    endpoint,
                    Decision::Block,
                    "manual_block",
                    None,
                    None,
                    None,
                    None,
                    Some(format!("DB block {secs}s")),
                    true, // always written
                )
                .await;
                return Ok(Verdict::ManuallyBlocked { retry_after_secs: secs });
            }
            Ok(None) => {}
            Err(AppError::PolicyDbUnavailable) => {
                tracing::warn!(username, endpoint, "policy db unavailable for manual-block check, failing open");
            }
            Err(other) => return Err(other),
        }

        // 2. Resolve effective policy.
        let policies = self.policy_cache.get(&self.policy_store).await;
        let effective = resolver::resolve(&policies, username, role, endpoint, &self.config.fallback);

        // 3. Disabled policy: allow unconditionally.
        if !effective.enabled {
            self.emit(
                username,
                role,
                endpoint,
                Decision::Allow,
                &effective.source,
                Some(effective.window_sec),
                Some(effective.max_calls),
                Some(effective.block_sec),
                None,
                Some("disabled".to_string()),
                false,
            )
            .await;
            return Ok(Verdict::Allow);
        }

        // 4. Compute fixed window id.
        let now_epoch = Utc::now().timestamp();
        let window_id = now_epoch / effective.window_sec;

        let c_key = counter_key(username, endpoint, window_id);
        let b_key = block_key(username, endpoint);

        // 5. KV block check.
        let ttl = match self.counter_store.ttl(&b_key).await {
            Ok(ttl) => ttl,
            Err(AppError::KvUnavailable) => return self.degraded(username, role, endpoint, &effective).await,
            Err(other) => return Err(other),
        };

        if ttl > 0 {
            self.emit(
                username,
                role,
                endpoint,
                Decision::Block,
                "kv_block",
                Some(effective.window_sec),
                Some(effective.max_calls),
                Some(effective.block_sec),
                None,
                Some(format!("TTL {ttl}s")),
                true,
            )
            .await;
            return Ok(Verdict::Blocked { retry_after_secs: ttl as u64 });
        }

        // 6. Increment.
        let expiry = effective.window_sec + effective.block_sec;
        let calls = match self.counter_store.incr_with_expiry(&c_key, expiry).await {
            Ok(calls) => calls,
            Err(AppError::KvUnavailable) => return self.degraded(username, role, endpoint, &effective).await,
            Err(other) => return Err(other),
        };

        // 7. Verdict.
        if calls > effective.max_calls {
            if let Err(e) = self.counter_store.set_block(&b_key, effective.block_sec).await {
                tracing::warn!(error = %e, "failed to set block key after exceeding limit");
            }
            self.emit(
                username,
                role,
                endpoint,
                Decision::Block,
                "kv_counter",
                Some(effective.window_sec),
                Some(effective.max_calls),
                Some(effective.block_sec),
                Some(calls),
                Some("exceeded".to_string()),
                true,
            )
            .await;
            Ok(Verdict::Blocked {
                retry_after_secs: effective.block_sec as u64,
            })
        } else {
            self.emit(
                username,
                role,
                endpoint,
                Decision::Allow,
                "kv_counter",
                Some(effective.window_sec),
                Some(effective.max_calls),
                Some(effective.block_sec),
                Some(calls),
                None,
                false,
            )
            .await;
            Ok(Verdict::Allow)
        }
    }

    /// The KV store is unreachable: the whole pipeline is degraded. Does not silently
    /// allow nor silently block; the configured degraded-mode policy decides.
    async fn degraded(
        &self,
        username: &str,
        role: &str,
        endpoint: &str,
        effective: &crate::models::EffectivePolicy,
    ) -> Result<Verdict, AppError> {
        match self.config.kv_degraded_mode {
            DegradedMode::Allow => {
                tracing::warn!(username, endpoint, "kv store unavailable, degraded-allow");
                Ok(Verdict::Allow)
            }
            DegradedMode::Deny => {
                tracing::warn!(username, endpoint, "kv store unavailable, degraded-deny");
                let _ = effective;
                Err(AppError::KvUnavailable)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn emit(
        &self,
        username: &str,
        role: &str,
        endpoint: &str,
        decision: Decision,
        rule_source: &str,
        window_sec: Option<i64>,
        max_calls: Option<i64>,
        block_sec: Option<i64>,
        calls: Option<i64>,
        reason: Option<String>,
        always_write: bool,
    ) {
        if !always_write && self.config.event_sampling < 1.0 {
            if rand::thread_rng().gen::<f64>() > self.config.event_sampling {
                return;
            }
        }

        let event = AuditEvent {
            ts: Utc::now().naive_utc(),
            username: username.to_string(),
            role: role.to_string(),
            endpoint: endpoint.to_string(),
            decision,
            rule_source: rule_source.to_string(),
            window_sec,
            max_calls,
            block_sec,
            calls,
            reason,
        };

        self.policy_store.append_event(&event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FallbackPolicy;
    use crate::counter_store::fake::FakeCounterStore;
    use crate::models::{ManualBlock, Policy, PolicyLevel};
    use crate::policy_store::fake::FakePolicyStore;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use std::time::Duration;

    fn test_config(fallback: FallbackPolicy) -> Config {
        Config {
            database_url: "postgres://unused".to_string(),
            policy_database_url: "postgres://unused".to_string(),
            redis_url: "redis://unused".to_string(),
            fallback,
            event_sampling: 1.0,
            db_connection_timeout: Duration::from_secs(5),
            http_timeout: Duration::from_secs(5),
            kv_degraded_mode: DegradedMode::Deny,
            bind_addr: "0.0.0.0:0".to_string(),
        }
    }

    fn user_policy(username: &str, endpoint: &str, max_calls: i64) -> Policy {
        Policy {
            id: 1,
            level: PolicyLevel::UserEndpoint,
            role: None,
            username: Some(username.to_string()),
            endpoint: Some(endpoint.to_string()),
            window_sec: 60,
            max_calls,
            block_sec: 120,
            enabled: true,
            priority: 10,
            notes: None,
            created_by: None,
            updated_at: Utc::now().naive_utc(),
        }
    }

    fn engine(policy_store: FakePolicyStore, fallback: FallbackPolicy) -> DecisionEngine {
        DecisionEngine::new(
            Arc::new(policy_store),
            Arc::new(FakeCounterStore::new()),
            Arc::new(PolicyCache::new()),
            Arc::new(test_config(fallback)),
        )
    }

    fn disabled_fallback() -> FallbackPolicy {
        FallbackPolicy {
            enabled: false,
            window_sec: 3600,
            max_calls: 1,
            block_sec: 10800,
        }
    }

    #[tokio::test]
    async fn single_user_cap_allows_then_blocks() {
        // S1: max_calls = 2 admits exactly two requests within the window, then blocks.
        let store = FakePolicyStore::with_policies(vec![user_policy("alice", "/reports", 2)]);
        let engine = engine(store, disabled_fallback());

        assert_eq!(
            engine.check("alice", "user", "/reports").await.unwrap(),
            Verdict::Allow
        );
        assert_eq!(
            engine.check("alice", "user", "/reports").await.unwrap(),
            Verdict::Allow
        );
        match engine.check("alice", "user", "/reports").await.unwrap() {
            Verdict::Blocked { retry_after_secs } => assert_eq!(retry_after_secs, 120),
            other => panic!("expected Blocked, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn manual_block_overrides_policy_resolution() {
        // S3: an active manual block short-circuits before the counter pipeline ever runs.
        let store = FakePolicyStore::with_policies(vec![user_policy("bob", "/reports", 1000)]);
        store.block(ManualBlock {
            id: 1,
            username: "bob".to_string(),
            endpoint: "/reports".to_string(),
            block_until: (Utc::now() + ChronoDuration::seconds(30)).naive_utc(),
            reason: Some("abuse".to_string()),
            created_by: Some("admin".to_string()),
            created_at: Utc::now().naive_utc(),
            cleared_at: None,
            cleared_by: None,
        });
        let engine = engine(store, disabled_fallback());

        match engine.check("bob", "user", "/reports").await.unwrap() {
            Verdict::ManuallyBlocked { retry_after_secs } => assert!(retry_after_secs > 0),
            other => panic!("expected ManuallyBlocked, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn no_matching_policy_uses_fallback() {
        // S4: fallback applies when no stored policy matches the caller.
        let fallback = FallbackPolicy {
            enabled: true,
            window_sec: 3600,
            max_calls: 1,
            block_sec: 10800,
        };
        let store = FakePolicyStore::new();
        let engine = engine(store, fallback);

        assert_eq!(
            engine.check("nobody", "user", "/reports").await.unwrap(),
            Verdict::Allow
        );
        match engine.check("nobody", "user", "/reports").await.unwrap() {
            Verdict::Blocked { retry_after_secs } => assert_eq!(retry_after_secs, 10800),
            other => panic!("expected Blocked, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn disabled_policy_allows_unconditionally() {
        let mut policy = user_policy("carol", "/reports", 1);
        policy.enabled = false;
        let store = FakePolicyStore::with_policies(vec![policy]);
        let engine = engine(store, disabled_fallback());

        for _ in 0..5 {
            assert_eq!(
                engine.check("carol", "user", "/reports").await.unwrap(),
                Verdict::Allow
            );
        }
    }

    struct UnavailableCounterStore;

    #[async_trait]
    impl CounterStoreGateway for UnavailableCounterStore {
        async fn incr_with_expiry(&self, _key: &str, _ttl_secs: i64) -> Result<i64, AppError> {
            Err(AppError::KvUnavailable)
        }
        async fn set_block(&self, _key: &str, _ttl_secs: i64) -> Result<(), AppError> {
            Err(AppError::KvUnavailable)
        }
        async fn ttl(&self, _key: &str) -> Result<i64, AppError> {
            Err(AppError::KvUnavailable)
        }
    }

    #[tokio::test]
    async fn kv_outage_denies_by_default() {
        let store = FakePolicyStore::with_policies(vec![user_policy("dave", "/reports", 5)]);
        let engine = DecisionEngine::new(
            Arc::new(store),
            Arc::new(UnavailableCounterStore),
            Arc::new(PolicyCache::new()),
            Arc::new(test_config(disabled_fallback())),
        );

        let err = engine.check("dave", "user", "/reports").await.unwrap_err();
        assert!(matches!(err, AppError::KvUnavailable));
    }

    #[tokio::test]
    async fn kv_outage_allows_when_degraded_mode_is_allow() {
        let store = FakePolicyStore::with_policies(vec![user_policy("erin", "/reports", 5)]);
        let mut config = test_config(disabled_fallback());
        config.kv_degraded_mode = DegradedMode::Allow;
        let engine = DecisionEngine::new(
            Arc::new(store),
            Arc::new(UnavailableCounterStore),
            Arc::new(PolicyCache::new()),
            Arc::new(config),
        );

        assert_eq!(
            engine.check("erin", "user", "/reports").await.unwrap(),
            Verdict::Allow
        );
    }
}
