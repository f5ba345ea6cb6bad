//! Policy Resolver (C4): selects the single effective policy for `(username, role, endpoint)`.

use crate::config::FallbackPolicy;
use crate::models::{EffectivePolicy, Policy, PolicyLevel};

/// Iterates the cache's policies in sorted order and returns the first policy whose
/// scope matches. Ordering is strictly by `priority` (then `updated_at`); the `level`
/// column carries no implicit precedence independent of priority.
pub fn resolve(
    policies: &[Policy],
    username: &str,
    role: &str,
    endpoint: &str,
    fallback: &FallbackPolicy,
) -> EffectivePolicy {
    for p in policies {
        let matches = match p.level {
            PolicyLevel::UserEndpoint => {
                p.username.as_deref() == Some(username) && p.endpoint.as_deref() == Some(endpoint)
            }
            PolicyLevel::User => p.username.as_deref() == Some(username),
            PolicyLevel::RoleEndpoint => {
                p.role.as_deref() == Some(role) && p.endpoint.as_deref() == Some(endpoint)
            }
            PolicyLevel::Role => p.role.as_deref() == Some(role),
            PolicyLevel::Endpoint => p.endpoint.as_deref() == Some(endpoint),
            PolicyLevel::Global => true,
        };

        if matches {
            return EffectivePolicy {
                enabled: p.enabled,
                window_sec: p.window_sec,
                max_calls: p.max_calls,
                block_sec: p.block_sec,
                source: format!("policy:{}:{}", level_tag(p.level), p.id),
            };
        }
    }

    EffectivePolicy {
        enabled: fallback.enabled,
        window_sec: fallback.window_sec as i64,
        max_calls: fallback.max_calls as i64,
        block_sec: fallback.block_sec as i64,
        source: "fallback".to_string(),
    }
}

fn level_tag(level: PolicyLevel) -> &'static str {
    match level {
        PolicyLevel::Global => "global",
        PolicyLevel::Role => "role",
        PolicyLevel::User => "user",
        PolicyLevel::Endpoint => "endpoint",
        PolicyLevel::UserEndpoint => "user_endpoint",
        PolicyLevel::RoleEndpoint => "role_endpoint",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn policy(level: PolicyLevel, priority: i64, username: Option<&str>, role: Option<&str>, endpoint: Option<&str>, max_calls: i64) -> Policy {
        Policy {
            id: priority,
            level,
            role: role.map(str::to_string),
            username: username.map(str::to_string),
            endpoint: endpoint.map(str::to_string),
            window_sec: 60,
            max_calls,
            block_sec: 120,
            enabled: true,
            priority,
            notes: None,
            created_by: None,
            updated_at: Utc::now().naive_utc(),
        }
    }

    fn fallback() -> FallbackPolicy {
        FallbackPolicy {
            enabled: true,
            window_sec: 3600,
            max_calls: 1,
            block_sec: 10800,
        }
    }

    #[test]
    fn higher_priority_wins_precedence() {
        // S2: a broad user policy and a narrower, higher-priority user_endpoint policy.
        let p1 = policy(PolicyLevel::User, 5, Some("u1"), None, None, 1);
        let p2 = policy(PolicyLevel::UserEndpoint, 50, Some("u1"), None, Some("/e"), 100);
        let policies = vec![p2.clone(), p1.clone()]; // already sorted by priority desc

        let effective = resolve(&policies, "u1", "user", "/e", &fallback());
        assert_eq!(effective.max_calls, 100);
        assert_eq!(effective.source, "policy:user_endpoint:50");

        let effective_other = resolve(&policies, "u1", "user", "/other", &fallback());
        assert_eq!(effective_other.max_calls, 1);
        assert_eq!(effective_other.source, "policy:user:5");
    }

    #[test]
    fn no_match_uses_fallback() {
        let effective = resolve(&[], "u1", "user", "/e", &fallback());
        assert_eq!(effective.source, "fallback");
        assert_eq!(effective.max_calls, 1);
    }

    #[test]
    fn global_matches_unconditionally_but_loses_to_higher_priority() {
        let global = policy(PolicyLevel::Global, 1, None, None, None, 5);
        let user = policy(PolicyLevel::User, 10, Some("u1"), None, None, 2);
        let policies = vec![user, global];

        let effective = resolve(&policies, "u1", "user", "/anything", &fallback());
        assert_eq!(effective.max_calls, 2);
    }
}
