//! Account lockout policy, gated purely by timestamp comparison.
//!
//! Two states per account: unlocked, and locked while `locked_until` lies in
//! the future. There is no background sweep; a lockout expires the moment the
//! stored instant passes. This module decides the policy inputs (threshold
//! and window end); the counter increment itself is applied by the store in
//! one atomic operation, so concurrent failures cannot lose counts.

use chrono::{DateTime, Utc};

use super::policy::SecuritySettings;

/// Inputs to the store-side failed-login transition: the threshold at which
/// the lockout trips and the instant the window would end.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FailurePenalty {
    pub max_attempts: i32,
    pub locked_until: DateTime<Utc>,
}

/// Whether the account is locked at `now`. A `locked_until` in the past
/// counts as unlocked.
#[must_use]
pub fn is_locked(locked_until: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    locked_until.is_some_and(|until| until > now)
}

/// Compute the penalty the store applies for a failed password check at
/// `now`: once the post-increment counter reaches `max_attempts`, the
/// account is locked until `now + lockout_duration`.
#[must_use]
pub fn failure_penalty(settings: &SecuritySettings, now: DateTime<Utc>) -> FailurePenalty {
    FailurePenalty {
        max_attempts: i32::try_from(settings.max_login_attempts()).unwrap_or(i32::MAX),
        locked_until: now + settings.lockout_duration(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn penalty_carries_threshold_and_window_end() {
        let settings = SecuritySettings::new()
            .with_max_login_attempts(3)
            .with_lockout_duration(Duration::minutes(10));
        let now = Utc::now();
        let penalty = failure_penalty(&settings, now);
        assert_eq!(penalty.max_attempts, 3);
        assert_eq!(penalty.locked_until, now + Duration::minutes(10));
    }

    #[test]
    fn oversized_threshold_saturates() {
        let settings = SecuritySettings::new().with_max_login_attempts(u32::MAX);
        let penalty = failure_penalty(&settings, Utc::now());
        assert_eq!(penalty.max_attempts, i32::MAX);
    }

    #[test]
    fn future_locked_until_is_locked() {
        let now = Utc::now();
        assert!(is_locked(Some(now + Duration::seconds(1)), now));
    }

    #[test]
    fn past_locked_until_is_treated_as_unlocked() {
        let now = Utc::now();
        assert!(!is_locked(Some(now - Duration::seconds(1)), now));
        assert!(!is_locked(None, now));
    }
}
