//! Security policy snapshot and pure input validation.
//!
//! Settings are loaded from the store as a key/value map once per operation,
//! so policy changes take effect without a restart. Missing or unparseable
//! keys fall back to the defaults below.

use std::collections::HashMap;

use chrono::Duration;
use regex::Regex;

const DEFAULT_MIN_PASSWORD_LENGTH: usize = 8;
const DEFAULT_MAX_LOGIN_ATTEMPTS: u32 = 5;
const DEFAULT_LOCKOUT_MINUTES: i64 = 30;
const DEFAULT_SESSION_HOURS: i64 = 24;

/// Characters accepted as "special" by the password policy.
const SPECIAL_CHARACTERS: &str = r#"!@#$%^&*(),.?":{}|<>"#;

/// Immutable policy snapshot in effect for one operation.
#[derive(Clone, Debug)]
pub struct SecuritySettings {
    min_password_length: usize,
    require_uppercase: bool,
    require_lowercase: bool,
    require_digit: bool,
    require_special: bool,
    max_login_attempts: u32,
    lockout_duration: Duration,
    session_ttl: Duration,
}

impl SecuritySettings {
    #[must_use]
    pub fn new() -> Self {
        Self {
            min_password_length: DEFAULT_MIN_PASSWORD_LENGTH,
            require_uppercase: true,
            require_lowercase: true,
            require_digit: true,
            require_special: true,
            max_login_attempts: DEFAULT_MAX_LOGIN_ATTEMPTS,
            lockout_duration: Duration::minutes(DEFAULT_LOCKOUT_MINUTES),
            session_ttl: Duration::hours(DEFAULT_SESSION_HOURS),
        }
    }

    /// Parse a settings map as stored in the `security_settings` table.
    /// Key names follow the seeded table layout.
    #[must_use]
    pub fn from_map(map: &HashMap<String, String>) -> Self {
        let defaults = Self::new();
        Self {
            min_password_length: parse_number(map, "PASSWORD_MIN_LENGTH")
                .unwrap_or(defaults.min_password_length),
            require_uppercase: parse_flag(map, "PASSWORD_REQUIRE_UPPERCASE")
                .unwrap_or(defaults.require_uppercase),
            require_lowercase: parse_flag(map, "PASSWORD_REQUIRE_LOWERCASE")
                .unwrap_or(defaults.require_lowercase),
            require_digit: parse_flag(map, "PASSWORD_REQUIRE_NUMBERS")
                .unwrap_or(defaults.require_digit),
            require_special: parse_flag(map, "PASSWORD_REQUIRE_SPECIAL")
                .unwrap_or(defaults.require_special),
            max_login_attempts: parse_number(map, "MAX_LOGIN_ATTEMPTS")
                .unwrap_or(defaults.max_login_attempts),
            lockout_duration: parse_number(map, "LOCKOUT_DURATION_MINUTES")
                .map_or(defaults.lockout_duration, Duration::minutes),
            session_ttl: parse_number(map, "SESSION_TIMEOUT_HOURS")
                .map_or(defaults.session_ttl, Duration::hours),
        }
    }

    #[must_use]
    pub fn with_min_password_length(mut self, length: usize) -> Self {
        self.min_password_length = length;
        self
    }

    #[must_use]
    pub fn with_require_uppercase(mut self, required: bool) -> Self {
        self.require_uppercase = required;
        self
    }

    #[must_use]
    pub fn with_require_lowercase(mut self, required: bool) -> Self {
        self.require_lowercase = required;
        self
    }

    #[must_use]
    pub fn with_require_digit(mut self, required: bool) -> Self {
        self.require_digit = required;
        self
    }

    #[must_use]
    pub fn with_require_special(mut self, required: bool) -> Self {
        self.require_special = required;
        self
    }

    #[must_use]
    pub fn with_max_login_attempts(mut self, attempts: u32) -> Self {
        self.max_login_attempts = attempts;
        self
    }

    #[must_use]
    pub fn with_lockout_duration(mut self, duration: Duration) -> Self {
        self.lockout_duration = duration;
        self
    }

    #[must_use]
    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    #[must_use]
    pub fn min_password_length(&self) -> usize {
        self.min_password_length
    }

    #[must_use]
    pub fn max_login_attempts(&self) -> u32 {
        self.max_login_attempts
    }

    #[must_use]
    pub fn lockout_duration(&self) -> Duration {
        self.lockout_duration
    }

    #[must_use]
    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
    }

    pub(crate) fn require_uppercase(&self) -> bool {
        self.require_uppercase
    }

    pub(crate) fn require_lowercase(&self) -> bool {
        self.require_lowercase
    }

    pub(crate) fn require_digit(&self) -> bool {
        self.require_digit
    }

    pub(crate) fn require_special(&self) -> bool {
        self.require_special
    }
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_flag(map: &HashMap<String, String>, key: &str) -> Option<bool> {
    map.get(key).map(|value| value == "true")
}

fn parse_number<T: std::str::FromStr>(map: &HashMap<String, String>, key: &str) -> Option<T> {
    map.get(key).and_then(|value| value.trim().parse().ok())
}

/// Check a candidate password against the policy, accumulating every
/// violation instead of stopping at the first.
#[must_use]
pub fn validate_password(password: &str, settings: &SecuritySettings) -> Vec<String> {
    let mut errors = Vec::new();

    if password.chars().count() < settings.min_password_length() {
        errors.push(format!(
            "password must be at least {} characters long",
            settings.min_password_length()
        ));
    }
    if settings.require_uppercase() && !password.chars().any(|c| c.is_ascii_uppercase()) {
        errors.push("password must contain at least one uppercase letter".to_string());
    }
    if settings.require_lowercase() && !password.chars().any(|c| c.is_ascii_lowercase()) {
        errors.push("password must contain at least one lowercase letter".to_string());
    }
    if settings.require_digit() && !password.chars().any(|c| c.is_ascii_digit()) {
        errors.push("password must contain at least one digit".to_string());
    }
    if settings.require_special() && !password.chars().any(|c| SPECIAL_CHARACTERS.contains(c)) {
        errors.push("password must contain at least one special character".to_string());
    }

    errors
}

/// Normalize an email for lookup/uniqueness checks.
pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
pub(crate) fn valid_email(email_normalized: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email_normalized))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_for_empty_map() {
        let settings = SecuritySettings::from_map(&HashMap::new());
        assert_eq!(settings.min_password_length(), 8);
        assert_eq!(settings.max_login_attempts(), 5);
        assert_eq!(settings.lockout_duration(), Duration::minutes(30));
        assert_eq!(settings.session_ttl(), Duration::hours(24));
        assert!(settings.require_uppercase());
    }

    #[test]
    fn map_values_override_defaults() {
        let map: HashMap<String, String> = [
            ("PASSWORD_MIN_LENGTH", "12"),
            ("PASSWORD_REQUIRE_SPECIAL", "false"),
            ("MAX_LOGIN_ATTEMPTS", "3"),
            ("LOCKOUT_DURATION_MINUTES", "5"),
            ("SESSION_TIMEOUT_HOURS", "2"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let settings = SecuritySettings::from_map(&map);
        assert_eq!(settings.min_password_length(), 12);
        assert!(!settings.require_special());
        assert_eq!(settings.max_login_attempts(), 3);
        assert_eq!(settings.lockout_duration(), Duration::minutes(5));
        assert_eq!(settings.session_ttl(), Duration::hours(2));
    }

    #[test]
    fn unparseable_values_fall_back_to_defaults() {
        let map: HashMap<String, String> =
            [("PASSWORD_MIN_LENGTH".to_string(), "often".to_string())]
                .into_iter()
                .collect();
        let settings = SecuritySettings::from_map(&map);
        assert_eq!(settings.min_password_length(), 8);
    }

    #[test]
    fn valid_password_passes_all_checks() {
        let settings = SecuritySettings::new();
        assert!(validate_password("Str0ng!Pass", &settings).is_empty());
    }

    #[test]
    fn violations_accumulate() {
        let settings = SecuritySettings::new();
        let errors = validate_password("abc", &settings);
        // Short, no uppercase, no digit, no special: four violations at once.
        assert_eq!(errors.len(), 4);
        assert!(errors[0].contains("at least 8 characters"));
    }

    #[test]
    fn disabled_checks_do_not_fire() {
        let settings = SecuritySettings::new()
            .with_require_uppercase(false)
            .with_require_digit(false)
            .with_require_special(false)
            .with_min_password_length(4);
        assert!(validate_password("abcd", &settings).is_empty());
    }

    #[test]
    fn special_character_set_matches_policy() {
        let settings = SecuritySettings::new()
            .with_min_password_length(1)
            .with_require_uppercase(false)
            .with_require_lowercase(false)
            .with_require_digit(false);
        for c in SPECIAL_CHARACTERS.chars() {
            assert!(
                validate_password(&c.to_string(), &settings).is_empty(),
                "{c} should satisfy the special-character check"
            );
        }
        assert_eq!(
            validate_password("aA1", &settings),
            vec!["password must contain at least one special character".to_string()]
        );
    }

    #[test]
    fn normalize_email_trims_and_lowercases() {
        assert_eq!(normalize_email(" Alice@Example.COM "), "alice@example.com");
    }

    #[test]
    fn valid_email_rejects_missing_parts() {
        assert!(valid_email("a@example.com"));
        assert!(!valid_email("not-an-email"));
        assert!(!valid_email("missing-domain@"));
    }
}
