//! Password Rules
//!
//! Pure evaluation of a candidate password against a [`PasswordPolicy`].
//! Every violated rule yields its own feedback line; evaluation never stops
//! at the first failure.

use serde::Serialize;

use crate::domain::entity::password_policy::PasswordPolicy;
use crate::domain::value_object::email::Email;

/// Identity fragments shorter than this are not checked
const MIN_IDENTITY_TOKEN: usize = 3;

/// Score ceiling for common or identity-bearing passwords
const PENALTY_CAP: u8 = 20;

const KEYBOARD_PATTERNS: &[&str] = &[
    "qwerty",
    "qwertyuiop",
    "asdfgh",
    "asdfghjkl",
    "zxcvbn",
    "qazwsx",
    "1qaz2wsx",
];

const COMMON_PASSWORDS: &[&str] = &[
    "password",
    "password1",
    "password123",
    "passw0rd",
    "12345678",
    "123456789",
    "1234567890",
    "abcdefgh",
    "letmein",
    "welcome",
    "admin",
    "admin123",
    "administrator",
    "changeme",
    "iloveyou",
    "sunshine",
    "princess",
    "football",
    "monkey",
    "shadow",
    "master",
    "dragon",
    "baseball",
    "michael",
    "trustno1",
    "superman",
    "secret",
    "login",
];

/// Name and email of the principal whose password is evaluated
#[derive(Debug, Clone, Default)]
pub struct IdentityHints {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<Email>,
}

impl IdentityHints {
    pub fn new(first_name: Option<String>, last_name: Option<String>, email: Option<Email>) -> Self {
        Self {
            first_name,
            last_name,
            email,
        }
    }

    /// Lower-cased tokens of at least three characters
    pub fn tokens(&self) -> Vec<String> {
        let names = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .flat_map(|n| n.split_whitespace());
        let email = self.email.iter().flat_map(|e| e.local_tokens());

        names
            .chain(email)
            .map(str::to_lowercase)
            .filter(|t| t.chars().count() >= MIN_IDENTITY_TOKEN)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StrengthLabel {
    Weak,
    Fair,
    Good,
    Strong,
}

impl StrengthLabel {
    pub fn from_score(score: u8) -> Self {
        match score {
            0..40 => Self::Weak,
            40..60 => Self::Fair,
            60..80 => Self::Good,
            _ => Self::Strong,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyEvaluation {
    pub is_valid: bool,
    pub feedback: Vec<String>,
    /// 0..=100
    pub strength: u8,
    pub label: StrengthLabel,
}

/// Evaluate every rule of `policy` against `password`
pub fn evaluate(policy: &PasswordPolicy, password: &str, hints: &IdentityHints) -> PolicyEvaluation {
    let mut feedback = Vec::new();
    let length = password.chars().count();

    if length < policy.min_length as usize {
        feedback.push(format!(
            "Password must be at least {} characters",
            policy.min_length
        ));
    }
    if length > policy.max_length as usize {
        feedback.push(format!(
            "Password must be at most {} characters",
            policy.max_length
        ));
    }

    let has_upper = password.chars().any(char::is_uppercase);
    let has_lower = password.chars().any(char::is_lowercase);
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    let has_special = password.chars().any(|c| policy.special_chars.contains(c));

    if policy.require_uppercase && !has_upper {
        feedback.push("Password must contain at least one uppercase letter".to_string());
    }
    if policy.require_lowercase && !has_lower {
        feedback.push("Password must contain at least one lowercase letter".to_string());
    }
    if policy.require_numbers && !has_digit {
        feedback.push("Password must contain at least one number".to_string());
    }
    if policy.require_special && !has_special {
        feedback.push(format!(
            "Password must contain at least one special character ({})",
            policy.special_chars
        ));
    }

    let common = is_common(password);
    if policy.prevent_common_passwords && common {
        feedback.push("Password is too common or follows a predictable pattern".to_string());
    }

    let contains_identity = contains_identity(password, hints);
    if policy.prevent_identity_in_password && contains_identity {
        feedback.push("Password must not contain your name or email".to_string());
    }

    let strength = strength_score(password, common || contains_identity);

    PolicyEvaluation {
        is_valid: feedback.is_empty(),
        feedback,
        strength,
        label: StrengthLabel::from_score(strength),
    }
}

/// Additive score: length up to 20 chars, 15 per character class
pub fn strength_score(password: &str, penalised: bool) -> u8 {
    let length = password.chars().count().min(20) as u32;
    let classes = [
        password.chars().any(char::is_uppercase),
        password.chars().any(char::is_lowercase),
        password.chars().any(|c| c.is_ascii_digit()),
        password.chars().any(|c| !c.is_alphanumeric()),
    ]
    .into_iter()
    .filter(|present| *present)
    .count() as u32;

    let score = (length * 2 + classes * 15).min(100) as u8;
    if penalised { score.min(PENALTY_CAP) } else { score }
}

fn contains_identity(password: &str, hints: &IdentityHints) -> bool {
    let lower = password.to_lowercase();
    hints.tokens().iter().any(|t| lower.contains(t.as_str()))
}

/// Denylist, keyboard walks, single repeated character, digit runs.
/// Trailing digits and symbols are stripped before the denylist lookup so
/// `Password123!` is caught as `password`.
pub fn is_common(password: &str) -> bool {
    let lower = password.to_lowercase();

    let chars: Vec<char> = lower.chars().collect();
    if chars.len() >= 3 && chars.iter().all(|&c| c == chars[0]) {
        return true;
    }

    if lower.chars().all(|c| c.is_ascii_digit()) && is_sequential_numbers(&lower) {
        return true;
    }

    if KEYBOARD_PATTERNS.iter().any(|p| lower.contains(p)) {
        return true;
    }

    let stem = lower.trim_end_matches(|c: char| !c.is_alphabetic());
    COMMON_PASSWORDS.contains(&lower.as_str()) || COMMON_PASSWORDS.contains(&stem)
}

fn is_sequential_numbers(s: &str) -> bool {
    let digits: Vec<u32> = s.chars().filter_map(|c| c.to_digit(10)).collect();

    if digits.len() < 4 {
        return false;
    }

    let ascending = digits
        .windows(2)
        .all(|w| w[1] == w[0] + 1 || (w[0] == 9 && w[1] == 0));
    let descending = digits
        .windows(2)
        .all(|w| w[0] == w[1] + 1 || (w[0] == 0 && w[1] == 9));

    ascending || descending
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_object::principal_kind::PrincipalKind;

    fn policy() -> PasswordPolicy {
        PasswordPolicy::safe_default(PrincipalKind::Client)
    }

    fn jane() -> IdentityHints {
        IdentityHints::new(
            Some("Jane".into()),
            Some("Doe".into()),
            Some(Email::new("jane.doe@example.com").unwrap()),
        )
    }

    #[test]
    fn test_valid_password() {
        let result = evaluate(&policy(), "Tr0ub4dor&Zebra", &jane());
        assert!(result.is_valid, "{:?}", result.feedback);
        assert!(result.feedback.is_empty());
        assert!(result.strength >= 80);
        assert_eq!(result.label, StrengthLabel::Strong);
    }

    #[test]
    fn test_every_violation_is_reported() {
        let result = evaluate(&policy(), "abc", &IdentityHints::default());
        assert!(!result.is_valid);
        // too short, no upper, no number, no special
        assert_eq!(result.feedback.len(), 4, "{:?}", result.feedback);
    }

    #[test]
    fn test_identity_overlap() {
        let result = evaluate(&policy(), "Zebra-Jane-2024", &jane());
        assert!(!result.is_valid);
        assert!(result.feedback.iter().any(|f| f.contains("name or email")));
        assert!(result.strength <= 20);
    }

    #[test]
    fn test_short_identity_tokens_ignored() {
        let hints = IdentityHints::new(Some("Al".into()), None, None);
        assert!(hints.tokens().is_empty());
        assert!(evaluate(&policy(), "Alpine#Route99", &hints).is_valid);
    }

    #[test]
    fn test_common_passwords() {
        assert!(is_common("password"));
        assert!(is_common("Password123!"));
        assert!(is_common("aaaaaaaa"));
        assert!(is_common("87654321"));
        assert!(is_common("myqwertykeys"));
        assert!(!is_common("Tr0ub4dor&Zebra"));
        assert!(!is_common("Route-1234-Alpine"));
    }

    #[test]
    fn test_common_rule_can_be_disabled() {
        let mut p = policy();
        p.prevent_common_passwords = false;
        let result = evaluate(&p, "Password123!", &IdentityHints::default());
        assert!(result.is_valid);
        assert!(result.strength <= 20);
    }

    #[test]
    fn test_strength_is_additive() {
        assert!(strength_score("abcdefgh", false) < strength_score("abcdefgH", false));
        assert!(strength_score("abcdefgH", false) < strength_score("abcdefgH1", false));
        assert_eq!(strength_score("Aa1!Aa1!Aa1!Aa1!Aa1!Aa1!", false), 100);
    }

    #[test]
    fn test_labels() {
        assert_eq!(StrengthLabel::from_score(0), StrengthLabel::Weak);
        assert_eq!(StrengthLabel::from_score(40), StrengthLabel::Fair);
        assert_eq!(StrengthLabel::from_score(79), StrengthLabel::Good);
        assert_eq!(StrengthLabel::from_score(80), StrengthLabel::Strong);
    }
}
