use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Why an attempt was rejected before credential verification.
///
/// These are ordinary outcomes, not errors. Login handlers should map every
/// variant to the same user-facing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DenyReason {
    /// The source address exceeded the address threshold.
    AddressBlocked,
    /// The account is suspended for `remaining` more time.
    AccountLocked {
        #[serde(rename = "remaining_ms", with = "millis")]
        remaining: Duration,
    },
}

mod millis {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(duration.num_milliseconds())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let ms = i64::deserialize(deserializer)?;
        Duration::try_milliseconds(ms).ok_or_else(|| D::Error::custom("duration out of range"))
    }
}

impl DenyReason {
    /// Whole seconds until the account lock lifts, rounded up.
    ///
    /// `None` for address blocks, which have no scheduled end by default.
    pub fn retry_after_seconds(&self) -> Option<u64> {
        match self {
            DenyReason::AddressBlocked => None,
            DenyReason::AccountLocked { remaining } => {
                let whole = remaining.num_seconds();
                let rounded = if *remaining > Duration::seconds(whole) {
                    whole + 1
                } else {
                    whole
                };
                Some(rounded.max(1) as u64)
            }
        }
    }
}

/// Result of [`ProtectionGuard::check_allowed`](crate::services::ProtectionGuard::check_allowed).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Denied(DenyReason),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }

    pub fn reason(&self) -> Option<DenyReason> {
        match self {
            Decision::Allowed => None,
            Decision::Denied(reason) => Some(*reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_after_rounds_up() {
        let reason = DenyReason::AccountLocked {
            remaining: Duration::milliseconds(899_001),
        };
        assert_eq!(reason.retry_after_seconds(), Some(900));

        let exact = DenyReason::AccountLocked {
            remaining: Duration::seconds(900),
        };
        assert_eq!(exact.retry_after_seconds(), Some(900));

        let tiny = DenyReason::AccountLocked {
            remaining: Duration::milliseconds(1),
        };
        assert_eq!(tiny.retry_after_seconds(), Some(1));
    }

    #[test]
    fn test_address_block_has_no_retry_after() {
        assert_eq!(DenyReason::AddressBlocked.retry_after_seconds(), None);
    }

    #[test]
    fn test_decision_accessors() {
        assert!(Decision::Allowed.is_allowed());
        assert_eq!(Decision::Allowed.reason(), None);

        let denied = Decision::Denied(DenyReason::AddressBlocked);
        assert!(!denied.is_allowed());
        assert_eq!(denied.reason(), Some(DenyReason::AddressBlocked));
    }

    #[test]
    fn test_deny_reason_serialization() {
        let locked = DenyReason::AccountLocked {
            remaining: Duration::seconds(90),
        };
        let json = serde_json::to_value(locked).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "reason": "account_locked", "remaining_ms": 90_000 })
        );
        assert_eq!(serde_json::from_value::<DenyReason>(json).unwrap(), locked);

        assert_eq!(
            serde_json::to_value(DenyReason::AddressBlocked).unwrap(),
            serde_json::json!({ "reason": "address_blocked" })
        );
    }
}
