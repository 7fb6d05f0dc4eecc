use crate::config::GrantsConfig;
use crate::errors::AccessError;

pub const DEFAULT_EXPIRY_DAYS: u32 = 7;
pub const DEFAULT_MAX_EXPIRY_DAYS: u32 = 365;
pub const DEFAULT_MAX_DOWNLOADS_PER_DOCUMENT: u32 = 3;
/// Upper bound a deployment may configure for `max_expiry_days` (ten years).
pub const MAX_EXPIRY_DAYS_CEILING: u32 = 3650;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GrantPolicy {
    pub default_expiry_days: u32,
    pub max_expiry_days: u32,
    pub max_downloads_per_document: u32,
    /// Return an existing pending or active request instead of opening a second one.
    pub reuse_open_requests: bool,
}

impl Default for GrantPolicy {
    fn default() -> Self {
        Self {
            default_expiry_days: DEFAULT_EXPIRY_DAYS,
            max_expiry_days: DEFAULT_MAX_EXPIRY_DAYS,
            max_downloads_per_document: DEFAULT_MAX_DOWNLOADS_PER_DOCUMENT,
            reuse_open_requests: true,
        }
    }
}

impl From<&GrantsConfig> for GrantPolicy {
    fn from(config: &GrantsConfig) -> Self {
        Self {
            default_expiry_days: config.default_expiry_days,
            max_expiry_days: config.max_expiry_days,
            max_downloads_per_document: config.max_downloads_per_document,
            reuse_open_requests: config.reuse_open_requests,
        }
    }
}

impl GrantPolicy {
    pub fn resolve_expiry_days(&self, requested: Option<u32>) -> Result<u32, AccessError> {
        let days = requested.unwrap_or(self.default_expiry_days);
        if days == 0 || days > self.max_expiry_days {
            return Err(AccessError::Validation(format!(
                "expiry_days must be in range 1..={}",
                self.max_expiry_days
            )));
        }
        Ok(days)
    }
}

#[cfg(test)]
mod tests {
    use super::GrantPolicy;
    use crate::errors::AccessError;

    #[test]
    fn missing_expiry_falls_back_to_seven_days() {
        assert_eq!(GrantPolicy::default().resolve_expiry_days(None), Ok(7));
    }

    #[test]
    fn zero_and_oversized_expiry_are_rejected() {
        let policy = GrantPolicy::default();
        assert!(matches!(policy.resolve_expiry_days(Some(0)), Err(AccessError::Validation(_))));
        assert!(matches!(policy.resolve_expiry_days(Some(366)), Err(AccessError::Validation(_))));
        assert_eq!(policy.resolve_expiry_days(Some(30)), Ok(30));
    }
}
