use crate::common::config::PolicyConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Distance under the strict threshold.
    AcceptStrict,
    /// Capability verified the pair and distance is under the relaxed threshold.
    AcceptVerified,
    Reject,
}

impl Decision {
    pub fn is_accept(&self) -> bool {
        !matches!(self, Decision::Reject)
    }
}

/// Dual-threshold acceptance rule applied to the best candidate of a scan.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchPolicy {
    pub strict_threshold: f32,
    pub relaxed_threshold: f32,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self::from_config(&PolicyConfig::default())
    }
}

impl MatchPolicy {
    pub fn from_config(config: &PolicyConfig) -> Self {
        Self {
            strict_threshold: config.strict_threshold,
            relaxed_threshold: config.relaxed_threshold,
        }
    }

    pub fn decide(&self, distance: f32, verified: bool) -> Decision {
        if distance < self.strict_threshold {
            Decision::AcceptStrict
        } else if verified && distance < self.relaxed_threshold {
            Decision::AcceptVerified
        } else {
            Decision::Reject
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_threshold_accepts_without_verification() {
        let policy = MatchPolicy::default();
        assert_eq!(policy.decide(0.0, false), Decision::AcceptStrict);
        assert_eq!(policy.decide(0.139, false), Decision::AcceptStrict);
    }

    #[test]
    fn relaxed_band_requires_verified_flag() {
        let policy = MatchPolicy::default();
        assert_eq!(policy.decide(0.15, true), Decision::AcceptVerified);
        assert_eq!(policy.decide(0.15, false), Decision::Reject);
    }

    #[test]
    fn thresholds_are_exclusive() {
        let policy = MatchPolicy::default();
        assert_eq!(policy.decide(0.14, false), Decision::Reject);
        assert_eq!(policy.decide(0.18, true), Decision::Reject);
    }
}
