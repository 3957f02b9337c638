use crate::common::config::PolicyConfig;
use crate::common::{BallotError, Result};
use crate::core::capability::{CompareOptions, Comparison, FaceCapability};
use crate::core::policy::{Decision, MatchPolicy};
use crate::storage::Identity;
use image::DynamicImage;

/// Why an identity was left out of a scan.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    UndecodableImage(String),
    ComparisonFailed(String),
    InvalidDistance(f32),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedIdentity {
    pub key: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BestMatch<'i> {
    pub identity: &'i Identity,
    pub distance: f32,
    pub verified: bool,
}

/// Outcome of one identification call; borrows from the scanned identities.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult<'i> {
    /// Closest identity that could be compared, accepted or not.
    pub best: Option<BestMatch<'i>>,
    pub decision: Decision,
    pub comparisons: usize,
    pub skipped: Vec<SkippedIdentity>,
}

impl<'i> MatchResult<'i> {
    fn empty() -> Self {
        Self { best: None, decision: Decision::Reject, comparisons: 0, skipped: Vec::new() }
    }

    /// The matched identity when the policy accepted the best candidate.
    pub fn accepted(&self) -> Option<&'i Identity> {
        match self.best {
            Some(best) if self.decision.is_accept() => Some(best.identity),
            _ => None,
        }
    }
}

enum ScanOutcome {
    Compared(Comparison),
    Skipped(SkipReason),
}

/// Linear one-to-many comparator. Holds no state between calls.
pub struct IdentificationEngine<'a, C: FaceCapability + ?Sized> {
    capability: &'a C,
    policy: MatchPolicy,
    options: CompareOptions,
    workers: usize,
}

impl<'a, C: FaceCapability + ?Sized> IdentificationEngine<'a, C> {
    /// Fails with `CapabilityUnavailable` when the capability does not run `expected_model`.
    pub fn new(capability: &'a C, policy: &PolicyConfig, expected_model: &str) -> Result<Self> {
        if capability.model_name() != expected_model {
            return Err(BallotError::CapabilityUnavailable(format!(
                "capability runs model {}, expected {}",
                capability.model_name(),
                expected_model
            )));
        }

        Ok(Self {
            capability,
            policy: MatchPolicy::from_config(policy),
            options: CompareOptions { metric: policy.metric, enforce_detection: false },
            workers: policy.scan_workers.max(1),
        })
    }

    pub fn policy(&self) -> &MatchPolicy {
        &self.policy
    }

    /// Scans every identity in order. The probe must already have passed the presence gate.
    pub fn identify<'i>(&self, probe: &DynamicImage, identities: &'i [Identity]) -> MatchResult<'i> {
        if identities.is_empty() {
            tracing::info!("No enrolled identities; skipping scan");
            return MatchResult::empty();
        }

        let outcomes = identities.iter().map(|identity| self.compare_one(probe, identity));
        self.select(identities, outcomes)
    }

    fn compare_one(&self, probe: &DynamicImage, identity: &Identity) -> ScanOutcome {
        // The decoded reference lives only for this comparison.
        let reference = match image::load_from_memory(&identity.face_image) {
            Ok(img) => img,
            Err(e) => return ScanOutcome::Skipped(SkipReason::UndecodableImage(e.to_string())),
        };

        match self.capability.compare(probe, &reference, &self.options) {
            Ok(cmp) if cmp.distance.is_finite() => ScanOutcome::Compared(cmp),
            Ok(cmp) => ScanOutcome::Skipped(SkipReason::InvalidDistance(cmp.distance)),
            Err(e) => ScanOutcome::Skipped(SkipReason::ComparisonFailed(e.to_string())),
        }
    }

    /// Picks the strictly smallest distance; ties keep the earlier identity.
    fn select<'i>(
        &self,
        identities: &'i [Identity],
        outcomes: impl Iterator<Item = ScanOutcome>,
    ) -> MatchResult<'i> {
        let mut result = MatchResult::empty();

        for (identity, outcome) in identities.iter().zip(outcomes) {
            match outcome {
                ScanOutcome::Compared(cmp) => {
                    result.comparisons += 1;
                    tracing::debug!(
                        "Compared with {}: distance={:.4}, threshold={:.4}, verified={}",
                        identity.key,
                        cmp.distance,
                        cmp.threshold,
                        cmp.verified
                    );
                    let closer = result.best.map_or(true, |best| cmp.distance < best.distance);
                    if closer {
                        result.best = Some(BestMatch {
                            identity,
                            distance: cmp.distance,
                            verified: cmp.verified,
                        });
                    }
                }
                ScanOutcome::Skipped(reason) => {
                    tracing::warn!("Skipping identity {}: {:?}", identity.key, reason);
                    result.skipped.push(SkippedIdentity { key: identity.key.clone(), reason });
                }
            }
        }

        match result.best {
            Some(best) => {
                result.decision = self.policy.decide(best.distance, best.verified);
                tracing::info!(
                    "{}: best was {} with distance {:.4} (strict={}, relaxed_verified={}, verified={})",
                    if result.decision.is_accept() { "MATCH FOUND" } else { "NO MATCH" },
                    best.identity.key,
                    best.distance,
                    self.policy.strict_threshold,
                    self.policy.relaxed_threshold,
                    best.verified
                );
            }
            None => tracing::info!("NO MATCH: no identity could be compared"),
        }

        result
    }
}

impl<'a, C: FaceCapability + Sync + ?Sized> IdentificationEngine<'a, C> {
    /// Same result as [`IdentificationEngine::identify`], with comparisons
    /// spread over the configured number of scoped worker threads. Each
    /// worker owns a contiguous slice, so concatenating their outputs keeps
    /// enumeration order for the tie-break.
    pub fn identify_parallel<'i>(&self, probe: &DynamicImage, identities: &'i [Identity]) -> MatchResult<'i> {
        if self.workers <= 1 || identities.len() <= 1 {
            return self.identify(probe, identities);
        }

        let chunk_size = identities.len().div_ceil(self.workers);
        let outcomes: Vec<ScanOutcome> = std::thread::scope(|scope| {
            let handles: Vec<_> = identities
                .chunks(chunk_size)
                .map(|chunk| {
                    scope.spawn(move || {
                        chunk
                            .iter()
                            .map(|identity| self.compare_one(probe, identity))
                            .collect::<Vec<_>>()
                    })
                })
                .collect();

            handles
                .into_iter()
                .flat_map(|handle| match handle.join() {
                    Ok(outcomes) => outcomes,
                    Err(_) => Vec::new(),
                })
                .collect()
        });

        if outcomes.len() != identities.len() {
            // A worker panicked; fall back to the sequential scan.
            tracing::warn!("Parallel scan lost results; rescanning sequentially");
            return self.identify(probe, identities);
        }

        self.select(identities, outcomes.into_iter())
    }
}
