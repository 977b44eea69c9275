//! Victim selection of the spill

use std::fmt::Debug;

use crate::common::config::VictimPolicyKind;
use crate::common::types::PartitionId;

/// Resident partition that can be spilled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionCandidate {
    /// Partition id
    pub partition: PartitionId,
    /// Number of accumulated records since the last spill round
    pub hits: u64,
    /// Bytes of the resident buffers of the partition
    pub footprint: usize,
}

/// Rank the candidates, the first one is spilled first
pub trait VictimPolicy: Debug + Send + Sync {
    /// Name of the policy
    fn name(&self) -> &'static str;

    /// Sort the candidates in place
    fn rank(&self, candidates: &mut [PartitionCandidate]);
}

/// Spill the partition that is accumulated least. Ties are broken by the partition id
#[derive(Debug, Default, Clone, Copy)]
pub struct FewestHits;

impl VictimPolicy for FewestHits {
    fn name(&self) -> &'static str {
        "FewestHits"
    }

    fn rank(&self, candidates: &mut [PartitionCandidate]) {
        candidates.sort_unstable_by_key(|c| (c.hits, c.partition));
    }
}

/// Spill the partition that occupies the most memory. Ties are broken by the partition id
#[derive(Debug, Default, Clone, Copy)]
pub struct LargestFootprint;

impl VictimPolicy for LargestFootprint {
    fn name(&self) -> &'static str {
        "LargestFootprint"
    }

    fn rank(&self, candidates: &mut [PartitionCandidate]) {
        candidates.sort_unstable_by_key(|c| (std::cmp::Reverse(c.footprint), c.partition));
    }
}

/// Create the policy
pub fn victim_policy(kind: VictimPolicyKind) -> Box<dyn VictimPolicy> {
    match kind {
        VictimPolicyKind::FewestHits => Box::new(FewestHits),
        VictimPolicyKind::LargestFootprint => Box::new(LargestFootprint),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidates() -> Vec<PartitionCandidate> {
        [(7, 10, 256), (2, 3, 512), (4, 3, 128), (9, 0, 512)]
            .into_iter()
            .map(|(partition, hits, footprint)| PartitionCandidate {
                partition,
                hits,
                footprint,
            })
            .collect()
    }

    fn order(kind: VictimPolicyKind) -> Vec<PartitionId> {
        let mut candidates = candidates();
        victim_policy(kind).rank(&mut candidates);
        candidates.iter().map(|c| c.partition).collect()
    }

    #[test]
    fn test_fewest_hits() {
        assert_eq!(order(VictimPolicyKind::FewestHits), [9, 2, 4, 7]);
    }

    #[test]
    fn test_largest_footprint() {
        assert_eq!(order(VictimPolicyKind::LargestFootprint), [2, 9, 7, 4]);
    }
}
