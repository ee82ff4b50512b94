//! Hard and soft sparing rules

use crate::domain::{
    BlockSize, DriveLocation, DriveType, Lba, LifecycleState, ObjectId, PathState,
    PerformanceTier, PoolId,
};
use serde::{Deserialize, Serialize};
use std::cmp::{Ordering, Reverse};
use thiserror::Error;

/// Drive attributes the sparing rules look at
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpareSelectionInfo {
    pub object_id: ObjectId,
    pub location: DriveLocation,
    pub drive_type: DriveType,
    pub block_size: BlockSize,
    pub capacity: Lba,
    pub exported_offset: Lba,
    pub lifecycle: LifecycleState,
    pub path_state: PathState,
    pub pool_id: PoolId,
    pub is_system_drive: bool,
    pub end_of_life: bool,
    pub slf: bool,
}

impl SpareSelectionInfo {
    fn is_healthy(&self) -> bool {
        matches!(self.lifecycle, LifecycleState::Ready | LifecycleState::Hibernate)
            && matches!(self.path_state, PathState::Enabled | PathState::Slumber)
            && !self.end_of_life
            && !self.slf
    }

    pub fn performance_tier(&self) -> PerformanceTier {
        self.drive_type.performance_tier()
    }
}

/// First hard rule a candidate broke
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HardRuleViolation {
    #[error("candidate {object_id} is not healthy")]
    Unhealthy { object_id: ObjectId },

    #[error("candidate offset {candidate:#x} exceeds original offset {original:#x}")]
    OffsetTooLarge { candidate: Lba, original: Lba },

    #[error("candidate is reserved by pool {0}")]
    Reserved(PoolId),

    #[error("performance tier {candidate:?} does not match {desired:?}")]
    TierMismatch {
        desired: PerformanceTier,
        candidate: PerformanceTier,
    },

    #[error("candidate capacity {available:#x} is below required {required:#x}")]
    InsufficientCapacity { required: Lba, available: Lba },
}

/// Check a candidate against the hard rules, in order
pub fn check_hard_rules(
    desired: &SpareSelectionInfo,
    candidate: &SpareSelectionInfo,
    required_capacity: Lba,
) -> Result<(), HardRuleViolation> {
    // a drive replacing itself is judged on the new media, not its old state
    if candidate.object_id != desired.object_id && !candidate.is_healthy() {
        return Err(HardRuleViolation::Unhealthy {
            object_id: candidate.object_id,
        });
    }

    if candidate.exported_offset > desired.exported_offset {
        return Err(HardRuleViolation::OffsetTooLarge {
            candidate: candidate.exported_offset,
            original: desired.exported_offset,
        });
    }

    if candidate.pool_id.is_valid() {
        return Err(HardRuleViolation::Reserved(candidate.pool_id));
    }

    if candidate.performance_tier() != desired.performance_tier() {
        return Err(HardRuleViolation::TierMismatch {
            desired: desired.performance_tier(),
            candidate: candidate.performance_tier(),
        });
    }

    if candidate.capacity < required_capacity {
        return Err(HardRuleViolation::InsufficientCapacity {
            required: required_capacity,
            available: candidate.capacity,
        });
    }

    Ok(())
}

/// Soft-rule ranking; fields in priority order, larger is better
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SpareRank {
    block_size_match: bool,
    drive_type_match: bool,
    offset_match: bool,
    port_match: bool,
    best_fit: Reverse<Lba>,
    enclosure_match: bool,
}

pub fn rank(
    desired: &SpareSelectionInfo,
    candidate: &SpareSelectionInfo,
    required_capacity: Lba,
) -> SpareRank {
    SpareRank {
        block_size_match: candidate.block_size == desired.block_size,
        drive_type_match: candidate.drive_type == desired.drive_type,
        offset_match: candidate.exported_offset == desired.exported_offset,
        port_match: candidate.location.port == desired.location.port,
        best_fit: Reverse(candidate.capacity.saturating_sub(required_capacity)),
        enclosure_match: candidate.location.port == desired.location.port
            && candidate.location.enclosure == desired.location.enclosure,
    }
}

/// Best candidate passing every hard rule; ties go to the earlier candidate
pub fn find_best_spare<'a>(
    desired: &SpareSelectionInfo,
    required_capacity: Lba,
    candidates: &'a [SpareSelectionInfo],
) -> Option<&'a SpareSelectionInfo> {
    let mut best: Option<(SpareRank, &SpareSelectionInfo)> = None;
    for candidate in candidates {
        if check_hard_rules(desired, candidate, required_capacity).is_err() {
            continue;
        }
        let candidate_rank = rank(desired, candidate, required_capacity);
        let better = match &best {
            Some((best_rank, _)) => candidate_rank.cmp(best_rank) == Ordering::Greater,
            None => true,
        };
        if better {
            best = Some((candidate_rank, candidate));
        }
    }
    best.map(|(_, candidate)| candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drive(id: u32, slot: u32) -> SpareSelectionInfo {
        SpareSelectionInfo {
            object_id: ObjectId(id),
            location: DriveLocation::new(0, 1, slot),
            drive_type: DriveType::Sas,
            block_size: BlockSize::Bytes520,
            capacity: 0x1000_0000,
            exported_offset: 0x10000,
            lifecycle: LifecycleState::Ready,
            path_state: PathState::Enabled,
            pool_id: PoolId::INVALID,
            is_system_drive: false,
            end_of_life: false,
            slf: false,
        }
    }

    #[test]
    fn test_health_rule_skipped_for_same_object() {
        let desired = drive(0x100, 0);
        let mut failed = desired.clone();
        failed.lifecycle = LifecycleState::Fail;

        assert!(check_hard_rules(&desired, &failed, 0x1000).is_ok());

        failed.object_id = ObjectId(0x101);
        assert_eq!(
            check_hard_rules(&desired, &failed, 0x1000),
            Err(HardRuleViolation::Unhealthy {
                object_id: ObjectId(0x101)
            })
        );
    }

    #[test]
    fn test_hard_rules_in_order() {
        let desired = drive(0x100, 0);

        let mut candidate = drive(0x101, 1);
        candidate.exported_offset = 0x20000;
        candidate.pool_id = PoolId(3);
        // offset is checked before reservation
        assert!(matches!(
            check_hard_rules(&desired, &candidate, 0x1000),
            Err(HardRuleViolation::OffsetTooLarge { .. })
        ));

        candidate.exported_offset = 0x10000;
        assert_eq!(
            check_hard_rules(&desired, &candidate, 0x1000),
            Err(HardRuleViolation::Reserved(PoolId(3)))
        );

        candidate.pool_id = PoolId::INVALID;
        candidate.drive_type = DriveType::SasFlashHe;
        assert!(matches!(
            check_hard_rules(&desired, &candidate, 0x1000),
            Err(HardRuleViolation::TierMismatch { .. })
        ));

        candidate.drive_type = DriveType::Sas;
        candidate.capacity = 0x800;
        assert!(matches!(
            check_hard_rules(&desired, &candidate, 0x1000),
            Err(HardRuleViolation::InsufficientCapacity { .. })
        ));
    }

    #[test]
    fn test_best_spare_prefers_block_size_then_fit() {
        let desired = drive(0x100, 0);

        let mut wrong_block = drive(0x101, 1);
        wrong_block.block_size = BlockSize::Bytes4160;
        wrong_block.capacity = 0x1000;

        let loose = drive(0x102, 2);
        let mut snug = drive(0x103, 3);
        snug.capacity = 0x2000;

        let candidates = vec![wrong_block, loose, snug];
        let best = find_best_spare(&desired, 0x1000, &candidates).unwrap();
        assert_eq!(best.object_id, ObjectId(0x103));
    }

    #[test]
    fn test_best_spare_none_when_all_rejected() {
        let desired = drive(0x100, 0);
        let mut reserved = drive(0x101, 1);
        reserved.pool_id = PoolId(1);
        assert!(find_best_spare(&desired, 0x1000, &[reserved]).is_none());
    }

    #[test]
    fn test_port_beats_enclosure() {
        let desired = drive(0x100, 0);

        let mut other_port = drive(0x101, 1);
        other_port.location = DriveLocation::new(1, 1, 1);
        let mut same_port_other_enclosure = drive(0x102, 2);
        same_port_other_enclosure.location = DriveLocation::new(0, 2, 2);

        let candidates = vec![other_port, same_port_other_enclosure];
        let best = find_best_spare(&desired, 0x1000, &candidates).unwrap();
        assert_eq!(best.object_id, ObjectId(0x102));
    }
}
