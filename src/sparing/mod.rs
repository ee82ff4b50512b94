//! Drive spare selection
//!
//! Hard rules decide whether a drive may stand in for another at all; soft
//! rules rank the drives that pass. Provision drive reinitialization uses
//! the hard rules to vet the drive inserted into a slot.

pub mod selection;

pub use selection::{
    check_hard_rules, find_best_spare, rank, HardRuleViolation, SpareRank, SpareSelectionInfo,
};
