//! Domain layer - job vocabulary, topology types and port definitions
//!
//! This module defines the types every other layer speaks, plus the traits
//! (ports) that notification and key-management adapters implement.

pub mod commands;
pub mod events;
pub mod ids;
pub mod job;
pub mod ports;
pub mod topology;

pub use commands::*;
pub use events::*;
pub use ids::*;
pub use job::*;
pub use ports::*;
pub use topology::*;
