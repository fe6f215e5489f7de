//! URDF description data model
//!
//! This crate contains the typed model for one kinematic description:
//! - Pose: translation + roll/pitch/yaw with matrix/quaternion conversions
//! - Description: links and joints parsed from URDF text
//! - parse: URDF-subset parser with per-element error recovery

pub mod description;
pub mod parse;
pub mod pose;

pub use description::*;
pub use parse::*;
pub use pose::*;
