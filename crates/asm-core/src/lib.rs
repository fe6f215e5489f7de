//! Assembly kinematic model and export engine
//!
//! This crate combines independently loaded descriptions into one assembly:
//! - Instance: one placed description with joint values and a world pose
//! - AssemblyState: the instance set plus the snap-edge forest
//! - resolver: cross-instance attachment resolution and pose propagation
//! - export: serialization of the merged description

pub mod assembly;
pub mod export;
pub mod instance;
pub mod resolver;

pub use assembly::*;
pub use export::*;
pub use instance::*;
pub use resolver::*;
