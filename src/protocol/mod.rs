//! Wire conventions for module traffic
//!
//! Topic naming and the JSON document format shared by every module.

pub mod messages;
pub mod topics;

pub use messages::*;
pub use topics::*;
