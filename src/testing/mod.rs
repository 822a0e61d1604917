//! Testing utilities and mock implementations
//!
//! Mocks for every platform seam of a SailTrack module, usable from unit and
//! integration tests alike.

pub mod mocks;

pub use mocks::*;
