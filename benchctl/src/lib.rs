//! benchctl library
//!
//! Version-aware update and patch orchestration for framework benches.

pub mod bench;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod patches;
pub mod update;
pub mod utils;
pub mod version;
