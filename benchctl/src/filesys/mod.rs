//! Async file and directory wrappers

pub mod dir;
pub mod file;
