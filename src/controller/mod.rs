//! API Controller modules
//!
//! Consolidated controllers organized by domain.

pub mod misc;
pub mod notify;
pub mod subscription;
