//! API route modules.

pub mod jobs;
pub mod messages;
pub mod session;
pub mod tabs;
