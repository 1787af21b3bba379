pub mod api;
pub mod app;
pub mod capture;
pub mod cli;
pub mod config;
pub mod events;
pub mod global;
pub mod messaging;
pub mod observer;
pub mod platform;
pub mod scheduler;
pub mod session;
pub mod tabs;
pub mod upload;

#[cfg(any(test, feature = "testing"))]
pub mod testing;
