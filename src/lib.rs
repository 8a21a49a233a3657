// Public API for integration tests and potential library usage

pub mod api;
pub mod channel;
pub mod config;
pub mod kv;
pub mod mirror;
pub mod protocol;
pub mod ranking;
pub mod sink;
pub mod state;
pub mod surface;
pub mod timer;
pub mod types;
pub mod ws;

// Server-side timer expiry watcher
pub mod broadcast;
