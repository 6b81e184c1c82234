pub mod api;
pub mod channel;
pub mod config;
pub mod recording;
