pub mod thread;
pub mod wire;
