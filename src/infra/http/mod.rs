pub mod client;
pub mod progress;
