pub mod capabilities;
pub mod config;
pub mod dispatch;
pub mod errors;
pub mod frontier;
pub mod gate;
pub mod guard;
pub mod handler;
pub mod jobs;
pub mod lock;
pub mod phase;
pub mod retry;
pub mod server;
pub mod store;
pub mod telemetry;
pub mod tick;

#[cfg(test)]
pub(crate) mod test_support;
