pub mod error;
pub mod publisher;
pub mod schedule;
pub mod session;
pub mod sweeper;
pub mod tokens;
