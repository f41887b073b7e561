pub mod bandwidth;
pub mod common;
pub mod config;
pub mod mongo;
pub mod server;

pub use common::{Error, ErrorKind, Result, Shutdown};
