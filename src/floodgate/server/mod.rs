mod connection;
mod listener;
mod transport;

pub use connection::{flush_or_readable, Conn};
pub use listener::Listener;
