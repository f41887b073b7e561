use serde::Deserialize;

use crate::floodgate::common::{Error, Result};

/// One bandwidth-limited relay path: an external listen port forwarded to
/// an inner host/port with a per-day byte budget covering both directions.
#[derive(Deserialize, Clone)]
pub struct Tunnel {
    /// external port the relay listens on
    pub listen_port: u16,
    /// host to listen on, defaults to 0.0.0.0
    #[serde(default = "default_listen_host")]
    pub host: String,
    /// inner host the relay connects to, defaults to 127.0.0.1
    #[serde(default = "default_inner_host")]
    pub inner_host: String,
    /// inner port the relay connects to
    pub inner_port: u16,
    /// bytes allowed per calendar day (inbound plus outbound)
    pub block_size: u64,
}

fn default_listen_host() -> String { "0.0.0.0".to_string() }
fn default_inner_host() -> String { "127.0.0.1".to_string() }

impl Tunnel {
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.host, self.listen_port)
    }

    pub fn inner_address(&self) -> String {
        format!("{}:{}", self.inner_host, self.inner_port)
    }

    pub(crate) fn load(&self) -> Result<()> {
        if self.listen_port == 0 || self.inner_port == 0 {
            return Err(Error::new("tunnel ports cannot be 0"));
        }
        if self.block_size == 0 {
            return Err(Error::new("tunnel block_size cannot be 0"));
        }
        Ok(())
    }
}
