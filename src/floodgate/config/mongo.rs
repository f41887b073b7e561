use serde::Deserialize;

use crate::floodgate::common::{Error, Result};

#[derive(Deserialize, Clone)]
pub struct MongoProxy {
    /// host to listen on for client connections, defaults to 0.0.0.0
    #[serde(default = "default_listen_host")]
    pub host: String,
    /// port to listen on for client connections
    pub port: u16,
    /// coordinates of the MongoDB server the proxy fronts
    pub backend: MongoBackend,
    /// storage quota FILTER settings
    #[serde(default)]
    pub filter: FilterSettings,
}

#[derive(Deserialize, Clone)]
pub struct MongoBackend {
    /// host to connect to, defaults to localhost
    #[serde(default = "default_backend_host")]
    pub host: String,
    /// port to connect to, defaults to 27017
    #[serde(default = "default_backend_port")]
    pub port: u16,
    /// unix domain socket path, preferred over host:port when set
    /// (e.g. /tmp/mongodb-27017.sock)
    #[serde(default)]
    pub socket_path: String,
    /// database whose storage footprint is metered
    pub dbname: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub pass: String,
}

#[derive(Deserialize, Clone, Default)]
pub struct FilterSettings {
    /// enable the storage quota filter; when false the proxy forwards everything
    #[serde(default)]
    pub enabled: bool,
    /// MongoDB data directory watched for data file growth; quota monitors
    /// that need the filesystem are skipped when empty
    #[serde(default)]
    pub base_dir: String,
    /// storage quota in megabytes (data + indexes + journal)
    #[serde(default = "default_quota_data_size")]
    pub quota_data_size: u32,
    /// maximum number of on-disk data files for the metered database
    #[serde(default = "default_quota_files")]
    pub quota_files: u32,
    /// fraction of filesystem blocks the filesystem itself holds back
    #[serde(default = "default_fs_reserved_blocks")]
    pub fs_reserved_blocks: f64,
}

fn default_listen_host() -> String { "0.0.0.0".to_string() }
fn default_backend_host() -> String { "localhost".to_string() }
const fn default_backend_port() -> u16 { 27017 }
const fn default_quota_data_size() -> u32 { 1024 }
const fn default_quota_files() -> u32 { 8 }
const fn default_fs_reserved_blocks() -> f64 { 0.05 }

impl MongoProxy {
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub(crate) fn load(&mut self) -> Result<()> {
        if self.port == 0 {
            return Err(Error::new("mongo proxy port cannot be 0"));
        }
        if self.backend.socket_path.is_empty() && self.backend.port == 0 {
            return Err(Error::new("mongo backend needs a port or a socket_path"));
        }
        if self.filter.enabled && self.backend.dbname.is_empty() {
            return Err(Error::new("filter requires backend dbname"));
        }
        if self.filter.fs_reserved_blocks <= 0.0 || self.filter.fs_reserved_blocks >= 1.0 {
            self.filter.fs_reserved_blocks = default_fs_reserved_blocks();
        }
        Ok(())
    }
}

impl MongoBackend {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
