use std::mem::MaybeUninit;
use std::path::{Path, PathBuf};
use std::fs::File;
use std::env;

use serde::Deserialize;
use tracing::debug;

use crate::floodgate::config::bandwidth::Tunnel;
use crate::floodgate::config::enums::LogLevel;
use crate::floodgate::config::mongo::MongoProxy;
use crate::floodgate::common::{Error, Result};

#[derive(Deserialize)]
pub struct Settings {
    /// config_path is the path of the loaded config file
    #[serde(skip_deserializing)]
    pub config_path: PathBuf,
    /// log verbosity: debug|info|warning|error|critical
    #[serde(default)]
    pub log_level: LogLevel,
    /// log file path; stdout when empty
    #[serde(default)]
    pub log_path: String,
    /// number of tokio worker threads, defaults to the CPU count
    #[serde(default = "default_num_workers")]
    pub num_workers: u32,
    /// MongoDB wire-protocol proxy settings, absent to disable
    pub mongo: Option<MongoProxy>,
    /// bandwidth-limited relay paths, may be empty
    #[serde(default)]
    pub tunnels: Vec<Tunnel>,
}

fn default_num_workers() -> u32 { num_cpus::get() as u32 }

static mut SETTINGS: MaybeUninit<Settings> = MaybeUninit::uninit();

/// Returns the global settings. Must not be called before load_config.
pub fn conf() -> &'static Settings {
    unsafe {
        &*SETTINGS.as_ptr()
    }
}

/// Loads the config file into the global Settings singleton.
/// Unsafe to call more than once, or concurrently with conf(); call it
/// first thing from main.
pub fn load_config(config_name: &str) -> Result<&'static Settings> {
    let config_path = find_config_file(config_name)?;
    let file = File::open(&config_path)?;

    let parsed: Settings = serde_yaml::from_reader(file)?;
    let config = unsafe {
        // write, not assign: the uninitialized Settings must not be dropped
        SETTINGS.as_mut_ptr().write(parsed);
        &mut *SETTINGS.as_mut_ptr()
    };
    config.load(config_path)?;
    Ok(conf())
}

impl Settings {
    pub(crate) fn load(&mut self, path: PathBuf) -> Result<()> {
        self.config_path = path;
        if self.num_workers == 0 {
            self.num_workers = default_num_workers();
        }
        if let Some(mongo) = &mut self.mongo {
            mongo.load()?;
        }
        for tunnel in &self.tunnels {
            tunnel.load()?;
        }
        if self.mongo.is_none() && self.tunnels.is_empty() {
            return Err(Error::new("config declares neither a mongo proxy nor tunnels"));
        }
        Ok(())
    }
}

fn find_config_file(config_name: &str) -> Result<PathBuf> {
    // Use the full path given as the first command line argument
    if let Some(path) = env::args().skip(1).next() {
        debug!("using config_path passed on command line");
        return Ok(PathBuf::from(path));
    }

    // Check the current directory or any of its parents for config_name
    if let Ok(start) = env::current_dir() {
        let mut dir = start.as_path();
        while !dir.as_os_str().is_empty() {
            debug!("checking for config file in {}", dir.to_string_lossy());
            let fp = Path::join(dir, config_name);
            if fp.exists() {
                return Ok(fp);
            }
            if let Some(parent) = dir.parent() {
                dir = parent;
            } else {
                break;
            }
        }
    }

    // Check ~/.config/floodgate/{config_name}
    let mut conf_path = Path::join(Path::new(".config/floodgate"), config_name);
    // HOME is required to be set on POSIX systems, but if it's not set we'll try ~/
    let home = env::var("HOME").unwrap_or_else(|_| "~/".to_string());
    conf_path = Path::join(Path::new(&home), conf_path);
    debug!("checking for config file in {}", conf_path.to_string_lossy());
    if conf_path.exists() {
        return Ok(conf_path);
    }

    // Check ~/.{config_name}
    conf_path = Path::join(Path::new(&home), ".".to_string() + config_name);
    debug!("checking for config file in {}", conf_path.to_string_lossy());
    if conf_path.exists() {
        return Ok(conf_path);
    }

    // Check /etc/floodgate/{config_name}
    conf_path = Path::join(Path::new("/etc/floodgate"), config_name);
    debug!("checking for config file in {}", conf_path.to_string_lossy());
    if conf_path.exists() {
        return Ok(conf_path);
    }

    Err(Error::new(format!("config file {} not found", config_name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_settings_yaml() {
        let yaml = r#"
log_level: warning
mongo:
  port: 29017
  backend:
    host: 127.0.0.1
    port: 27017
    dbname: db
    user: admin
    pass: secret
  filter:
    enabled: true
    base_dir: /store/instance
    quota_data_size: 100
    quota_files: 4
tunnels:
  - listen_port: 15672
    inner_port: 5672
    block_size: 1000000
"#;
        let mut settings: Settings = serde_yaml::from_str(yaml).unwrap();
        settings.load(PathBuf::from("floodgate.yaml")).unwrap();

        assert_eq!(settings.log_level, LogLevel::Warning);
        let mongo = settings.mongo.as_ref().unwrap();
        assert_eq!(mongo.listen_address(), "0.0.0.0:29017");
        assert_eq!(mongo.backend.address(), "127.0.0.1:27017");
        assert!(mongo.filter.enabled);
        assert_eq!(mongo.filter.quota_files, 4);
        assert!((mongo.filter.fs_reserved_blocks - 0.05).abs() < 1e-9);
        assert_eq!(settings.tunnels[0].inner_address(), "127.0.0.1:5672");
    }

    #[test]
    fn reject_empty_config() {
        let mut settings: Settings = serde_yaml::from_str("log_level: info").unwrap();
        assert!(settings.load(PathBuf::from("floodgate.yaml")).is_err());
    }

    #[test]
    fn reject_filter_without_dbname() {
        let yaml = r#"
mongo:
  port: 29017
  backend:
    dbname: ""
  filter:
    enabled: true
"#;
        let mut settings: Settings = serde_yaml::from_str(yaml).unwrap();
        assert!(settings.load(PathBuf::from("floodgate.yaml")).is_err());
    }
}
