use std::env::current_exe;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::str;
use std::sync::{Arc, Mutex};
use directories_next::ProjectDirs;
use fd_lock::{RwLock, RwLockWriteGuard};
use log::{info, warn};
use serde_json;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::config::types::Config;
use crate::error::ConfigError;

// creates a path to <exe name>.json in the same directory as the executable
// this could be useful for usb sticks
fn get_portable_config_path() -> Option<PathBuf> {
    match current_exe() {
        Ok(mut path) => {
            if !path.set_extension("json") {
                warn!("current exe has no filename: {}", path.to_string_lossy());
                return None
            }

            Some(path)
        },
        Err(err) => {
            warn!("failed to get current exe path: {:?}", err);
            None
        },
    }
}

// creates a path to robocar-remote.json in an os dependent standard directory, such as %AppData% on
// windows.
fn get_local_config_path() -> Option<PathBuf> {
    ProjectDirs::from("org", "robocar", "robocar-remote").map(|dirs| {
        dirs.config_dir().join("robocar-remote.json")
    })
}

fn get_config_path() -> Result<PathBuf, ConfigError> {
    if let Some(path) = get_portable_config_path() {
        match std::fs::metadata(&path) {
            Ok(attr) => {
                if attr.is_file() {
                    return Ok(path);
                }
            }
            Err(err) => {
                info!("Could not read metadata of: {}; Using local path instead. ({:?})", path.to_string_lossy(), err);
            },
        }
    }

    get_local_config_path().ok_or(ConfigError::NoConfigPath)
}

pub struct ConfigIOLocker {
    rw_lock: RwLock<std::fs::File>,
}

impl ConfigIOLocker {
    pub fn lock(&mut self) -> Result<RwLockWriteGuard<std::fs::File>, ConfigError> {
        self.rw_lock.try_write().map_err(|source| ConfigError::CanNotLock { source })
    }
}

struct ConfigIOInner {
    file: std::fs::File,
}

/// Read-only access to the runtime settings file.
#[derive(Clone)]
pub struct ConfigIO {
    inner: Arc<Mutex<ConfigIOInner>>,
}

impl ConfigIO {
    /// Opens `path`, or the default location when `None`, creating an empty file if needed.
    pub fn new_sync(path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path,
            None => get_config_path()?,
        };
        info!("Using config file {}", path.to_string_lossy());

        if let Some(directory) = path.parent() {
            if !directory.as_os_str().is_empty() {
                std::fs::create_dir_all(directory)?;
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .truncate(false)
            .append(false)
            .create(true)
            .open(&path)?;

        Ok(ConfigIO { inner: Arc::new(Mutex::new(ConfigIOInner { file })) })
    }

    /// The exclusive file lock makes sure only one instance drives the vehicle.
    pub fn locker(&self) -> Result<ConfigIOLocker, ConfigError> {
        let inner = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        Ok(ConfigIOLocker {
            rw_lock: RwLock::new(inner.file.try_clone()?),
        })
    }

    fn get_file(&self) -> Result<File, ConfigError> {
        let inner = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let file = inner.file.try_clone()?; // std File
        Ok(File::from_std(file)) // tokio File
    }

    pub async fn read(&self) -> Result<Config, ConfigError> {
        let mut file = self.get_file()?;
        info!("Reading config file");

        let mut content = vec![];
        file.read_to_end(&mut content).await?;

        if content.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(Config::default());
        }

        let content = str::from_utf8(&content)?;
        Ok(serde_json::from_str(content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("robocar-remote-{}-{}.json", name, std::process::id()))
    }

    #[tokio::test]
    async fn empty_file_reads_as_defaults() {
        let path = temp_path("empty");
        let _ = std::fs::remove_file(&path);

        let io = ConfigIO::new_sync(Some(path.clone())).unwrap();
        assert_eq!(io.read().await.unwrap(), Config::default());

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn reads_settings_from_file() {
        let path = temp_path("settings");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(br#"{"autoConnect": false, "logCapacity": 50}"#).unwrap();

        let io = ConfigIO::new_sync(Some(path.clone())).unwrap();
        let config = io.read().await.unwrap();
        assert!(!config.auto_connect);
        assert_eq!(config.log_capacity, 50);

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn invalid_json_is_an_error() {
        let path = temp_path("invalid");
        std::fs::write(&path, "{ not json").unwrap();

        let io = ConfigIO::new_sync(Some(path.clone())).unwrap();
        assert!(matches!(io.read().await, Err(ConfigError::JsonError { .. })));

        let _ = std::fs::remove_file(&path);
    }
}
