use std::fs;
use std::path::{Path, PathBuf};
use crate::common::error::Result;
use crate::common::paths::system_data_dir;

/// Selects where the ballot data lives: `./dev_data` during development,
/// the configured or system directory otherwise.
#[derive(Debug, Clone)]
pub struct DevMode {
    enabled: bool,
    base_dir: PathBuf,
}

impl DevMode {
    pub fn new(enabled: bool) -> Result<Self> {
        Self::with_base_dir(enabled, PathBuf::from("./dev_data"))
    }

    pub fn with_base_dir(enabled: bool, base_dir: PathBuf) -> Result<Self> {
        if enabled {
            fs::create_dir_all(base_dir.join("store"))?;
            tracing::info!(
                "Development mode enabled - data will be saved to: {}",
                base_dir.display()
            );
        }

        Ok(Self { enabled, base_dir })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Store directory; `configured` only applies outside dev mode.
    pub fn store_dir(&self, configured: Option<&Path>) -> PathBuf {
        if self.enabled {
            self.base_dir.join("store")
        } else {
            configured
                .map(Path::to_path_buf)
                .unwrap_or_else(system_data_dir)
        }
    }
}
