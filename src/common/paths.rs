use directories::ProjectDirs;
use std::path::PathBuf;

// System locations used when dev mode is off and no override is configured.

pub fn system_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/faceballot")
}

pub fn system_config_file() -> PathBuf {
    PathBuf::from("/etc/faceballot/faceballot.toml")
}

pub fn system_models_dir() -> PathBuf {
    PathBuf::from("/usr/share/faceballot/models")
}

/// Where distribution OpenCV packages install the stock `haarcascade_*.xml` files.
pub fn opencv_cascade_dirs() -> [PathBuf; 3] {
    [
        PathBuf::from("/usr/share/opencv4/haarcascades"),
        PathBuf::from("/usr/local/share/opencv4/haarcascades"),
        PathBuf::from("/usr/share/opencv/haarcascades"),
    ]
}

/// Per-user config, e.g. `~/.config/faceballot/faceballot.toml` on Linux.
pub fn user_config_file() -> Option<PathBuf> {
    ProjectDirs::from("org", "faceballot", "faceballot")
        .map(|dirs| dirs.config_dir().join("faceballot.toml"))
}
