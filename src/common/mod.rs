pub mod config;
pub mod dev_mode;
pub mod error;
pub mod paths;

pub use config::Config;
pub use dev_mode::DevMode;
pub use error::{BallotError, Result};
pub use paths::{
    opencv_cascade_dirs, system_config_file, system_data_dir, system_models_dir, user_config_file,
};
