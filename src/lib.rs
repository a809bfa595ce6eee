pub mod config;
pub mod error;
pub mod update;

pub use config::{ReleaseConfig, Settings};
pub use error::{ErrorKind, UpdateError};
pub use update::{progress_channel, ProgressEvent, Stage, UpdateInfo, Updater};
