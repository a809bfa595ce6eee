use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::update::progress::Stage;

pub type Result<T, E = UpdateError> = std::result::Result<T, E>;

/// How a request to the registry (or an asset host) failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkFailure {
    Timeout,
    Connect,
    /// The server answered with a non-success HTTP status.
    Status(u16),
    Other,
}

impl NetworkFailure {
    pub fn classify(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Connect
        } else if let Some(status) = err.status() {
            Self::Status(status.as_u16())
        } else {
            Self::Other
        }
    }
}

impl fmt::Display for NetworkFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "request timed out"),
            Self::Connect => write!(f, "connection failed"),
            Self::Status(code) => write!(f, "server returned HTTP {}", code),
            Self::Other => write!(f, "request failed"),
        }
    }
}

/// Flat classification of [`UpdateError`], independent of message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    RegistryUnavailable,
    RegistryResponseInvalid,
    NoReleases,
    NoAssetForPlatform,
    VersionNotFound,
    Io,
    BinaryNotFoundInArchive,
    BinaryNotExecutable,
    ReplaceFailed,
    RollbackFailed,
    BackupMissing,
    Config,
}

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("release registry unavailable at {url}: {failure}")]
    RegistryUnavailable {
        url: String,
        failure: NetworkFailure,
        #[source]
        source: Option<reqwest::Error>,
    },

    /// The asset host refused or dropped the artifact download. Classed as
    /// [`ErrorKind::Io`] like extract and backup failures.
    #[error("failed to download {url}: {failure}")]
    DownloadFailed {
        url: String,
        failure: NetworkFailure,
        #[source]
        source: Option<reqwest::Error>,
    },

    #[error("release registry returned an invalid response")]
    RegistryResponseInvalid(#[source] reqwest::Error),

    #[error("no suitable releases found")]
    NoReleases,

    #[error("no asset found for platform {platform}/{arch}")]
    NoAssetForPlatform { platform: String, arch: String },

    #[error("version {0} not found")]
    VersionNotFound(String),

    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("binary not found in archive {}", archive.display())]
    BinaryNotFoundInArchive { archive: PathBuf },

    #[error("{} is not an executable file: {reason}", path.display())]
    BinaryNotExecutable { path: PathBuf, reason: String },

    #[error("failed to replace {}", target.display())]
    ReplaceFailed {
        target: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The swap failed and putting the previous executable back failed too.
    /// The target path may be missing; the previous binary is left at
    /// `old_path` (and the `.backup` copy) for manual recovery.
    #[error(
        "failed to replace {} and failed to restore it from {} ({restore_error}); manual recovery required",
        target.display(),
        old_path.display()
    )]
    RollbackFailed {
        target: PathBuf,
        old_path: PathBuf,
        restore_error: io::Error,
        #[source]
        source: io::Error,
    },

    #[error("no backup found at {}", path.display())]
    BackupMissing { path: PathBuf },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("{stage} stage failed")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<UpdateError>,
    },
}

impl UpdateError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn at_stage(self, stage: Stage) -> Self {
        Self::Stage {
            stage,
            source: Box::new(self),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RegistryUnavailable { .. } => ErrorKind::RegistryUnavailable,
            Self::RegistryResponseInvalid(_) => ErrorKind::RegistryResponseInvalid,
            Self::NoReleases => ErrorKind::NoReleases,
            Self::NoAssetForPlatform { .. } => ErrorKind::NoAssetForPlatform,
            Self::VersionNotFound(_) => ErrorKind::VersionNotFound,
            Self::Io { .. } | Self::DownloadFailed { .. } => ErrorKind::Io,
            Self::BinaryNotFoundInArchive { .. } => ErrorKind::BinaryNotFoundInArchive,
            Self::BinaryNotExecutable { .. } => ErrorKind::BinaryNotExecutable,
            Self::ReplaceFailed { .. } => ErrorKind::ReplaceFailed,
            Self::RollbackFailed { .. } => ErrorKind::RollbackFailed,
            Self::BackupMissing { .. } => ErrorKind::BackupMissing,
            Self::Config(_) => ErrorKind::Config,
            Self::Stage { source, .. } => source.kind(),
        }
    }

    /// Stage the error was raised in, if it came out of `perform_update`.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}
