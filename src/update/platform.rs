use super::github::{Asset, Release};
use crate::error::{Result, UpdateError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Linux,
    Darwin,
    Windows,
}

impl Platform {
    /// Accepts release tokens as well as `std::env::consts::OS` names
    pub fn from_token(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "linux" => Some(Self::Linux),
            "darwin" | "macos" => Some(Self::Darwin),
            "windows" => Some(Self::Windows),
            _ => None,
        }
    }

    pub fn token(&self) -> &'static str {
        match self {
            Self::Linux => "linux",
            Self::Darwin => "darwin",
            Self::Windows => "windows",
        }
    }

    pub fn archive_extension(&self) -> &'static str {
        match self {
            Self::Windows => "zip",
            _ => "tar.gz",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    Amd64,
    Arm64,
    I386,
}

impl Arch {
    /// Accepts release tokens as well as `std::env::consts::ARCH` names
    pub fn from_token(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "amd64" | "x86_64" => Some(Self::Amd64),
            "arm64" | "aarch64" => Some(Self::Arm64),
            "386" | "x86" | "i386" | "i686" => Some(Self::I386),
            _ => None,
        }
    }

    pub fn token(&self) -> &'static str {
        match self {
            Self::Amd64 => "amd64",
            Self::Arm64 => "arm64",
            Self::I386 => "386",
        }
    }
}

/// Acceptable asset names, most specific first
pub fn asset_patterns(app_name: &str, tag: &str, platform: Platform, arch: Arch) -> Vec<String> {
    let (os, cpu, ext) = (platform.token(), arch.token(), platform.archive_extension());
    vec![
        format!("{}-{}-{}-{}.{}", app_name, tag, os, cpu, ext),
        format!("{}-{}-{}.{}", app_name, os, cpu, ext),
    ]
}

/// Find the release asset built for `platform`/`arch`
pub fn resolve_asset<'a>(
    release: &'a Release,
    app_name: &str,
    platform: &str,
    arch: &str,
) -> Result<&'a Asset> {
    let not_found = || UpdateError::NoAssetForPlatform {
        platform: platform.to_string(),
        arch: arch.to_string(),
    };

    let (Some(os), Some(cpu)) = (Platform::from_token(platform), Arch::from_token(arch)) else {
        return Err(not_found());
    };

    let patterns = asset_patterns(app_name, &release.tag_name, os, cpu);
    release
        .assets
        .iter()
        .find(|a| patterns.iter().any(|p| *p == a.name))
        .ok_or_else(not_found)
}
