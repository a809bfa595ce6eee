use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Result, UpdateError};

/// Packaging of a downloaded release artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    TarGz,
    Zip,
    /// Unarchived executable
    Raw,
}

impl ArchiveKind {
    pub fn from_name(name: &str) -> Self {
        let lower = name.to_lowercase();
        if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Self::TarGz
        } else if lower.ends_with(".zip") {
            Self::Zip
        } else {
            Self::Raw
        }
    }
}

/// Produce a standalone executable from a downloaded artifact
pub fn extract_binary(
    kind: ArchiveKind,
    archive_path: &Path,
    dest_dir: &Path,
    name_prefix: &str,
) -> Result<PathBuf> {
    fs::create_dir_all(dest_dir)
        .map_err(|e| UpdateError::io(format!("failed to create {}", dest_dir.display()), e))?;

    let extracted = match kind {
        ArchiveKind::TarGz => extract_tar_gz(archive_path, dest_dir, name_prefix),
        ArchiveKind::Zip => extract_zip(archive_path, dest_dir, name_prefix),
        ArchiveKind::Raw => {
            set_executable(archive_path)?;
            return Ok(archive_path.to_path_buf());
        }
    }
    .map_err(|e| UpdateError::io(format!("failed to extract {}", archive_path.display()), e))?;

    match extracted {
        Some(path) => {
            debug!("Extracted {}", path.display());
            Ok(path)
        }
        None => Err(UpdateError::BinaryNotFoundInArchive {
            archive: archive_path.to_path_buf(),
        }),
    }
}

/// First regular file named `<prefix>*` with no extension, so checksum and
/// signature companions are skipped
fn extract_tar_gz(archive_path: &Path, dest_dir: &Path, prefix: &str) -> io::Result<Option<PathBuf>> {
    let file = File::open(archive_path)?;
    let decoder = GzDecoder::new(BufReader::new(file));
    let mut archive = tar::Archive::new(decoder);

    for entry in archive.entries()? {
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }

        let entry_path = entry.path()?.into_owned();
        let Some(name) = base_name(&entry_path) else {
            continue;
        };
        if !name.starts_with(prefix) || name.contains('.') {
            continue;
        }

        let out_path = dest_dir.join(&name);
        let mut out_file = File::create(&out_path)?;
        io::copy(&mut entry, &mut out_file)?;
        drop(out_file);

        make_executable(&out_path)?;
        return Ok(Some(out_path));
    }

    Ok(None)
}

fn extract_zip(archive_path: &Path, dest_dir: &Path, prefix: &str) -> io::Result<Option<PathBuf>> {
    let file = File::open(archive_path)?;
    let mut archive = zip::ZipArchive::new(file).map_err(io::Error::other)?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(io::Error::other)?;
        if entry.is_dir() {
            continue;
        }

        // enclosed_name rejects absolute and parent-relative paths
        let Some(name) = entry.enclosed_name().as_deref().and_then(base_name) else {
            continue;
        };
        if !name.starts_with(prefix) {
            continue;
        }

        let out_path = dest_dir.join(&name);
        let mut out_file = File::create(&out_path)?;
        io::copy(&mut entry, &mut out_file)?;
        drop(out_file);

        make_executable(&out_path)?;
        return Ok(Some(out_path));
    }

    Ok(None)
}

fn base_name(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
}

fn set_executable(path: &Path) -> Result<()> {
    make_executable(path)
        .map_err(|e| UpdateError::io(format!("failed to mark {} executable", path.display()), e))
}

#[cfg(unix)]
fn make_executable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> io::Result<()> {
    Ok(())
}

/// Sanity check that `path` looks like a runnable file
pub fn verify_binary(path: &Path) -> Result<()> {
    let metadata = fs::metadata(path)
        .map_err(|e| UpdateError::io(format!("failed to stat {}", path.display()), e))?;

    if metadata.is_dir() {
        return Err(UpdateError::BinaryNotExecutable {
            path: path.to_path_buf(),
            reason: "path is a directory".to_string(),
        });
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if metadata.permissions().mode() & 0o111 == 0 {
            return Err(UpdateError::BinaryNotExecutable {
                path: path.to_path_buf(),
                reason: "no execute permission".to_string(),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::tempdir;

    const BINARY: &[u8] = b"\x7fELF fake binary payload";

    fn write_tar_gz(path: &Path, entries: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_entry_type(tar::EntryType::Regular);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        writer.add_directory("dist/", options).unwrap();
        for (name, data) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap();
    }

    #[cfg(unix)]
    fn mode(path: &Path) -> u32 {
        use std::os::unix::fs::PermissionsExt;
        fs::metadata(path).unwrap().permissions().mode()
    }

    #[test]
    fn test_archive_kind() {
        assert_eq!(ArchiveKind::from_name("app-linux-amd64.tar.gz"), ArchiveKind::TarGz);
        assert_eq!(ArchiveKind::from_name("app-linux-amd64.tgz"), ArchiveKind::TarGz);
        assert_eq!(ArchiveKind::from_name("app-windows-amd64.ZIP"), ArchiveKind::Zip);
        assert_eq!(ArchiveKind::from_name("app-linux-amd64"), ArchiveKind::Raw);
    }

    #[test]
    fn test_tar_gz_round_trip() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("app-linux-amd64.tar.gz");
        write_tar_gz(&archive, &[("app-linux-amd64", BINARY)]);

        let out = extract_binary(ArchiveKind::TarGz, &archive, &dir.path().join("out"), "app").unwrap();
        assert_eq!(fs::read(&out).unwrap(), BINARY);
        #[cfg(unix)]
        assert_ne!(mode(&out) & 0o111, 0);
    }

    #[test]
    fn test_tar_gz_skips_companion_files() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("app.tar.gz");
        write_tar_gz(
            &archive,
            &[
                ("dist/README.md", b"docs"),
                ("dist/app-linux-amd64.sha256", b"deadbeef"),
                ("dist/app-linux-amd64", BINARY),
            ],
        );

        let out = extract_binary(ArchiveKind::TarGz, &archive, &dir.path().join("out"), "app").unwrap();
        assert_eq!(out.file_name().unwrap(), "app-linux-amd64");
        assert_eq!(fs::read(&out).unwrap(), BINARY);
    }

    #[test]
    fn test_tar_gz_missing_binary() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("app.tar.gz");
        write_tar_gz(&archive, &[("other-tool", BINARY)]);

        let err = extract_binary(ArchiveKind::TarGz, &archive, &dir.path().join("out"), "app").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BinaryNotFoundInArchive);
    }

    #[test]
    fn test_corrupt_tar_gz_is_io_error() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("app.tar.gz");
        fs::write(&archive, b"not gzip at all").unwrap();

        let err = extract_binary(ArchiveKind::TarGz, &archive, &dir.path().join("out"), "app").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn test_zip_round_trip() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("app-linux-amd64.zip");
        write_zip(&archive, &[("dist/app-linux-amd64", BINARY)]);

        let out = extract_binary(ArchiveKind::Zip, &archive, &dir.path().join("out"), "app").unwrap();
        assert_eq!(out.file_name().unwrap(), "app-linux-amd64");
        assert_eq!(fs::read(&out).unwrap(), BINARY);
        #[cfg(unix)]
        assert_ne!(mode(&out) & 0o111, 0);
    }

    #[test]
    fn test_zip_missing_binary() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("app.zip");
        write_zip(&archive, &[("LICENSE", b"MIT")]);

        let err = extract_binary(ArchiveKind::Zip, &archive, &dir.path().join("out"), "app").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BinaryNotFoundInArchive);
    }

    #[test]
    fn test_raw_binary_passthrough() {
        let dir = tempdir().unwrap();
        let raw = dir.path().join("app-linux-amd64");
        fs::write(&raw, BINARY).unwrap();

        let out = extract_binary(ArchiveKind::Raw, &raw, &dir.path().join("out"), "app").unwrap();
        assert_eq!(out, raw);
        verify_binary(&out).unwrap();
    }

    #[test]
    fn test_verify_rejects_directory() {
        let dir = tempdir().unwrap();
        let err = verify_binary(dir.path()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BinaryNotExecutable);
    }

    #[test]
    fn test_verify_rejects_missing_file() {
        let dir = tempdir().unwrap();
        let err = verify_binary(&dir.path().join("nope")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[cfg(unix)]
    #[test]
    fn test_verify_rejects_zero_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let path = dir.path().join("app");
        fs::write(&path, BINARY).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o000)).unwrap();

        let err = verify_binary(&path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BinaryNotExecutable);

        fs::set_permissions(&path, fs::Permissions::from_mode(0o700)).unwrap();
        verify_binary(&path).unwrap();
    }
}
