//! Archive extraction.
//!
//! The format is detected from the leading bytes, not the file name: many
//! source URLs end in query strings or tag names.

use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use tar::Archive;

use super::FetchError;

/// Supported archive formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    TarGz,
    Tar,
    Zip,
}

impl ArchiveKind {
    /// Detect the format from the first bytes of the file.
    pub fn detect(path: &Path) -> Result<ArchiveKind, FetchError> {
        let mut magic = [0u8; 4];
        let mut file = File::open(path).map_err(|e| FetchError::io(path, e))?;
        let read = file.read(&mut magic).map_err(|e| FetchError::io(path, e))?;

        Ok(match &magic[..read] {
            [0x1f, 0x8b, ..] => ArchiveKind::TarGz,
            [b'P', b'K', 0x03, 0x04] => ArchiveKind::Zip,
            _ => ArchiveKind::Tar,
        })
    }
}

/// Extract `archive` into `dest` and return the source root.
///
/// When the archive holds exactly one top-level directory, that directory
/// is the source root. Otherwise `dest` itself is.
pub fn extract(archive: &Path, dest: &Path) -> Result<PathBuf, FetchError> {
    fs::create_dir_all(dest).map_err(|e| FetchError::io(dest, e))?;

    let kind = ArchiveKind::detect(archive)?;
    tracing::debug!("Extracting {:?} archive {}", kind, archive.display());

    match kind {
        ArchiveKind::TarGz => {
            let file = File::open(archive).map_err(|e| FetchError::io(archive, e))?;
            unpack_tar(Archive::new(GzDecoder::new(BufReader::new(file))), dest)?;
        }
        ArchiveKind::Tar => {
            let file = File::open(archive).map_err(|e| FetchError::io(archive, e))?;
            unpack_tar(Archive::new(BufReader::new(file)), dest)?;
        }
        ArchiveKind::Zip => unpack_zip(archive, dest)?,
    }

    source_root(dest)
}

/// Check that an entry path stays inside the destination.
fn safe_relative(path: &Path) -> Result<PathBuf, FetchError> {
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(FetchError::Extract {
                    message: format!("entry escapes destination directory: {}", path.display()),
                });
            }
        }
    }
    Ok(clean)
}

/// Check that a symlink at `entry` pointing to `target` resolves inside the
/// destination.
fn check_link_target(entry: &Path, target: &Path) -> Result<(), FetchError> {
    let escape = || FetchError::Extract {
        message: format!(
            "link {} -> {} escapes destination directory",
            entry.display(),
            target.display()
        ),
    };

    let mut depth: usize = entry.components().count().saturating_sub(1);
    for component in target.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir => depth = depth.checked_sub(1).ok_or_else(escape)?,
            Component::RootDir | Component::Prefix(_) => return Err(escape()),
        }
    }
    Ok(())
}

fn unpack_tar<R: Read>(mut archive: Archive<R>, dest: &Path) -> Result<(), FetchError> {
    let entries = archive.entries().map_err(|e| FetchError::Extract {
        message: format!("failed to read archive entries: {}", e),
    })?;

    for entry in entries {
        let mut entry = entry.map_err(|e| FetchError::Extract {
            message: format!("failed to read archive entry: {}", e),
        })?;
        let entry_path = entry
            .path()
            .map_err(|e| FetchError::Extract {
                message: format!("invalid entry path: {}", e),
            })?
            .into_owned();

        let relative = safe_relative(&entry_path)?;
        if relative.as_os_str().is_empty() {
            continue;
        }

        let entry_type = entry.header().entry_type();
        if entry_type.is_symlink() || entry_type.is_hard_link() {
            if let Ok(Some(target)) = entry.link_name() {
                if entry_type.is_hard_link() {
                    safe_relative(&target)?;
                } else {
                    check_link_target(&relative, &target)?;
                }
            }
        }

        let output_path = dest.join(&relative);
        if let Some(parent) = output_path.parent() {
            fs::create_dir_all(parent).map_err(|e| FetchError::io(parent, e))?;
        }

        match entry_type {
            tar::EntryType::Directory => {
                fs::create_dir_all(&output_path).map_err(|e| FetchError::io(&output_path, e))?;
            }
            tar::EntryType::Regular
            | tar::EntryType::Continuous
            | tar::EntryType::Symlink
            | tar::EntryType::Link => {
                entry.unpack(&output_path).map_err(|e| FetchError::Extract {
                    message: format!("failed to extract {}: {}", relative.display(), e),
                })?;
            }
            other => {
                tracing::debug!(
                    "Skipping unsupported entry type {:?}: {}",
                    other,
                    relative.display()
                );
            }
        }
    }

    Ok(())
}

fn unpack_zip(archive_path: &Path, dest: &Path) -> Result<(), FetchError> {
    let file = File::open(archive_path).map_err(|e| FetchError::io(archive_path, e))?;
    let mut archive = zip::ZipArchive::new(BufReader::new(file)).map_err(|e| {
        FetchError::Extract {
            message: format!("failed to open zip: {}", e),
        }
    })?;

    for i in 0..archive.len() {
        let mut file = archive.by_index(i).map_err(|e| FetchError::Extract {
            message: format!("failed to read zip entry: {}", e),
        })?;

        let relative = file.enclosed_name().ok_or_else(|| FetchError::Extract {
            message: format!("entry escapes destination directory: {}", file.name()),
        })?;
        if relative.as_os_str().is_empty() {
            continue;
        }

        let dest_path = dest.join(&relative);

        if file.is_dir() {
            fs::create_dir_all(&dest_path).map_err(|e| FetchError::io(&dest_path, e))?;
            continue;
        }

        if let Some(parent) = dest_path.parent() {
            fs::create_dir_all(parent).map_err(|e| FetchError::io(parent, e))?;
        }

        let mut outfile = File::create(&dest_path).map_err(|e| FetchError::io(&dest_path, e))?;
        std::io::copy(&mut file, &mut outfile).map_err(|e| FetchError::io(&dest_path, e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = file.unix_mode() {
                fs::set_permissions(&dest_path, fs::Permissions::from_mode(mode & 0o7777))
                    .map_err(|e| FetchError::io(&dest_path, e))?;
            }
        }
    }

    Ok(())
}

fn source_root(dest: &Path) -> Result<PathBuf, FetchError> {
    let mut entries = fs::read_dir(dest)
        .map_err(|e| FetchError::io(dest, e))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| FetchError::io(dest, e))?;

    if entries.len() == 1 {
        let only = entries.remove(0);
        let is_dir = only
            .file_type()
            .map(|t| t.is_dir())
            .map_err(|e| FetchError::io(&only.path(), e))?;
        if is_dir {
            return Ok(only.path());
        }
    }

    Ok(dest.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::fixtures::{tar_gz_bytes, zip_bytes};
    use tempfile::TempDir;

    #[test]
    fn test_extract_tar_gz_with_single_root() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("src.tar.gz");
        std::fs::write(
            &archive,
            tar_gz_bytes(&[
                ("xkbcomp-1.4.7/configure.ac", "AC_INIT\n"),
                ("xkbcomp-1.4.7/xkbcomp.c", "int main(void) { return 0; }\n"),
            ]),
        )
        .unwrap();

        let dest = tmp.path().join("work");
        let root = extract(&archive, &dest).unwrap();

        assert_eq!(root, dest.join("xkbcomp-1.4.7"));
        assert!(root.join("configure.ac").is_file());
    }

    #[test]
    fn test_extract_zip_detected_by_magic() {
        let tmp = TempDir::new().unwrap();
        // No extension: detection must not depend on the name.
        let archive = tmp.path().join("download");
        std::fs::write(
            &archive,
            zip_bytes(&[("pkg/README", "hello\n"), ("pkg/src/main.c", "int x;\n")]),
        )
        .unwrap();

        assert_eq!(ArchiveKind::detect(&archive).unwrap(), ArchiveKind::Zip);

        let dest = tmp.path().join("work");
        let root = extract(&archive, &dest).unwrap();
        assert_eq!(root, dest.join("pkg"));
        assert_eq!(
            std::fs::read_to_string(root.join("src/main.c")).unwrap(),
            "int x;\n"
        );
    }

    #[test]
    fn test_multiple_top_level_entries_use_dest() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("flat.tar.gz");
        std::fs::write(&archive, tar_gz_bytes(&[("a.txt", "a"), ("b.txt", "b")])).unwrap();

        let dest = tmp.path().join("work");
        assert_eq!(extract(&archive, &dest).unwrap(), dest);
    }

    #[test]
    fn test_safe_relative_rejects_escape() {
        assert!(safe_relative(Path::new("../etc/passwd")).is_err());
        assert!(safe_relative(Path::new("/etc/passwd")).is_err());
        assert_eq!(
            safe_relative(Path::new("./pkg/file")).unwrap(),
            PathBuf::from("pkg/file")
        );
    }

    #[test]
    fn test_link_target_escape() {
        assert!(check_link_target(Path::new("pkg/lib/a.so"), Path::new("a.so.1")).is_ok());
        assert!(check_link_target(Path::new("pkg/lib/a.so"), Path::new("../../x")).is_ok());
        assert!(check_link_target(Path::new("pkg/lib/a.so"), Path::new("../../../x")).is_err());
        assert!(check_link_target(Path::new("pkg/a"), Path::new("/etc/passwd")).is_err());
    }
}
