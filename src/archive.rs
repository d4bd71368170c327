//! Archive codec used by the cache (zip extraction) and the backup store
//! (zip or tar.gz creation). Everything here is blocking; async callers go
//! through the `*_async` wrappers which hop onto the blocking pool.

use std::{
    fs::{self, File},
    io,
    path::{Path, PathBuf},
};

use flate2::{Compression, write::GzEncoder};
use walkdir::WalkDir;
use zip::{CompressionMethod, ZipArchive, ZipWriter, write::FileOptions};

use crate::{config::BackupFormat, error::ArchiveError};

/// Packs `root` into `dest`. With `members` set only those top-level entries
/// are included; absent members are skipped with a warning.
///
/// The archive is written next to `dest` and renamed into place once complete.
pub fn pack(
    root: &Path,
    dest: &Path,
    format: BackupFormat,
    members: Option<&[&str]>,
) -> Result<usize, ArchiveError> {
    let files = collect_entries(root, members)?;
    let part = part_path(dest);

    let written = match format {
        BackupFormat::Zip => write_zip(root, &part, &files),
        BackupFormat::TarGz => write_tar_gz(root, &part, &files),
    };

    let count = match written {
        Ok(count) => count,
        Err(e) => {
            _ = fs::remove_file(&part);
            return Err(e);
        }
    };

    fs::rename(&part, dest).map_err(|source| ArchiveError::Io {
        path: dest.to_path_buf(),
        source,
    })?;

    Ok(count)
}

/// Extracts a zip archive into `dest`, creating it if needed.
pub fn unpack_zip(archive: &Path, dest: &Path) -> Result<(), ArchiveError> {
    let file = File::open(archive).map_err(|source| ArchiveError::Io {
        path: archive.to_path_buf(),
        source,
    })?;

    let mut zip = ZipArchive::new(file).map_err(|e| ArchiveError::Zip {
        path: archive.to_path_buf(),
        reason: e.to_string(),
    })?;

    fs::create_dir_all(dest).map_err(|source| ArchiveError::Io {
        path: dest.to_path_buf(),
        source,
    })?;

    zip.extract(dest).map_err(|e| ArchiveError::Zip {
        path: archive.to_path_buf(),
        reason: e.to_string(),
    })
}

pub async fn pack_async(
    root: PathBuf,
    dest: PathBuf,
    format: BackupFormat,
    members: Option<Vec<&'static str>>,
) -> Result<usize, ArchiveError> {
    tokio::task::spawn_blocking(move || pack(&root, &dest, format, members.as_deref()))
        .await
        .map_err(|_| ArchiveError::Join)?
}

pub async fn unpack_zip_async(archive: PathBuf, dest: PathBuf) -> Result<(), ArchiveError> {
    tokio::task::spawn_blocking(move || unpack_zip(&archive, &dest))
        .await
        .map_err(|_| ArchiveError::Join)?
}

/// (absolute path, archive name, is_dir)
type Entry = (PathBuf, String, bool);

fn collect_entries(root: &Path, members: Option<&[&str]>) -> Result<Vec<Entry>, ArchiveError> {
    let starts: Vec<PathBuf> = match members {
        None => vec![root.to_path_buf()],
        Some(names) => names
            .iter()
            .map(|n| root.join(n))
            .filter(|p| {
                let present = p.exists();
                if !present {
                    tracing::warn!("{} missing, not included in archive", p.display());
                }
                present
            })
            .collect(),
    };

    let mut entries = Vec::new();
    for start in starts {
        for item in WalkDir::new(&start).sort_by_file_name() {
            let item = match item {
                Ok(item) => item,
                Err(e) => {
                    if e.path() == Some(root) {
                        return Err(ArchiveError::Walk {
                            path: root.to_path_buf(),
                            reason: e.to_string(),
                        });
                    }
                    tracing::warn!("skipping unreadable entry: {}", e);
                    continue;
                }
            };

            let rel = match item.path().strip_prefix(root) {
                Ok(rel) if !rel.as_os_str().is_empty() => rel,
                _ => continue,
            };
            let name = rel.to_string_lossy().replace('\\', "/");
            entries.push((item.path().to_path_buf(), name, item.file_type().is_dir()));
        }
    }

    Ok(entries)
}

fn write_zip(root: &Path, dest: &Path, entries: &[Entry]) -> Result<usize, ArchiveError> {
    let zip_err = |e: zip::result::ZipError| ArchiveError::Zip {
        path: dest.to_path_buf(),
        reason: e.to_string(),
    };

    let file = create(dest)?;
    let mut zip = ZipWriter::new(file);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut count = 0;
    for (path, name, is_dir) in entries {
        if *is_dir {
            zip.add_directory(name.as_str(), options).map_err(zip_err)?;
            continue;
        }

        let mut src = match File::open(path) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!("skipping {}: {}", path.display(), e);
                continue;
            }
        };
        zip.start_file(name.as_str(), options).map_err(zip_err)?;
        io::copy(&mut src, &mut zip).map_err(|source| ArchiveError::Io {
            path: path.clone(),
            source,
        })?;
        count += 1;
    }

    zip.finish().map_err(zip_err)?;
    tracing::debug!("zipped {} files from {}", count, root.display());
    Ok(count)
}

fn write_tar_gz(root: &Path, dest: &Path, entries: &[Entry]) -> Result<usize, ArchiveError> {
    let io_err = |source: io::Error| ArchiveError::Io {
        path: dest.to_path_buf(),
        source,
    };

    let file = create(dest)?;
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));

    let mut count = 0;
    for (path, name, is_dir) in entries {
        if *is_dir {
            builder.append_dir(name, path).map_err(io_err)?;
            continue;
        }

        match builder.append_path_with_name(path, name) {
            Ok(()) => count += 1,
            Err(e) => tracing::warn!("skipping {}: {}", path.display(), e),
        }
    }

    builder.into_inner().map_err(io_err)?.finish().map_err(io_err)?;
    tracing::debug!("tarred {} files from {}", count, root.display());
    Ok(count)
}

fn create(dest: &Path) -> Result<File, ArchiveError> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|source| ArchiveError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    File::create(dest).map_err(|source| ArchiveError::Io {
        path: dest.to_path_buf(),
        source,
    })
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}
