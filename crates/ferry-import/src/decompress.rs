//! Transparent decompression of gzip, zip and tar.gz sources
//!
//! Archives are extracted into a fresh `ferry-*` directory under the
//! configured working directory (or the system temp directory). The directory
//! is kept on disk until [`cleanup_temp_dir`] is called, because the importer
//! reads from it long after extraction has finished.

use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::ImportError;

/// Compression wrappers recognized by extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Gzip,
    Zip,
    TarGz,
}

impl Compression {
    /// Classify `path` by its file name, case-insensitively
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?.to_ascii_lowercase();
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Compression::TarGz)
        } else if name.ends_with(".gz") {
            Some(Compression::Gzip)
        } else if name.ends_with(".zip") {
            Some(Compression::Zip)
        } else {
            None
        }
    }
}

/// A source ready to be read, plus the temp directory backing it, if any
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedSource {
    pub path: PathBuf,
    pub temp_dir: Option<PathBuf>,
}

impl ExtractedSource {
    fn passthrough(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            temp_dir: None,
        }
    }
}

pub fn is_compressed(path: &Path) -> bool {
    Compression::from_path(path).is_some()
}

/// Extract `path` if it is compressed; otherwise return it unchanged
#[tracing::instrument(fields(path = %path.display()))]
pub fn decompress(path: &Path, working_directory: Option<&Path>) -> Result<ExtractedSource, ImportError> {
    let Some(compression) = Compression::from_path(path) else {
        return Ok(ExtractedSource::passthrough(path));
    };

    let temp_dir = create_temp_dir(working_directory)?;
    tracing::info!(
        compression = ?compression,
        temp_dir = %temp_dir.display(),
        "extracting compressed source"
    );

    let extracted = match compression {
        Compression::Gzip => extract_gzip(path, &temp_dir),
        Compression::Zip => extract_zip(path, &temp_dir).and_then(|()| resolve_extracted(&temp_dir)),
        Compression::TarGz => {
            extract_tar_gz(path, &temp_dir).and_then(|()| resolve_extracted(&temp_dir))
        }
    };

    match extracted {
        Ok(source_path) => Ok(ExtractedSource {
            path: source_path,
            temp_dir: Some(temp_dir),
        }),
        Err(e) => {
            cleanup_temp_dir(&temp_dir);
            Err(e)
        }
    }
}

fn create_temp_dir(working_directory: Option<&Path>) -> Result<PathBuf, ImportError> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("ferry-");
    let dir = match working_directory {
        Some(base) => {
            fs::create_dir_all(base)?;
            builder.tempdir_in(base)?
        }
        None => builder.tempdir()?,
    };
    Ok(dir.keep())
}

/// Remove an extraction directory; failures are logged, never returned
pub fn cleanup_temp_dir(dir: &Path) {
    if !dir.exists() {
        return;
    }
    match fs::remove_dir_all(dir) {
        Ok(()) => tracing::debug!(temp_dir = %dir.display(), "temp directory removed"),
        Err(e) => tracing::warn!(
            temp_dir = %dir.display(),
            error = %e,
            "failed to remove temp directory"
        ),
    }
}

fn extract_gzip(path: &Path, temp_dir: &Path) -> Result<PathBuf, ImportError> {
    let stem = path
        .file_stem()
        .map(|s| s.to_os_string())
        .unwrap_or_else(|| "source".into());
    let target = temp_dir.join(stem);

    let mut decoder = GzDecoder::new(BufReader::new(File::open(path)?));
    let mut out = File::create(&target)?;
    io::copy(&mut decoder, &mut out)
        .map_err(|e| ImportError::Decompression(format!("{}: {}", path.display(), e)))?;
    Ok(target)
}

fn extract_zip(path: &Path, temp_dir: &Path) -> Result<(), ImportError> {
    let mut archive = zip::ZipArchive::new(BufReader::new(File::open(path)?))?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let Some(relative) = entry.enclosed_name() else {
            return Err(ImportError::Decompression(format!(
                "zip entry '{}' escapes the extraction directory",
                entry.name()
            )));
        };
        let target = temp_dir.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)?;
        io::copy(&mut entry, &mut out)
            .map_err(|e| ImportError::Decompression(format!("{}: {}", entry.name(), e)))?;
    }
    Ok(())
}

fn extract_tar_gz(path: &Path, temp_dir: &Path) -> Result<(), ImportError> {
    let decoder = GzDecoder::new(BufReader::new(File::open(path)?));
    let mut archive = tar::Archive::new(decoder);
    archive
        .unpack(temp_dir)
        .map_err(|e| ImportError::Decompression(format!("{}: {}", path.display(), e)))
}

/// Choose what an extracted archive stands for: its only file, its only
/// top-level directory, or the extraction root itself
fn resolve_extracted(root: &Path) -> Result<PathBuf, ImportError> {
    let files: Vec<PathBuf> = WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect();
    if files.len() == 1 {
        return Ok(files[0].clone());
    }

    let top_level: Vec<PathBuf> = fs::read_dir(root)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .collect();
    if top_level.len() == 1 && top_level[0].is_dir() {
        return Ok(top_level[0].clone());
    }
    Ok(root.to_path_buf())
}

/// Open a file, decoding zstd or gzip according to its extension
pub(crate) fn open_maybe_compressed(path: &Path) -> io::Result<Box<dyn Read + Send>> {
    let file = BufReader::new(File::open(path)?);
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    if name.ends_with(".zst") {
        Ok(Box::new(zstd::stream::read::Decoder::with_buffer(file)?))
    } else if name.ends_with(".gz") {
        Ok(Box::new(GzDecoder::new(file)))
    } else {
        Ok(Box::new(file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression as Level;
    use flate2::write::GzEncoder;
    use std::io::Write;

    fn gzip_bytes(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Level::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn classifies_by_extension() {
        assert_eq!(
            Compression::from_path(Path::new("dump.SQL.GZ")),
            Some(Compression::Gzip)
        );
        assert_eq!(
            Compression::from_path(Path::new("dump.tgz")),
            Some(Compression::TarGz)
        );
        assert_eq!(
            Compression::from_path(Path::new("dump.tar.gz")),
            Some(Compression::TarGz)
        );
        assert_eq!(
            Compression::from_path(Path::new("dump.zip")),
            Some(Compression::Zip)
        );
        assert_eq!(Compression::from_path(Path::new("dump.sql")), None);
    }

    #[test]
    fn uncompressed_sources_pass_through() {
        let extracted = decompress(Path::new("/data/app.db"), None).unwrap();
        assert_eq!(extracted.path, PathBuf::from("/data/app.db"));
        assert_eq!(extracted.temp_dir, None);
    }

    #[test]
    fn gunzips_into_a_removable_temp_dir() {
        let work = tempfile::tempdir().unwrap();
        let source = work.path().join("dump.sql.gz");
        fs::write(&source, gzip_bytes(b"-- PostgreSQL database dump\n")).unwrap();

        let extracted = decompress(&source, Some(work.path())).unwrap();
        let temp_dir = extracted.temp_dir.clone().unwrap();
        assert!(temp_dir.starts_with(work.path()));
        assert!(
            temp_dir
                .file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with("ferry-")
        );
        assert_eq!(extracted.path.file_name().unwrap(), "dump.sql");
        assert_eq!(
            fs::read_to_string(&extracted.path).unwrap(),
            "-- PostgreSQL database dump\n"
        );

        cleanup_temp_dir(&temp_dir);
        assert!(!temp_dir.exists());
        // Second cleanup is a no-op.
        cleanup_temp_dir(&temp_dir);
    }

    #[test]
    fn tar_gz_with_one_file_resolves_to_that_file() {
        let work = tempfile::tempdir().unwrap();
        let source = work.path().join("backup.tar.gz");

        let mut builder = tar::Builder::new(Vec::new());
        let data = b"-- MySQL dump 10.13\n";
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "nested/dump.sql", &data[..])
            .unwrap();
        let tar_bytes = builder.into_inner().unwrap();
        fs::write(&source, gzip_bytes(&tar_bytes)).unwrap();

        let extracted = decompress(&source, Some(work.path())).unwrap();
        assert_eq!(extracted.path.file_name().unwrap(), "dump.sql");
        assert!(extracted.path.starts_with(extracted.temp_dir.as_ref().unwrap()));
        cleanup_temp_dir(extracted.temp_dir.as_ref().unwrap());
    }

    #[test]
    fn zip_with_one_directory_resolves_to_it() {
        let work = tempfile::tempdir().unwrap();
        let source = work.path().join("shell.zip");

        let file = File::create(&source).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);
        writer.start_file("dump/@.json", options).unwrap();
        writer.write_all(b"{}").unwrap();
        writer.start_file("dump/shop@orders.json", options).unwrap();
        writer.write_all(b"{}").unwrap();
        writer.finish().unwrap();

        let extracted = decompress(&source, Some(work.path())).unwrap();
        assert!(extracted.path.is_dir());
        assert_eq!(extracted.path.file_name().unwrap(), "dump");
        assert!(extracted.path.join("@.json").is_file());
        cleanup_temp_dir(extracted.temp_dir.as_ref().unwrap());
    }

    #[test]
    fn corrupt_archives_fail_and_leave_nothing_behind() {
        let work = tempfile::tempdir().unwrap();
        let source = work.path().join("broken.zip");
        fs::write(&source, b"definitely not a zip").unwrap();

        let err = decompress(&source, Some(work.path())).unwrap_err();
        assert!(matches!(err, ImportError::Decompression(_)));
        let leftovers: Vec<_> = fs::read_dir(work.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("ferry-"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
