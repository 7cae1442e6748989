use std::path::Path;

use thiserror::Error;
use tracing::debug;
use zip::result::ZipError;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Failed to make HTTP request: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("IO error during extraction: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Zip extraction failed for {0} with error: {1}")]
    ZipExtractionError(String, #[source] ZipError),

    #[error("TarXz extraction failed: {0}")]
    TarXzExtractionError(String),

    #[error("TarGz extraction failed: {0}")]
    TarGzExtractionError(String),

    #[error("Task execution error: {0}")]
    TaskError(#[from] tokio::task::JoinError),

    #[error("Unsupported archive format: {0}")]
    UnsupportedFormat(String),
}

/// Archive formats the fetcher knows how to unpack, sniffed from the URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    TarGz,
    TarXz,
}

impl ArchiveFormat {
    pub fn from_url(url: &str) -> Option<Self> {
        if url.ends_with(".zip") {
            Some(ArchiveFormat::Zip)
        } else if url.ends_with(".tar.gz") || url.ends_with(".tgz") {
            Some(ArchiveFormat::TarGz)
        } else if url.ends_with(".tar.xz") {
            Some(ArchiveFormat::TarXz)
        } else {
            None
        }
    }
}

/// Download a release archive from `url` and unpack its whole tree into
/// `destination_dir`, creating the directory if needed.
pub async fn download_and_extract(
    url: &str,
    destination_dir: impl AsRef<Path>,
) -> Result<(), FetchError> {
    let destination_dir = destination_dir.as_ref();
    tokio::fs::create_dir_all(destination_dir).await?;

    let format = ArchiveFormat::from_url(url)
        .ok_or_else(|| FetchError::UnsupportedFormat(url.to_string()))?;

    debug!("Downloading release from {} to {:?}", url, destination_dir);

    let response = reqwest::get(url).await?.error_for_status()?;
    let bytes = response.bytes().await?;

    // Stage the archive in a temp dir so a failed extraction leaves no
    // half-written archive in the destination.
    let temp_dir = tempfile::tempdir()?;
    let archive_path = temp_dir.path().join("release_archive");
    tokio::fs::write(&archive_path, &bytes).await?;

    extract_archive(&archive_path, destination_dir, format).await?;

    Ok(())
}

/// Unpack a local archive into `destination_dir`.
pub async fn extract_archive(
    archive_path: &Path,
    destination_dir: &Path,
    format: ArchiveFormat,
) -> Result<(), FetchError> {
    match format {
        ArchiveFormat::Zip => extract_zip(archive_path, destination_dir).await,
        ArchiveFormat::TarGz => extract_targz(archive_path, destination_dir).await,
        ArchiveFormat::TarXz => extract_tarxz(archive_path, destination_dir).await,
    }
}

async fn extract_zip(archive_path: &Path, destination_dir: &Path) -> Result<(), FetchError> {
    let archive_path = archive_path.to_path_buf();
    let destination_dir = destination_dir.to_path_buf();
    let archive_path_str = archive_path.to_string_lossy().to_string();

    tokio::task::spawn_blocking(move || -> Result<(), FetchError> {
        let file = std::fs::File::open(&archive_path)?;
        let mut archive = zip::ZipArchive::new(file)
            .map_err(|e| FetchError::ZipExtractionError(archive_path_str.clone(), e))?;

        for i in 0..archive.len() {
            let mut file = archive.by_index(i).map_err(|e| {
                FetchError::ZipExtractionError(format!("{}[{}]", archive_path_str, i), e)
            })?;

            let Some(relative) = file.enclosed_name() else {
                // Entries escaping the destination are skipped, not extracted.
                continue;
            };
            let outpath = destination_dir.join(relative);

            if file.name().ends_with('/') {
                std::fs::create_dir_all(&outpath)?;
            } else {
                if let Some(parent) = outpath.parent() {
                    if !parent.exists() {
                        std::fs::create_dir_all(parent)?;
                    }
                }
                let mut outfile = std::fs::File::create(&outpath)?;
                std::io::copy(&mut file, &mut outfile)?;
            }
        }

        Ok(())
    })
    .await??;

    Ok(())
}

async fn extract_targz(archive_path: &Path, destination_dir: &Path) -> Result<(), FetchError> {
    let archive_path = archive_path.to_path_buf();
    let destination_dir = destination_dir.to_path_buf();
    let archive_path_str = archive_path.to_string_lossy().to_string();

    tokio::task::spawn_blocking(move || -> Result<(), FetchError> {
        let file = std::fs::File::open(&archive_path)?;
        let gz_decoder = flate2::read::GzDecoder::new(file);
        let mut archive = tar::Archive::new(gz_decoder);

        archive.unpack(&destination_dir).map_err(|e| {
            FetchError::TarGzExtractionError(format!(
                "Failed to extract {}: {}",
                archive_path_str, e
            ))
        })?;

        Ok(())
    })
    .await??;

    Ok(())
}

async fn extract_tarxz(archive_path: &Path, destination_dir: &Path) -> Result<(), FetchError> {
    let archive_path = archive_path.to_path_buf();
    let destination_dir = destination_dir.to_path_buf();
    let archive_path_str = archive_path.to_string_lossy().to_string();

    tokio::task::spawn_blocking(move || -> Result<(), FetchError> {
        let file = std::fs::File::open(&archive_path)?;
        let xz_decoder = xz2::read::XzDecoder::new(file);
        let mut archive = tar::Archive::new(xz_decoder);

        archive.unpack(&destination_dir).map_err(|e| {
            FetchError::TarXzExtractionError(format!(
                "Failed to extract {}: {}",
                archive_path_str, e
            ))
        })?;

        Ok(())
    })
    .await??;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    fn write_zip_fixture(dest: &Path, entries: &[(&str, &str)]) -> PathBuf {
        let path = dest.join("fixture.zip");
        let file = std::fs::File::create(&path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options: zip::write::SimpleFileOptions = Default::default();

        for (name, contents) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(contents.as_bytes()).unwrap();
        }
        writer.finish().unwrap();

        path
    }

    #[test]
    fn sniffs_archive_format_from_url() {
        assert_eq!(
            ArchiveFormat::from_url("https://example.com/app-data.zip"),
            Some(ArchiveFormat::Zip)
        );
        assert_eq!(
            ArchiveFormat::from_url("https://example.com/app.tar.gz"),
            Some(ArchiveFormat::TarGz)
        );
        assert_eq!(
            ArchiveFormat::from_url("https://example.com/app.tgz"),
            Some(ArchiveFormat::TarGz)
        );
        assert_eq!(
            ArchiveFormat::from_url("https://example.com/app.tar.xz"),
            Some(ArchiveFormat::TarXz)
        );
        assert_eq!(ArchiveFormat::from_url("https://example.com/app.bin"), None);
    }

    #[tokio::test]
    async fn extracts_zip_tree_into_destination() {
        let scratch = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();

        let archive = write_zip_fixture(
            scratch.path(),
            &[
                ("apps/api/data/settings.json", r#"{"port":8080}"#),
                ("package.json", r#"{"name":"app"}"#),
            ],
        );

        extract_archive(&archive, dest.path(), ArchiveFormat::Zip)
            .await
            .unwrap();

        let settings = dest.path().join("apps/api/data/settings.json");
        assert!(settings.is_file());
        let body = std::fs::read_to_string(settings).unwrap();
        assert_eq!(body, r#"{"port":8080}"#);
        assert!(dest.path().join("package.json").is_file());
    }

    #[tokio::test]
    async fn extracts_targz_tree_into_destination() {
        let scratch = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();

        let archive_path = scratch.path().join("fixture.tar.gz");
        let file = std::fs::File::create(&archive_path).unwrap();
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);

        let data = b"hello";
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "nested/file.txt", &data[..])
            .unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        extract_archive(&archive_path, dest.path(), ArchiveFormat::TarGz)
            .await
            .unwrap();

        let extracted: Vec<_> = walkdir::WalkDir::new(dest.path())
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_file())
            .collect();
        assert_eq!(extracted.len(), 1);
        assert_eq!(
            std::fs::read(dest.path().join("nested/file.txt")).unwrap(),
            data
        );
    }

    #[tokio::test]
    async fn unsupported_format_is_rejected_before_any_network_io() {
        let dest = tempfile::tempdir().unwrap();
        let err = download_and_extract("https://example.invalid/app.bin", dest.path())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::UnsupportedFormat(_)));
    }
}
