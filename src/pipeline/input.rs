//! Input resolution: turn the user's path or URL into a local PDF file and a
//! default report title.
//!
//! pdfium opens files by path, so URLs are downloaded into a [`TempDir`] that
//! lives as long as the [`ResolvedInput`]. Both branches check the `%PDF`
//! magic bytes so a wrong file fails here rather than inside the load stage.

use crate::error::DigestError;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tracing::{debug, info};

const PDF_MAGIC: &[u8; 4] = b"%PDF";

/// A PDF ready to be opened from disk.
pub enum ResolvedInput {
    Local(PathBuf),
    /// The `TempDir` keeps the downloaded file alive until the run ends.
    Downloaded { path: PathBuf, _temp_dir: TempDir },
}

impl ResolvedInput {
    pub fn path(&self) -> &Path {
        match self {
            ResolvedInput::Local(p) => p,
            ResolvedInput::Downloaded { path, .. } => path,
        }
    }

    /// Title derived from the file name without its extension.
    pub fn default_title(&self) -> String {
        title_from_path(self.path())
    }
}

pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// File stem of `path`, or `"Untitled"` when there is none.
pub fn title_from_path(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "Untitled".to_string())
}

/// Resolve `input` (local path or HTTP/HTTPS URL) to a local PDF.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<ResolvedInput, DigestError> {
    if input.trim().is_empty() {
        return Err(DigestError::InvalidInput {
            input: input.to_string(),
        });
    }
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        resolve_local(Path::new(input))
    }
}

fn resolve_local(path: &Path) -> Result<ResolvedInput, DigestError> {
    let path = path.to_path_buf();
    if !path.exists() {
        return Err(DigestError::FileNotFound { path });
    }

    let mut file = match std::fs::File::open(&path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(DigestError::PermissionDenied { path });
        }
        Err(_) => return Err(DigestError::FileNotFound { path }),
    };

    let mut magic = [0u8; 4];
    if file.read_exact(&mut magic).is_ok() && &magic != PDF_MAGIC {
        return Err(DigestError::NotAPdf { path, magic });
    }

    debug!("Resolved local PDF: {}", path.display());
    Ok(ResolvedInput::Local(path))
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<ResolvedInput, DigestError> {
    info!("Downloading PDF from: {}", url);
    let failed = |reason: String| DigestError::DownloadFailed {
        url: url.to_string(),
        reason,
    };

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            DigestError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            failed(e.to_string())
        }
    })?;

    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?;
    if bytes.len() >= 4 && &bytes[..4] != PDF_MAGIC {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[..4]);
        return Err(DigestError::NotAPdf {
            path: PathBuf::from(url),
            magic,
        });
    }

    let temp_dir = TempDir::new().map_err(|e| DigestError::Internal(e.to_string()))?;
    let file_path = temp_dir.path().join(filename_from_url(url));
    tokio::fs::write(&file_path, &bytes)
        .await
        .map_err(|e| DigestError::Internal(format!("Failed to write temp file: {}", e)))?;

    info!("Downloaded {} bytes to {}", bytes.len(), file_path.display());
    Ok(ResolvedInput::Downloaded {
        path: file_path,
        _temp_dir: temp_dir,
    })
}

/// Last path segment of the URL, with `.pdf` appended when it has no
/// extension (arXiv links like `/pdf/1706.03762` look like `1706.03762`).
fn filename_from_url(url: &str) -> String {
    let last = reqwest::Url::parse(url).ok().and_then(|parsed| {
        parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back().map(str::to_string))
    });
    match last {
        Some(name) if name.to_ascii_lowercase().ends_with(".pdf") => name,
        Some(name) if !name.is_empty() => format!("{name}.pdf"),
        _ => "downloaded.pdf".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/doc.pdf"));
        assert!(is_url("http://example.com/doc.pdf"));
        assert!(!is_url("/tmp/doc.pdf"));
        assert!(!is_url("doc.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn filename_keeps_or_adds_pdf_extension() {
        assert_eq!(filename_from_url("https://x.org/papers/attn.pdf"), "attn.pdf");
        assert_eq!(filename_from_url("https://arxiv.org/pdf/1706.03762"), "1706.03762.pdf");
        assert_eq!(filename_from_url("https://x.org/"), "downloaded.pdf");
    }

    #[test]
    fn title_is_file_stem() {
        assert_eq!(title_from_path(Path::new("/papers/mmefir.pdf")), "mmefir");
        assert_eq!(title_from_path(Path::new("")), "Untitled");
    }

    #[tokio::test]
    async fn missing_file_reported() {
        let err = resolve_input("/definitely/not/here.pdf", 5).await.err().unwrap();
        assert!(matches!(err, DigestError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn non_pdf_rejected_with_magic() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"PK\x03\x04zip").unwrap();
        let err = resolve_input(file.path().to_str().unwrap(), 5)
            .await
            .err()
            .unwrap();
        match err {
            DigestError::NotAPdf { magic, .. } => assert_eq!(&magic, b"PK\x03\x04"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn local_pdf_resolves() {
        let mut file = tempfile::Builder::new().suffix(".pdf").tempfile().unwrap();
        file.write_all(b"%PDF-1.7\n").unwrap();
        let resolved = resolve_input(file.path().to_str().unwrap(), 5).await.unwrap();
        assert_eq!(resolved.path(), file.path());
        assert!(!resolved.default_title().is_empty());
    }

    #[tokio::test]
    async fn blank_input_invalid() {
        let err = resolve_input("  ", 5).await.err().unwrap();
        assert!(matches!(err, DigestError::InvalidInput { .. }));
    }
}
