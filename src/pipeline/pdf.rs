//! pdfium binding shared by text extraction and the PDF report renderer.
//!
//! All pdfium work runs inside `spawn_blocking`: the library is synchronous
//! and CPU-bound, and must not stall tokio worker threads.

use crate::error::PdfError;
use crate::state::DocumentMetadata;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Bind to the pdfium shared library.
///
/// `PDFIUM_LIB_PATH` names an explicit library file; otherwise the library is
/// looked up next to the executable and then in the system library path.
pub fn bind_pdfium() -> Result<Pdfium, PdfError> {
    if let Ok(env_path) = std::env::var("PDFIUM_LIB_PATH") {
        let path = PathBuf::from(env_path);
        if path.exists() {
            debug!("Binding pdfium from PDFIUM_LIB_PATH={}", path.display());
            return Pdfium::bind_to_library(&path).map(Pdfium::new).map_err(|e| {
                PdfError::BindingFailed(format!("cannot load '{}': {}", path.display(), e))
            });
        }
    }

    Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        .or_else(|_| Pdfium::bind_to_system_library())
        .map(Pdfium::new)
        .map_err(|e| PdfError::BindingFailed(e.to_string()))
}

/// Read the document information dictionary of an open document.
pub fn read_metadata(document: &PdfDocument<'_>) -> DocumentMetadata {
    let metadata = document.metadata();
    let get_meta = |tag: PdfDocumentMetadataTagType| -> Option<String> {
        metadata.get(tag).and_then(|t| {
            let v = t.value().trim().to_string();
            if v.is_empty() {
                None
            } else {
                Some(v)
            }
        })
    };

    DocumentMetadata {
        title: get_meta(PdfDocumentMetadataTagType::Title),
        author: get_meta(PdfDocumentMetadataTagType::Author),
        subject: get_meta(PdfDocumentMetadataTagType::Subject),
        creator: get_meta(PdfDocumentMetadataTagType::Creator),
        producer: get_meta(PdfDocumentMetadataTagType::Producer),
        creation_date: get_meta(PdfDocumentMetadataTagType::CreationDate),
        modification_date: get_meta(PdfDocumentMetadataTagType::ModificationDate),
        page_count: document.pages().len() as usize,
        pdf_version: format!("{:?}", document.version()),
    }
}

/// Open `path`, classifying pdfium's failure.
pub fn open_document<'a>(
    pdfium: &'a Pdfium,
    path: &Path,
    password: Option<&'a str>,
) -> Result<PdfDocument<'a>, PdfError> {
    pdfium
        .load_pdf_from_file(path, password)
        .map_err(|e| classify_open_error(path, password.is_some(), format!("{:?}", e)))
}

/// pdfium reports encryption problems only through its error text.
pub(crate) fn classify_open_error(path: &Path, password_given: bool, detail: String) -> PdfError {
    let path = path.to_path_buf();
    if detail.contains("Password") || detail.contains("password") {
        if password_given {
            PdfError::WrongPassword { path }
        } else {
            PdfError::PasswordRequired { path }
        }
    } else {
        PdfError::CorruptPdf { path, detail }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_errors_depend_on_whether_one_was_given() {
        let path = Path::new("paper.pdf");
        let detail = || "PdfiumLibraryInternalError(PasswordError)".to_string();

        assert!(matches!(
            classify_open_error(path, false, detail()),
            PdfError::PasswordRequired { .. }
        ));
        assert!(matches!(
            classify_open_error(path, true, detail()),
            PdfError::WrongPassword { .. }
        ));
    }

    #[test]
    fn other_errors_keep_pdfium_detail() {
        let err = classify_open_error(
            Path::new("paper.pdf"),
            false,
            "PdfiumLibraryInternalError(FormatError)".to_string(),
        );
        match &err {
            PdfError::CorruptPdf { path, detail } => {
                assert_eq!(path, Path::new("paper.pdf"));
                assert!(detail.contains("FormatError"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().contains("could not be opened"));
    }

    #[test]
    fn password_required_message_points_at_the_flag() {
        let err = PdfError::PasswordRequired {
            path: PathBuf::from("locked.pdf"),
        };
        let msg = err.to_string();
        assert!(msg.contains("locked.pdf"));
        assert!(msg.contains("--password"));
    }
}
