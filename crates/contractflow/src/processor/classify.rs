use std::io::Cursor;

use crate::error::ProcessError;
use crate::processor::pdf;
use crate::processor::{Classification, Classifier, DocumentFormat};

/// Magic bytes and extension agree.
const CONFIDENCE_CONFIRMED: f64 = 0.99;
/// Content was recognized but the extension says otherwise (or nothing).
const CONFIDENCE_CONTENT_ONLY: f64 = 0.7;
/// Content was not recognized; the extension was trusted.
const CONFIDENCE_EXTENSION_ONLY: f64 = 0.5;

/// Detects the format from magic bytes first and the filename second, then
/// inspects the content for searchability and page count.
pub struct FormatClassifier;

impl FormatClassifier {
    pub fn new() -> Self {
        Self
    }
}

impl Default for FormatClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Classifier for FormatClassifier {
    fn classify(&self, bytes: &[u8], filename: &str) -> Result<Classification, ProcessError> {
        let sniffed = sniff(bytes);
        let hinted = format_from_mime(filename);

        let (format, confidence) = match (sniffed, hinted) {
            (Some(s), Some(h)) if s == h => (s, CONFIDENCE_CONFIRMED),
            (Some(s), _) => (s, CONFIDENCE_CONTENT_ONLY),
            (None, Some(h)) => (h, CONFIDENCE_EXTENSION_ONLY),
            (None, None) => {
                return Err(ProcessError::UnsupportedFormat(format!(
                    "unrecognized content in '{}'",
                    filename
                )))
            }
        };

        let (is_searchable, page_count, text_layer) = match format {
            DocumentFormat::Pdf => {
                let inspection = pdf::inspect(bytes);
                let searchable = inspection
                    .joined_text()
                    .is_some_and(|text| pdf::has_usable_text(&text));
                let text_layer = match inspection.text_layer {
                    Some(pages) if searchable => pages,
                    _ => Vec::new(),
                };
                (searchable, inspection.page_count, text_layer)
            }
            DocumentFormat::Jpg | DocumentFormat::Png => {
                check_image(bytes)?;
                (false, 1, Vec::new())
            }
            DocumentFormat::Xml => (true, 1, Vec::new()),
            DocumentFormat::Other => (false, 0, Vec::new()),
        };

        tracing::debug!(
            format = format.as_str(),
            is_searchable,
            page_count,
            confidence,
            "Classified document"
        );

        Ok(Classification {
            format,
            is_searchable,
            page_count,
            confidence,
            text_layer,
        })
    }
}

fn sniff(bytes: &[u8]) -> Option<DocumentFormat> {
    if bytes.starts_with(b"%PDF-") {
        return Some(DocumentFormat::Pdf);
    }
    if let Ok(image_format) = image::guess_format(bytes) {
        return Some(match image_format {
            image::ImageFormat::Png => DocumentFormat::Png,
            image::ImageFormat::Jpeg => DocumentFormat::Jpg,
            _ => DocumentFormat::Other,
        });
    }
    if looks_like_xml(bytes) {
        return Some(DocumentFormat::Xml);
    }
    if bytes.starts_with(b"PK\x03\x04") {
        return Some(DocumentFormat::Other);
    }
    None
}

fn looks_like_xml(bytes: &[u8]) -> bool {
    let body = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    let Some(start) = body.iter().position(|b| !b.is_ascii_whitespace()) else {
        return false;
    };
    match &body[start..] {
        [b'<', b'?', b'x', b'm', b'l', ..] => true,
        [b'<', next, ..] => next.is_ascii_alphabetic(),
        _ => false,
    }
}

fn format_from_mime(filename: &str) -> Option<DocumentFormat> {
    let mime = mime_guess::from_path(filename).first()?;
    match (mime.type_().as_str(), mime.subtype().as_str()) {
        ("application", "pdf") => Some(DocumentFormat::Pdf),
        ("image", "png") => Some(DocumentFormat::Png),
        ("image", "jpeg") => Some(DocumentFormat::Jpg),
        (_, "xml") => Some(DocumentFormat::Xml),
        _ => None,
    }
}

/// Reads the image header so truncated or mislabeled files fail here rather
/// than inside the OCR engine.
fn check_image(bytes: &[u8]) -> Result<(), ProcessError> {
    image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| ProcessError::ImageProcessing(format!("Failed to read image: {}", e)))?
        .into_dimensions()
        .map_err(|e| ProcessError::ImageProcessing(format!("Failed to read image header: {}", e)))?;
    Ok(())
}
