//! Document collaborators: format classification, PDF text and page
//! rendering, XML parsing, OCR and layout segmentation.
//!
//! Each concern sits behind a trait so the orchestrator can be driven by
//! fakes in tests; the default implementations live in the submodules.

pub mod classify;
pub mod layout;
pub mod ocr;
pub mod pdf;
pub mod xml;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::{OcrEngineKind, PipelineSettings};
use crate::error::ProcessError;
use crate::extraction::IntermediateRecord;

pub use classify::FormatClassifier;
pub use layout::ParagraphSegmenter;
pub use ocr::TesseractCli;
pub use pdf::PdfPages;
pub use xml::XmlContractParser;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Xml,
    Pdf,
    Jpg,
    Png,
    /// Recognized bytes that no processing path accepts (TIFF, ZIP, ...).
    Other,
}

impl DocumentFormat {
    /// Maps a filename extension to a format. `None` for anything the
    /// pipeline does not accept.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "xml" => Some(DocumentFormat::Xml),
            "pdf" => Some(DocumentFormat::Pdf),
            "jpg" | "jpeg" => Some(DocumentFormat::Jpg),
            "png" => Some(DocumentFormat::Png),
            _ => None,
        }
    }

    pub fn from_filename(filename: &str) -> Option<Self> {
        std::path::Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentFormat::Xml => "xml",
            DocumentFormat::Pdf => "pdf",
            DocumentFormat::Jpg => "jpg",
            DocumentFormat::Png => "png",
            DocumentFormat::Other => "other",
        }
    }

    pub fn is_image(&self) -> bool {
        matches!(self, DocumentFormat::Jpg | DocumentFormat::Png)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub format: DocumentFormat,
    /// The document carries a usable text layer.
    pub is_searchable: bool,
    pub page_count: u32,
    /// 0.0 to 1.0.
    pub confidence: f64,
    /// PDF text layer read during classification, kept only when searchable.
    #[serde(skip)]
    pub text_layer: Vec<PageText>,
}

/// Text of one page, from a PDF text layer or from OCR.
#[derive(Debug, Clone, PartialEq)]
pub struct PageText {
    /// 1-based.
    pub number: u32,
    pub text: String,
    /// OCR confidence in `[0, 1]`; `None` for native text.
    pub confidence: Option<f64>,
}

/// A rendered page (PNG or JPEG bytes).
#[derive(Debug, Clone)]
pub struct PageImage {
    pub number: u32,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OcrText {
    pub text: String,
    pub confidence: f64,
}

/// Normalized page coordinates, origin top-left, all values in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Heading,
    Paragraph,
    Table,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Block {
    pub page: u32,
    pub kind: BlockKind,
    pub bbox: Option<BBox>,
    pub text: Option<String>,
}

impl Block {
    pub fn word_count(&self) -> usize {
        self.text
            .as_deref()
            .map(|t| t.split_whitespace().count())
            .unwrap_or(0)
    }
}

/// Output of the deterministic XML path.
#[derive(Debug, Clone)]
pub struct ParsedXml {
    pub blocks: Vec<Block>,
    pub record: IntermediateRecord,
}

pub trait Classifier: Send + Sync {
    fn classify(&self, bytes: &[u8], filename: &str) -> Result<Classification, ProcessError>;
}

#[async_trait]
pub trait PdfRenderer: Send + Sync {
    /// Text layer of every page.
    fn text_pages(&self, pdf: &[u8]) -> Result<Vec<PageText>, ProcessError>;

    /// Rasterizes every page for OCR.
    async fn render_pages(&self, pdf: &[u8], dpi: u32) -> Result<Vec<PageImage>, ProcessError>;
}

#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn extract_text(&self, page: &PageImage) -> Result<OcrText, ProcessError>;
}

pub trait LayoutAnalyzer: Send + Sync {
    fn segment(&self, page: &PageText) -> Result<Vec<Block>, ProcessError>;
}

pub trait XmlParser: Send + Sync {
    fn parse(&self, bytes: &[u8]) -> Result<ParsedXml, ProcessError>;
}

/// The document collaborators one pipeline runs with.
#[derive(Clone)]
pub struct Processors {
    pub classifier: Arc<dyn Classifier>,
    pub pdf: Arc<dyn PdfRenderer>,
    pub ocr: Arc<dyn OcrEngine>,
    pub layout: Arc<dyn LayoutAnalyzer>,
    pub xml: Arc<dyn XmlParser>,
}

impl Processors {
    /// Default collaborators for the configured OCR engine.
    pub fn from_settings(settings: &PipelineSettings) -> Result<Self, ProcessError> {
        let ocr: Arc<dyn OcrEngine> = match settings.ocr.engine {
            OcrEngineKind::TesseractCli => Arc::new(TesseractCli::new(
                &settings.ocr.languages,
                settings.ocr.dpi,
            )),
            #[cfg(feature = "leptess")]
            OcrEngineKind::Leptess => Arc::new(ocr::LeptessOcr::new(&settings.ocr.languages)),
            #[cfg(not(feature = "leptess"))]
            OcrEngineKind::Leptess => {
                return Err(ProcessError::OcrFailed(
                    "The leptess OCR engine requires building with the `leptess` feature"
                        .to_string(),
                ))
            }
        };

        Ok(Self {
            classifier: Arc::new(FormatClassifier::new()),
            pdf: Arc::new(PdfPages::new()),
            ocr,
            layout: Arc::new(ParagraphSegmenter::new()),
            xml: Arc::new(XmlContractParser::new()),
        })
    }
}
