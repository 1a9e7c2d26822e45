use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::bytes::Regex;
use tokio::process::Command;

use crate::error::ProcessError;
use crate::processor::{PageImage, PageText, PdfRenderer};

/// Page objects in a raw PDF body, for files lopdf cannot load.
static RE_PAGE_OBJECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/Type\s*/Page\b").unwrap());

/// Pattern for Identity-H Unimplemented errors (common with CID fonts).
const IDENTITY_H_PATTERN: &str = "?Identity-H Unimplemented?";

/// Minimum number of characters required before applying alphanumeric ratio check.
/// Text shorter than this is considered valid regardless of character composition.
const MIN_TOTAL_CHARS: usize = 50;

/// Minimum percentage of alphanumeric characters required for text to be considered valid.
const MIN_ALPHANUMERIC_PERCENT: usize = 10;

/// lopdf for the text layer, poppler's `pdftoppm` for rasterization.
pub struct PdfPages {
    program: String,
    scratch_dir: PathBuf,
}

impl PdfPages {
    pub fn new() -> Self {
        Self::with_program("pdftoppm")
    }

    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            scratch_dir: std::env::temp_dir(),
        }
    }

    /// Parent directory for per-call render directories.
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }
}

impl Default for PdfPages {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PdfRenderer for PdfPages {
    fn text_pages(&self, pdf: &[u8]) -> Result<Vec<PageText>, ProcessError> {
        Ok(page_texts(&load(pdf)?))
    }

    async fn render_pages(&self, pdf: &[u8], dpi: u32) -> Result<Vec<PageImage>, ProcessError> {
        // Removed when dropped, including when the caller abandons this future.
        let work_dir = tempfile::Builder::new()
            .prefix("contractflow_render_")
            .tempdir_in(&self.scratch_dir)
            .map_err(|e| ProcessError::Io {
                context: "creating the page render directory".to_string(),
                source: e,
            })?;

        let result = self.render_into(work_dir.path(), pdf, dpi).await;

        if let Err(e) = work_dir.close() {
            tracing::debug!(error = %e, "Failed to remove page render directory");
        }
        result
    }
}

impl PdfPages {
    async fn render_into(
        &self,
        work_dir: &Path,
        pdf: &[u8],
        dpi: u32,
    ) -> Result<Vec<PageImage>, ProcessError> {
        let pdf_path = work_dir.join("input.pdf");
        tokio::fs::write(&pdf_path, pdf)
            .await
            .map_err(|e| ProcessError::PdfProcessing(format!("Failed to write temp PDF: {}", e)))?;

        let output = Command::new(&self.program)
            .arg("-png")
            .arg("-r")
            .arg(dpi.to_string())
            .arg(&pdf_path)
            .arg(work_dir.join("page"))
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                ProcessError::PdfProcessing(format!(
                    "Failed to run {}: {}. Make sure poppler-utils is installed.",
                    self.program, e
                ))
            })?;

        if !output.status.success() {
            return Err(ProcessError::PdfProcessing(format!(
                "{} failed: {}",
                self.program,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let mut rendered = Vec::new();
        let mut entries = tokio::fs::read_dir(work_dir)
            .await
            .map_err(|e| ProcessError::Io {
                context: "listing rendered pages".to_string(),
                source: e,
            })?;
        while let Some(entry) = entries.next_entry().await.map_err(|e| ProcessError::Io {
            context: "listing rendered pages".to_string(),
            source: e,
        })? {
            let name = entry.file_name();
            if let Some(number) = name.to_str().and_then(rendered_page_number) {
                rendered.push((number, entry.path()));
            }
        }
        rendered.sort_by_key(|(number, _)| *number);

        if rendered.is_empty() {
            return Err(ProcessError::PdfProcessing(
                "Renderer produced no page images".to_string(),
            ));
        }

        let mut pages = Vec::with_capacity(rendered.len());
        for (number, path) in rendered {
            let bytes = tokio::fs::read(&path).await.map_err(|e| {
                ProcessError::PdfProcessing(format!("Failed to read rendered image: {}", e))
            })?;
            pages.push(PageImage { number, bytes });
        }
        Ok(pages)
    }
}

fn load(pdf: &[u8]) -> Result<lopdf::Document, ProcessError> {
    lopdf::Document::load_mem(pdf)
        .map_err(|e| ProcessError::PdfProcessing(format!("Failed to load PDF: {}", e)))
}

/// What a single parse of a PDF yields for classification.
#[derive(Debug, Clone, PartialEq)]
pub struct PdfInspection {
    /// Per-page text layer, `None` when lopdf cannot load the file.
    pub text_layer: Option<Vec<PageText>>,
    pub page_count: u32,
}

impl PdfInspection {
    /// All page texts joined, one page per line block.
    pub fn joined_text(&self) -> Option<String> {
        let pages = self.text_layer.as_ref()?;
        let mut text = String::new();
        for page in pages {
            text.push_str(&page.text);
            text.push('\n');
        }
        Some(text)
    }
}

/// Loads the document once and reads both the text layer and the page
/// count. Falls back to a raw scan of page objects when the
/// cross-reference table is broken.
pub fn inspect(pdf: &[u8]) -> PdfInspection {
    let text_layer = lopdf::Document::load_mem(pdf).ok().map(|doc| page_texts(&doc));
    let from_tree = text_layer.as_ref().map_or(0, Vec::len);
    let page_count = if from_tree > 0 {
        from_tree as u32
    } else {
        RE_PAGE_OBJECT.find_iter(pdf).count().max(1) as u32
    };
    PdfInspection {
        text_layer,
        page_count,
    }
}

fn page_texts(doc: &lopdf::Document) -> Vec<PageText> {
    doc.get_pages()
        .keys()
        .map(|&number| PageText {
            number,
            text: doc.extract_text(&[number]).unwrap_or_default(),
            confidence: None,
        })
        .collect()
}

/// `pdftoppm` names pages `page-1.png`, `page-01.png` or `page-001.png`
/// depending on the page count.
fn rendered_page_number(file_name: &str) -> Option<u32> {
    file_name
        .strip_prefix("page-")?
        .strip_suffix(".png")?
        .parse()
        .ok()
}

/// Whether an extracted text layer is good enough to skip OCR.
///
/// Returns false when the text is empty, consists only of font encoding
/// error markers, or is mostly non-alphanumeric noise.
pub fn has_usable_text(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return false;
    }

    let cleaned = trimmed
        .replace(IDENTITY_H_PATTERN, "")
        .replace(['\n', ' '], "");
    if cleaned.is_empty() {
        return false;
    }

    // chars().count() so non-ASCII text is measured correctly
    let total_chars = trimmed.chars().count();
    let alphanumeric_chars = trimmed.chars().filter(|c| c.is_alphanumeric()).count();

    !(total_chars > MIN_TOTAL_CHARS
        && alphanumeric_chars * 100 < total_chars * MIN_ALPHANUMERIC_PERCENT)
}
