use async_trait::async_trait;
use tokio::process::Command;

use crate::error::ProcessError;
use crate::processor::{OcrEngine, OcrText, PageImage};

/// TSV row level of a single recognized word.
const TSV_WORD_LEVEL: &str = "5";

fn language_arg(languages: &[String]) -> String {
    if languages.is_empty() {
        "eng".to_string()
    } else {
        languages.join("+")
    }
}

/// Runs the `tesseract` binary per page and reads word confidences from its
/// TSV output.
pub struct TesseractCli {
    program: String,
    languages: String,
    dpi: u32,
}

impl TesseractCli {
    pub fn new(languages: &[String], dpi: u32) -> Self {
        Self {
            program: "tesseract".to_string(),
            languages: language_arg(languages),
            dpi,
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn languages(&self) -> &str {
        &self.languages
    }

    pub fn dpi(&self) -> u32 {
        self.dpi
    }
}

#[async_trait]
impl OcrEngine for TesseractCli {
    async fn extract_text(&self, page: &PageImage) -> Result<OcrText, ProcessError> {
        let extension = match image::guess_format(&page.bytes) {
            Ok(image::ImageFormat::Jpeg) => "jpg",
            Ok(image::ImageFormat::Png) => "png",
            Ok(other) => {
                return Err(ProcessError::OcrFailed(format!(
                    "Unsupported page image format {:?}",
                    other
                )))
            }
            Err(e) => {
                return Err(ProcessError::OcrFailed(format!(
                    "Failed to load image: {}",
                    e
                )))
            }
        };

        // Deleted on drop, so an abandoned OCR call leaves nothing behind.
        let image_file = tempfile::Builder::new()
            .prefix("contractflow_ocr_")
            .suffix(&format!(".{}", extension))
            .tempfile()
            .map_err(|e| ProcessError::Io {
                context: "creating the OCR input image".to_string(),
                source: e,
            })?;
        let image_path = image_file.path();
        tokio::fs::write(image_path, &page.bytes)
            .await
            .map_err(|e| ProcessError::Io {
                context: "writing the OCR input image".to_string(),
                source: e,
            })?;

        let output = Command::new(&self.program)
            .arg(image_path)
            .arg("stdout")
            .arg("-l")
            .arg(&self.languages)
            .arg("--dpi")
            .arg(self.dpi.to_string())
            .arg("tsv")
            .kill_on_drop(true)
            .output()
            .await;

        if let Err(e) = image_file.close() {
            tracing::debug!(error = %e, "Failed to remove OCR input image");
        }

        let output = output.map_err(|e| {
            ProcessError::OcrFailed(format!(
                "Failed to run {}: {}. Make sure tesseract is installed.",
                self.program, e
            ))
        })?;
        if !output.status.success() {
            return Err(ProcessError::OcrFailed(format!(
                "{} failed on page {}: {}",
                self.program,
                page.number,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(parse_tsv(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Rebuilds page text from tesseract's TSV output.
///
/// Words on the same line are joined with spaces and paragraphs are separated
/// by a blank line. Confidence is the mean word confidence scaled to
/// `[0, 1]`, or 0 when nothing was recognized.
pub fn parse_tsv(tsv: &str) -> OcrText {
    let mut text = String::new();
    let mut confidence_sum = 0.0;
    let mut words = 0usize;
    let mut current_line: Option<(&str, &str, &str)> = None;
    let mut current_paragraph: Option<(&str, &str)> = None;

    for row in tsv.lines().skip(1) {
        let cols: Vec<&str> = row.split('\t').collect();
        if cols.len() < 12 || cols[0] != TSV_WORD_LEVEL {
            continue;
        }
        let word = cols[11].trim();
        let Ok(conf) = cols[10].trim().parse::<f64>() else {
            continue;
        };
        if word.is_empty() || conf < 0.0 {
            continue;
        }

        let paragraph = (cols[2], cols[3]);
        let line = (cols[2], cols[3], cols[4]);
        if current_line.is_some() {
            if current_paragraph != Some(paragraph) {
                text.push_str("\n\n");
            } else if current_line != Some(line) {
                text.push('\n');
            } else {
                text.push(' ');
            }
        }
        current_paragraph = Some(paragraph);
        current_line = Some(line);

        text.push_str(word);
        confidence_sum += conf;
        words += 1;
    }

    let confidence = if words == 0 {
        0.0
    } else {
        (confidence_sum / words as f64 / 100.0).clamp(0.0, 1.0)
    };
    OcrText { text, confidence }
}

/// In-process Tesseract through leptess.
#[cfg(feature = "leptess")]
pub struct LeptessOcr {
    languages: String,
}

#[cfg(feature = "leptess")]
impl LeptessOcr {
    pub fn new(languages: &[String]) -> Self {
        Self {
            languages: language_arg(languages),
        }
    }
}

#[cfg(feature = "leptess")]
#[async_trait]
impl OcrEngine for LeptessOcr {
    async fn extract_text(&self, page: &PageImage) -> Result<OcrText, ProcessError> {
        let languages = self.languages.clone();
        let bytes = page.bytes.clone();

        tokio::task::spawn_blocking(move || {
            let img = image::load_from_memory(&bytes)
                .map_err(|e| ProcessError::OcrFailed(format!("Failed to load image: {}", e)))?;

            let mut png_data = Vec::new();
            img.write_to(
                &mut std::io::Cursor::new(&mut png_data),
                image::ImageFormat::Png,
            )
            .map_err(|e| ProcessError::OcrFailed(format!("Failed to convert image: {}", e)))?;

            let mut lt = leptess::LepTess::new(None, &languages).map_err(|e| {
                ProcessError::OcrFailed(format!("Failed to initialize Tesseract: {}", e))
            })?;
            lt.set_image_from_mem(&png_data).map_err(|e| {
                ProcessError::OcrFailed(format!("Failed to set image for OCR: {}", e))
            })?;

            let text = lt
                .get_utf8_text()
                .map_err(|e| ProcessError::OcrFailed(format!("OCR failed: {}", e)))?;
            let confidence = (f64::from(lt.mean_text_conf()) / 100.0).clamp(0.0, 1.0);

            Ok(OcrText {
                text: text.trim().to_string(),
                confidence,
            })
        })
        .await
        .map_err(|e| ProcessError::OcrFailed(format!("OCR task failed: {}", e)))?
    }
}
