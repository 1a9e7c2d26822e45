use crate::processor::{Classification, DocumentFormat};

use super::stage::Stage;

const DETERMINISTIC: &[Stage] = &[
    Stage::Classification,
    Stage::XmlParsing,
    Stage::Validation,
    Stage::Storage,
];

const TEXT_NATIVE: &[Stage] = &[
    Stage::Classification,
    Stage::LayoutAnalysis,
    Stage::EntityExtraction,
    Stage::Validation,
    Stage::Storage,
];

const SCANNED: &[Stage] = &[
    Stage::Classification,
    Stage::Ocr,
    Stage::LayoutAnalysis,
    Stage::EntityExtraction,
    Stage::Validation,
    Stage::Storage,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingPath {
    /// Native XML, parsed without a model.
    Deterministic,
    /// PDF with a usable text layer.
    TextNative,
    /// Page images that need OCR.
    Scanned,
}

impl ProcessingPath {
    /// Path for a classified document; `None` when no path accepts it.
    /// Images always take the scanned path, even when flagged searchable.
    pub fn select(classification: &Classification) -> Option<Self> {
        match classification.format {
            DocumentFormat::Xml => Some(ProcessingPath::Deterministic),
            DocumentFormat::Pdf if classification.is_searchable => Some(ProcessingPath::TextNative),
            DocumentFormat::Pdf | DocumentFormat::Jpg | DocumentFormat::Png => {
                Some(ProcessingPath::Scanned)
            }
            DocumentFormat::Other => None,
        }
    }

    /// Every stage this path runs, classification included.
    pub fn stages(&self) -> &'static [Stage] {
        match self {
            ProcessingPath::Deterministic => DETERMINISTIC,
            ProcessingPath::TextNative => TEXT_NATIVE,
            ProcessingPath::Scanned => SCANNED,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingPath::Deterministic => "deterministic",
            ProcessingPath::TextNative => "text_native",
            ProcessingPath::Scanned => "scanned",
        }
    }
}
