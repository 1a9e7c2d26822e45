use std::time::Instant;

use crate::extraction::{Extraction, IntermediateRecord};
use crate::processor::{Block, Classification, PageText};
use crate::router::{RoutingMode, RoutingOutcome};
use crate::validation::QualityIssue;
use crate::worker::{DocumentJob, JobInput};

use super::path::ProcessingPath;
use super::stage::StageRecord;

/// Everything one job accumulates while its stages run.
pub struct PipelineContext {
    // Input
    pub job: DocumentJob,
    pub bytes: Vec<u8>,
    pub forced_model: Option<String>,
    pub routing_mode: RoutingMode,
    pub started: Instant,

    // classification
    pub classification: Option<Classification>,
    pub path: Option<ProcessingPath>,

    // ocr (scanned path) or the PDF text layer (text-native path)
    pub pages: Vec<PageText>,
    /// Mean OCR confidence over the pages that were read.
    pub ocr_confidence: Option<f64>,

    // layout_analysis or xml_parsing
    pub blocks: Vec<Block>,
    pub complexity: Option<f64>,

    // entity_extraction or xml_parsing
    pub extraction: Option<Extraction>,
    pub record: Option<IntermediateRecord>,
    /// Fed back to the routing history once the job ends.
    pub routing_outcome: Option<RoutingOutcome>,

    // storage
    pub record_id: Option<String>,

    pub stages: Vec<StageRecord>,
    pub issues: Vec<QualityIssue>,
}

impl PipelineContext {
    pub fn new(input: JobInput, routing_mode: RoutingMode) -> Self {
        let job = DocumentJob::new(&input);
        Self {
            job,
            bytes: input.bytes,
            forced_model: input.forced_model,
            routing_mode,
            started: Instant::now(),
            classification: None,
            path: None,
            pages: Vec::new(),
            ocr_confidence: None,
            blocks: Vec::new(),
            complexity: None,
            extraction: None,
            record: None,
            routing_outcome: None,
            record_id: None,
            stages: Vec::new(),
            issues: Vec::new(),
        }
    }

    pub fn is_scanned(&self) -> bool {
        self.path == Some(ProcessingPath::Scanned)
    }

    pub fn page_count(&self) -> u32 {
        self.classification
            .as_ref()
            .map(|c| c.page_count)
            .unwrap_or(0)
    }
}
