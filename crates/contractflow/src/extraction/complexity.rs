//! Document complexity signal fed to the model router.

use crate::processor::{Block, BlockKind};

const WEIGHT_OCR: f64 = 0.4;
const WEIGHT_TABLES: f64 = 0.3;
const WEIGHT_LENGTH: f64 = 0.15;
const WEIGHT_FRAGMENTATION: f64 = 0.15;

/// Page count at which the length component saturates.
const LONG_DOCUMENT_PAGES: f64 = 50.0;
/// Blocks with fewer words than this count as fragments.
const FRAGMENT_WORDS: usize = 5;

/// Scores how hard a document will be to extract, from 0.0 to 1.0.
///
/// Combines poor OCR confidence (scanned documents only), the share of
/// table-like blocks, document length and how fragmented the text is.
pub fn complexity_score(blocks: &[Block], page_count: u32, ocr_confidence: Option<f64>) -> f64 {
    let ocr = ocr_confidence
        .map(|c| 1.0 - c.clamp(0.0, 1.0))
        .unwrap_or(0.0);

    let (tables, fragments) = blocks.iter().fold((0usize, 0usize), |(t, f), block| {
        (
            t + usize::from(block.kind == BlockKind::Table),
            f + usize::from(block.kind != BlockKind::Heading && block.word_count() < FRAGMENT_WORDS),
        )
    });
    let share = |n: usize| {
        if blocks.is_empty() {
            0.0
        } else {
            n as f64 / blocks.len() as f64
        }
    };

    let length = (f64::from(page_count) / LONG_DOCUMENT_PAGES).min(1.0);

    let score = WEIGHT_OCR * ocr
        + WEIGHT_TABLES * share(tables)
        + WEIGHT_LENGTH * length
        + WEIGHT_FRAGMENTATION * share(fragments);
    (score.clamp(0.0, 1.0) * 1e4).round() / 1e4
}
