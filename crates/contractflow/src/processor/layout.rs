use std::sync::LazyLock;

use regex::Regex;

use crate::error::ProcessError;
use crate::processor::{BBox, Block, BlockKind, LayoutAnalyzer, PageText};

static RE_SECTION_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(article|section|schedule|exhibit|annex|appendix)\b|^\d+(\.\d+)*\.?\s+\S")
        .unwrap()
});
static RE_COLUMN_GAP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\S(\t| {2,})\S").unwrap());

/// Headings are short; anything longer is treated as body text.
const MAX_HEADING_WORDS: usize = 12;

/// Splits page text into blocks at blank lines.
///
/// Bounding boxes span the full page width; vertical extent is the share of
/// the page's lines a block covers.
pub struct ParagraphSegmenter;

impl ParagraphSegmenter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ParagraphSegmenter {
    fn default() -> Self {
        Self::new()
    }
}

impl LayoutAnalyzer for ParagraphSegmenter {
    fn segment(&self, page: &PageText) -> Result<Vec<Block>, ProcessError> {
        let lines: Vec<&str> = page.text.lines().collect();
        let total = lines.len().max(1) as f32;

        let mut blocks = Vec::new();
        let mut start = None;
        for (i, line) in lines.iter().enumerate() {
            match (line.trim().is_empty(), start) {
                (false, None) => start = Some(i),
                (true, Some(s)) => {
                    blocks.push(make_block(page.number, &lines[s..i], s, total));
                    start = None;
                }
                _ => {}
            }
        }
        if let Some(s) = start {
            blocks.push(make_block(page.number, &lines[s..], s, total));
        }

        Ok(blocks)
    }
}

fn make_block(page: u32, lines: &[&str], first_line: usize, total_lines: f32) -> Block {
    let text = lines
        .iter()
        .map(|l| l.trim_end())
        .collect::<Vec<_>>()
        .join("\n");

    Block {
        page,
        kind: block_kind(lines),
        bbox: Some(BBox {
            x: 0.0,
            y: first_line as f32 / total_lines,
            width: 1.0,
            height: lines.len() as f32 / total_lines,
        }),
        text: Some(text.trim().to_string()),
    }
}

fn block_kind(lines: &[&str]) -> BlockKind {
    if lines.len() >= 2 {
        let columnar = lines
            .iter()
            .filter(|l| l.contains('|') || RE_COLUMN_GAP.is_match(l.trim()))
            .count();
        if columnar * 2 > lines.len() {
            return BlockKind::Table;
        }
        return BlockKind::Paragraph;
    }

    let line = lines.first().map(|l| l.trim()).unwrap_or_default();
    if is_heading(line) {
        BlockKind::Heading
    } else {
        BlockKind::Paragraph
    }
}

fn is_heading(line: &str) -> bool {
    let words = line.split_whitespace().count();
    if words == 0 || words > MAX_HEADING_WORDS || line.ends_with(['.', ',', ';']) {
        return false;
    }
    if RE_SECTION_HEADING.is_match(line) {
        return true;
    }
    let letters: Vec<char> = line.chars().filter(|c| c.is_alphabetic()).collect();
    !letters.is_empty() && letters.iter().all(|c| c.is_uppercase())
}
