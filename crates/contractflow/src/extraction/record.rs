//! The intermediate representation persisted for every processed contract.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntermediateRecord {
    #[serde(default)]
    pub document_type: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub parties: Vec<Party>,
    /// ISO 8601 date (`YYYY-MM-DD`).
    #[serde(default)]
    pub effective_date: Option<String>,
    #[serde(default)]
    pub expiration_date: Option<String>,
    #[serde(default)]
    pub total_value: Option<MonetaryAmount>,
    #[serde(default)]
    pub clauses: Vec<Clause>,
    /// Anything else the source carried, keyed by field path.
    #[serde(default)]
    pub fields: BTreeMap<String, serde_json::Value>,
    /// Number of blocks the record was built from.
    #[serde(default)]
    pub source_blocks: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Party {
    pub name: String,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonetaryAmount {
    pub amount: f64,
    #[serde(default)]
    pub currency: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clause {
    #[serde(default)]
    pub heading: Option<String>,
    pub text: String,
}

impl IntermediateRecord {
    /// Parses the JSON object a model returned.
    ///
    /// Models tend to wrap the object in a Markdown fence or add a sentence
    /// around it, so only the outermost `{ ... }` span is parsed.
    pub fn from_model_output(output: &str) -> Result<Self, serde_json::Error> {
        let start = output.find('{');
        let end = output.rfind('}');
        let json = match (start, end) {
            (Some(start), Some(end)) if start < end => &output[start..=end],
            _ => output,
        };
        serde_json::from_str(json)
    }

    /// True when nothing at all was extracted.
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.parties.is_empty()
            && self.effective_date.is_none()
            && self.expiration_date.is_none()
            && self.total_value.is_none()
            && self.clauses.is_empty()
            && self.fields.is_empty()
    }
}
