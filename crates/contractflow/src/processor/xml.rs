use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::ProcessError;
use crate::extraction::{Clause, IntermediateRecord, MonetaryAmount, Party};
use crate::processor::{Block, BlockKind, ParsedXml, XmlParser};

/// Maps a structured contract XML file straight into an
/// [`IntermediateRecord`] without calling a model.
///
/// Element names are matched case-insensitively with `-` and `_` ignored, so
/// `effective_date`, `EffectiveDate` and `effective-date` are the same field.
/// Leaf elements that are not part of the record vocabulary land in
/// `fields` under their dotted path below the root.
pub struct XmlContractParser;

impl XmlContractParser {
    pub fn new() -> Self {
        Self
    }
}

impl Default for XmlContractParser {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default)]
struct Builder {
    record: IntermediateRecord,
    blocks: Vec<Block>,
    /// Normalized names of the open elements.
    stack: Vec<String>,
    party: Option<Party>,
    clause: Option<Clause>,
    amount_currency: Option<String>,
}

impl XmlParser for XmlContractParser {
    fn parse(&self, bytes: &[u8]) -> Result<ParsedXml, ProcessError> {
        let mut reader = Reader::from_reader(bytes);

        let mut builder = Builder::default();
        let mut buf = Vec::new();
        // Text of the current element, which arrives in pieces around entity
        // references.
        let mut pending = String::new();
        let mut saw_root = false;

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(ref e)) => {
                    builder.text(&std::mem::take(&mut pending));
                    saw_root = true;
                    builder.open(e);
                }
                Ok(Event::Empty(ref e)) => {
                    builder.text(&std::mem::take(&mut pending));
                    saw_root = true;
                    builder.open(e);
                    builder.close();
                }
                Ok(Event::End(_)) => {
                    builder.text(&std::mem::take(&mut pending));
                    builder.close();
                }
                // Entity references arrive as separate `GeneralRef` events.
                Ok(Event::Text(e)) => {
                    let decoded = e.decode().map_err(|e| {
                        ProcessError::XmlParsing(format!("Invalid text content: {}", e))
                    })?;
                    pending.push_str(&decoded);
                }
                Ok(Event::GeneralRef(e)) => {
                    let name = e.decode().map_err(|e| {
                        ProcessError::XmlParsing(format!("Invalid entity reference: {}", e))
                    })?;
                    pending.push_str(&resolve_entity(&name)?);
                }
                Ok(Event::CData(e)) => {
                    pending.push_str(&String::from_utf8_lossy(&e));
                }
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(ProcessError::XmlParsing(format!(
                        "Error at position {}: {}",
                        reader.error_position(),
                        e
                    )))
                }
                _ => {}
            }
            buf.clear();
        }

        if !saw_root {
            return Err(ProcessError::XmlParsing(
                "Document has no root element".to_string(),
            ));
        }
        if !builder.stack.is_empty() {
            return Err(ProcessError::XmlParsing(format!(
                "Unclosed element <{}>",
                builder.stack.join("/")
            )));
        }

        builder.record.source_blocks = builder.blocks.len();
        Ok(ParsedXml {
            blocks: builder.blocks,
            record: builder.record,
        })
    }
}

impl Builder {
    fn open(&mut self, e: &BytesStart<'_>) {
        let name = normalize(&String::from_utf8_lossy(e.local_name().as_ref()));
        if self.stack.is_empty() && self.record.document_type.is_none() {
            self.record.document_type = Some(name.clone());
        }

        match name.as_str() {
            "party" => {
                self.party = Some(Party {
                    name: attribute(e, &["name"]).unwrap_or_default(),
                    role: attribute(e, &["role", "type"]),
                })
            }
            "clause" | "section" | "article" if self.clause.is_none() => {
                self.clause = Some(Clause {
                    heading: attribute(e, &["heading", "title"]),
                    text: String::new(),
                })
            }
            "totalvalue" | "contractvalue" | "value" => {
                self.amount_currency = attribute(e, &["currency"]);
            }
            _ => {}
        }
        self.stack.push(name);
    }

    fn close(&mut self) {
        let Some(name) = self.stack.pop() else {
            return;
        };
        match name.as_str() {
            "party" => {
                if let Some(party) = self.party.take().filter(|p| !p.name.is_empty()) {
                    self.record.parties.push(party);
                }
            }
            "clause" | "section" | "article" if !self.inside(&["clause", "section", "article"]) => {
                if let Some(clause) = self.clause.take() {
                    if !clause.text.is_empty() || clause.heading.is_some() {
                        self.record.clauses.push(clause);
                    }
                }
            }
            _ => {}
        }
    }

    fn inside(&self, names: &[&str]) -> bool {
        self.stack.iter().any(|n| names.contains(&n.as_str()))
    }

    fn text(&mut self, raw: &str) {
        let text = raw.trim();
        if text.is_empty() {
            return;
        }
        let Some(current) = self.stack.last().cloned() else {
            return;
        };
        let parent = self
            .stack
            .len()
            .checked_sub(2)
            .and_then(|i| self.stack.get(i))
            .cloned();

        let is_heading = matches!(current.as_str(), "title" | "heading");
        self.blocks.push(Block {
            page: 1,
            kind: if is_heading {
                BlockKind::Heading
            } else {
                BlockKind::Paragraph
            },
            bbox: None,
            text: Some(text.to_string()),
        });

        if let Some(party) = self.party.as_mut() {
            match current.as_str() {
                "role" | "type" => party.role = Some(text.to_string()),
                _ => append(&mut party.name, text, " "),
            }
            return;
        }

        if let Some(clause) = self.clause.as_mut() {
            let is_own_heading = is_heading
                && parent
                    .as_deref()
                    .is_some_and(|p| matches!(p, "clause" | "section" | "article"));
            if is_own_heading && clause.heading.is_none() {
                clause.heading = Some(text.to_string());
            } else {
                append(&mut clause.text, text, "\n");
            }
            return;
        }

        match current.as_str() {
            "title" if self.record.title.is_none() => self.record.title = Some(text.to_string()),
            "documenttype" | "contracttype" => self.record.document_type = Some(text.to_string()),
            "effectivedate" | "startdate" | "commencementdate" => {
                self.record.effective_date = Some(text.to_string())
            }
            "expirationdate" | "enddate" | "terminationdate" => {
                self.record.expiration_date = Some(text.to_string())
            }
            "totalvalue" | "contractvalue" | "value" | "amount" => {
                match text.replace(',', "").parse::<f64>() {
                    Ok(amount) => {
                        self.record.total_value = Some(MonetaryAmount {
                            amount,
                            currency: self.amount_currency.clone(),
                        })
                    }
                    Err(_) => self.put_field(text),
                }
            }
            "currency" => {
                if let Some(value) = self.record.total_value.as_mut() {
                    value.currency = Some(text.to_string());
                } else {
                    self.amount_currency = Some(text.to_string());
                }
            }
            _ => self.put_field(text),
        }
    }

    fn put_field(&mut self, text: &str) {
        let path = self.stack.iter().skip(1).cloned().collect::<Vec<_>>().join(".");
        let key = if path.is_empty() {
            self.stack.join(".")
        } else {
            path
        };
        self.record
            .fields
            .insert(key, serde_json::Value::String(text.to_string()));
    }
}

fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '-' && *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

fn attribute(e: &BytesStart<'_>, names: &[&str]) -> Option<String> {
    e.attributes().flatten().find_map(|attr| {
        let key = normalize(&String::from_utf8_lossy(attr.key.local_name().as_ref()));
        names
            .contains(&key.as_str())
            .then(|| {
                let raw = String::from_utf8_lossy(&attr.value);
                quick_xml::escape::unescape(&raw)
                    .map(|v| v.trim().to_string())
                    .unwrap_or_else(|_| raw.trim().to_string())
            })
            .filter(|v| !v.is_empty())
    })
}

fn resolve_entity(name: &str) -> Result<String, ProcessError> {
    let resolved = match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        _ => name.strip_prefix('#').and_then(|code| {
            let value = match code.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => code.parse().ok()?,
            };
            char::from_u32(value)
        }),
    };
    resolved
        .map(String::from)
        .ok_or_else(|| ProcessError::XmlParsing(format!("Unknown entity &{};", name)))
}

fn append(target: &mut String, text: &str, separator: &str) {
    if !target.is_empty() {
        target.push_str(separator);
    }
    target.push_str(text);
}
