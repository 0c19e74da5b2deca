use serde_json::Value;

use super::model::{FieldMapping, Record};

pub const DEFAULT_CONTACT_KEY: &str = "phone_number";
pub const DEFAULT_CONTACT_FALLBACKS: &[&str] = &["phone_number", "phone"];

/// Why a source record produced no destination record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    MissingContactKey,
}

/// Turns source records into destination records using a job's mapping table.
#[derive(Debug, Clone)]
pub struct FieldMapper {
    contact_key: String,
    contact_fallbacks: Vec<String>,
}

impl Default for FieldMapper {
    fn default() -> Self {
        Self::new(
            DEFAULT_CONTACT_KEY,
            DEFAULT_CONTACT_FALLBACKS.iter().map(|s| s.to_string()).collect(),
        )
    }
}

impl FieldMapper {
    pub fn new(contact_key: impl Into<String>, contact_fallbacks: Vec<String>) -> Self {
        Self {
            contact_key: contact_key.into(),
            contact_fallbacks,
        }
    }

    pub fn contact_key(&self) -> &str {
        &self.contact_key
    }

    /// Maps one record. Rejects it when no non-empty contact value can be found
    /// through the mapping or the fallback source fields.
    pub fn map(&self, source: &Record, mappings: &[FieldMapping]) -> Result<Record, Rejection> {
        let mut out = Record::new();

        for mapping in mappings {
            if mapping.destination_field == self.contact_key {
                continue;
            }
            if let Some(value) = lookup(source, &mapping.source_field) {
                out.insert(mapping.destination_field.clone(), value.clone());
            }
        }

        let mapped_contact = mappings
            .iter()
            .filter(|m| m.destination_field == self.contact_key)
            .map(|m| m.source_field.as_str());
        let contact = mapped_contact
            .chain(self.contact_fallbacks.iter().map(String::as_str))
            .find_map(|field| lookup(source, field).and_then(contact_value))
            .ok_or(Rejection::MissingContactKey)?;

        out.insert(self.contact_key.clone(), Value::String(contact));
        Ok(out)
    }

    /// Maps a batch, returning accepted records and the number rejected.
    pub fn map_all(&self, records: &[Record], mappings: &[FieldMapping]) -> (Vec<Record>, usize) {
        let mut valid = Vec::with_capacity(records.len());
        let mut rejected = 0;
        for record in records {
            match self.map(record, mappings) {
                Ok(mapped) => valid.push(mapped),
                Err(_) => rejected += 1,
            }
        }
        (valid, rejected)
    }
}

/// Resolves a possibly dotted field path (`properties.first_name`).
fn lookup<'a>(record: &'a Record, path: &str) -> Option<&'a Value> {
    if let Some(v) = record.get(path) {
        return Some(v);
    }
    let mut parts = path.split('.');
    let mut current = record.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

fn contact_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
