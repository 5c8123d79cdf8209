use super::{Document, StoreError};
use serde_json::Value;

/// Identity field every document is keyed by.
pub const ID_FIELD: &str = "id";

/// Conjunction of exact-match field predicates.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Filter {
    fields: Vec<(String, Value)>,
}

impl Filter {
    /// Matches every document.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by_id(id: impl Into<Value>) -> Self {
        Self::new().eq(ID_FIELD, id)
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.push((field.into(), value.into()));
        self
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.fields
            .iter()
            .all(|(field, expected)| doc.get(field) == Some(expected))
    }
}

/// Mutation applied to a single document by `update_one`.
#[derive(Clone, Debug, PartialEq)]
pub enum Update {
    /// Merge these fields over the document.
    SetFields(Document),
    /// Append `value` to the array at `field` unless already present.
    AddToSet { field: String, value: Value },
    /// Remove every occurrence of `value` from the array at `field`.
    Pull { field: String, value: Value },
}

impl Update {
    /// Convenience for a single-field `SetFields`.
    pub fn set(field: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut fields = Document::new();
        fields.insert(field.into(), value.into());
        Update::SetFields(fields)
    }

    pub fn add_to_set(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Update::AddToSet { field: field.into(), value: value.into() }
    }

    pub fn pull(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Update::Pull { field: field.into(), value: value.into() }
    }

    /// Apply to `doc`. On error the document is left untouched.
    pub(crate) fn apply(&self, doc: &mut Document) -> Result<(), StoreError> {
        match self {
            Update::SetFields(fields) => {
                for (key, value) in fields {
                    if key == ID_FIELD {
                        continue;
                    }
                    doc.insert(key.clone(), value.clone());
                }
                Ok(())
            }
            Update::AddToSet { field, value } => {
                let entry = doc
                    .entry(field.clone())
                    .or_insert_with(|| Value::Array(Vec::new()));
                let Value::Array(items) = entry else {
                    return Err(StoreError::NotAnArray(field.clone()));
                };
                if !items.contains(value) {
                    items.push(value.clone());
                }
                Ok(())
            }
            Update::Pull { field, value } => match doc.get_mut(field) {
                None => Ok(()),
                Some(Value::Array(items)) => {
                    items.retain(|item| item != value);
                    Ok(())
                }
                Some(_) => Err(StoreError::NotAnArray(field.clone())),
            },
        }
    }
}
