//! Batch candidates: the identifiers a run iterates over.

use serde::{Deserialize, Serialize};

use super::record::RecordId;

/// One identifier drawn from the batch list, processed to a terminal
/// classification. The list is loaded once at session start and never
/// mutated or re-ordered by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateItem {
    /// Opaque string identifier, e.g. a structured numeric code.
    pub id: String,

    /// Known display name, used later for form filling when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Secondary identifier (e.g. a national id number) used by lookup
    /// oriented flows.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary_id: Option<String>,

    /// Back-reference to an already-persisted record, set when the
    /// candidate list was sourced from the store (validation runs).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_ref: Option<RecordId>,
}

impl CandidateItem {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            secondary_id: None,
            record_ref: None,
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_secondary_id(mut self, secondary_id: impl Into<String>) -> Self {
        self.secondary_id = Some(secondary_id.into());
        self
    }

    #[must_use]
    pub fn with_record_ref(mut self, record_ref: RecordId) -> Self {
        self.record_ref = Some(record_ref);
        self
    }

    /// The value a lookup flow submits: the secondary id when known,
    /// otherwise the primary id.
    pub fn lookup_value(&self) -> &str {
        self.secondary_id.as_deref().unwrap_or(&self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_value_prefers_secondary_id() {
        let plain = CandidateItem::new("2409000123");
        assert_eq!(plain.lookup_value(), "2409000123");

        let with_nik = CandidateItem::new("2409000123").with_secondary_id("317300000000001");
        assert_eq!(with_nik.lookup_value(), "317300000000001");
    }
}
