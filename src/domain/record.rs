//! Persisted record vocabulary: ids, extracted field sets, and patches.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Store-assigned identity of a persisted record. Ownership of the id is
/// exclusive to the session that created it until the candidate's terminal
/// outcome; afterwards it is only touched by downstream flows that looked
/// it up through a store query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub String);

impl RecordId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RecordId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Fields extracted from a detail page for a found candidate.
///
/// `primary_id` is the strong identifying field (e.g. a national id
/// number); extraction is accepted only when it or a birthdate-shaped
/// field is present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedFields {
    #[serde(default)]
    pub primary_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub birthdate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marital_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tax_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl ExtractedFields {
    /// Extraction is usable when the strong id looks like a real number
    /// or the birthdate field carried something date-shaped.
    pub fn is_usable(&self) -> bool {
        let digits: String = self.primary_id.chars().filter(char::is_ascii_digit).collect();
        digits.len() >= 8 || self.birthdate.len() >= 4
    }
}

/// Partial update applied to an existing record by a later enrichment
/// phase. Only present fields are written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Source attribution for an authoritative name (e.g. the registry
    /// that confirmed it).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name_source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locality: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validated: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eligible: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl RecordPatch {
    pub fn validated(name: String, locality: String, region: String) -> Self {
        Self {
            name: Some(name),
            name_source: Some("registry".to_string()),
            locality: Some(locality),
            region: Some(region),
            validated: Some(true),
            ..Self::default()
        }
    }

    pub fn eligibility(eligible: bool, reason: Option<String>) -> Self {
        Self {
            eligible: Some(eligible),
            reason,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usable_extraction_requires_id_or_birthdate() {
        let mut fields = ExtractedFields::default();
        assert!(!fields.is_usable());

        fields.primary_id = "3173-0000-0000-001".to_string();
        assert!(fields.is_usable(), "12 digits spread across separators");

        let by_birthdate = ExtractedFields {
            birthdate: "1990".to_string(),
            ..ExtractedFields::default()
        };
        assert!(by_birthdate.is_usable());

        let too_short = ExtractedFields {
            primary_id: "123".to_string(),
            ..ExtractedFields::default()
        };
        assert!(!too_short.is_usable());
    }

    #[test]
    fn patch_serializes_only_present_fields() {
        let patch = RecordPatch::eligibility(false, Some("recaptcha".to_string()));
        let json = serde_json::to_value(&patch).unwrap();
        assert_eq!(json["eligible"], serde_json::json!(false));
        assert_eq!(json["reason"], serde_json::json!("recaptcha"));
        assert!(json.get("validated").is_none());
        assert!(json.get("name").is_none());
    }
}
