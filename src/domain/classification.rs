//! Terminal outcome classification for a processed candidate.
//!
//! The result page text is matched against two known phrase categories;
//! anything that matches neither is conservatively treated as not-found.

use serde::{Deserialize, Serialize};

/// Terminal outcome assigned to a candidate by the primary result step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Classification {
    /// The candidate matched an existing registration; detail extraction
    /// (and optionally a secondary lookup) follows.
    Found,
    /// The result text matched no known category, or explicitly reported
    /// no registration.
    NotFound,
    /// The identifier is permanently unusable; terminal, never persisted.
    CannotUse,
}

impl Classification {
    pub fn is_found(self) -> bool {
        matches!(self, Classification::Found)
    }
}

/// Phrase categories recognized in result text, per flow.
///
/// Matching is case-insensitive substring containment; the phrases are
/// site-specific glue carried as configuration data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhraseRules {
    /// Phrases marking the identifier as permanently unusable.
    pub cannot_use: Vec<String>,
    /// Phrases confirming an existing registration.
    pub registered: Vec<String>,
}

impl PhraseRules {
    pub fn new(cannot_use: Vec<String>, registered: Vec<String>) -> Self {
        Self {
            cannot_use,
            registered,
        }
    }

    /// Classify result text. Cannot-use phrases win over registered
    /// phrases; unknown text is NotFound.
    pub fn classify(&self, text: &str) -> Classification {
        let low = text.to_lowercase();
        if self.cannot_use.iter().any(|p| low.contains(p.as_str())) {
            return Classification::CannotUse;
        }
        if self.registered.iter().any(|p| low.contains(p.as_str())) {
            return Classification::Found;
        }
        Classification::NotFound
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> PhraseRules {
        PhraseRules::new(
            vec!["sudah tidak dapat digunakan".into()],
            vec!["terdaftar sebagai peserta".into()],
        )
    }

    #[test]
    fn classifies_registered_text_as_found() {
        let c = rules().classify("Nomor Terdaftar Sebagai Peserta aktif");
        assert_eq!(c, Classification::Found);
    }

    #[test]
    fn classifies_cannot_use_text() {
        let c = rules().classify("Nomor ini sudah tidak dapat digunakan.");
        assert_eq!(c, Classification::CannotUse);
    }

    #[test]
    fn cannot_use_wins_when_both_match() {
        let c = rules().classify("terdaftar sebagai peserta, sudah tidak dapat digunakan");
        assert_eq!(c, Classification::CannotUse);
    }

    #[test]
    fn ambiguous_text_degrades_to_not_found() {
        assert_eq!(rules().classify("server sedang sibuk"), Classification::NotFound);
        assert_eq!(rules().classify(""), Classification::NotFound);
    }
}
