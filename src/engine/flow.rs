//! Flow configurations: the site-specific glue for one automation flow.
//!
//! The engine is generic; everything a third-party site contributes
//! (URLs, selectors, outcome phrases, which phases exist, how outcomes
//! are persisted) lives here as data. Three built-in configurations
//! cover the historical flows: registration check, registry validation,
//! and eligibility check.

use serde::{Deserialize, Serialize};

use crate::domain::classification::PhraseRules;

use super::bus::normalize_url;

/// Recognizes a page by its normalized URL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlMatcher {
    #[serde(default)]
    pub contains: Vec<String>,
    #[serde(default)]
    pub ends_with: Vec<String>,
}

impl UrlMatcher {
    pub fn matches(&self, url: &str) -> bool {
        let normalized = normalize_url(url);
        // Ignore the cache-buster query when matching page identity.
        let path = normalized.split('?').next().unwrap_or(&normalized);
        self.contains.iter().any(|c| path.contains(c.as_str()))
            || self.ends_with.iter().any(|s| path.ends_with(s.as_str()))
    }
}

/// Locates a clickable control: CSS selector first, visible text as a
/// fallback (sites swap classes more often than labels).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonFinder {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub css: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl ButtonFinder {
    pub fn css(css: &str) -> Self {
        Self {
            css: Some(css.to_string()),
            text: None,
        }
    }

    pub fn labeled(css: &str, text: &str) -> Self {
        Self {
            css: Some(css.to_string()),
            text: Some(text.to_string()),
        }
    }
}

/// The fill+submit step and its result watch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormSteps {
    /// Optional control clicked before filling (e.g. a section opener).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opener: Option<ButtonFinder>,
    /// Candidate id input, first match wins.
    pub input: Vec<String>,
    /// Submit control.
    pub submit: ButtonFinder,
    /// Containers whose text carries the outcome.
    pub result_container: Vec<String>,
    /// Dismissal control when the outcome confirms a registration
    /// (proceeds to the detail page).
    pub confirm_found: ButtonFinder,
    /// Dismissal control for every other outcome.
    pub confirm_other: ButtonFinder,
}

/// Detail page field selectors for the extraction phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailSpec {
    pub primary_id: Vec<String>,
    pub name: Vec<String>,
    pub birthdate: Vec<String>,
    #[serde(default)]
    pub gender: Vec<String>,
    /// `<select>` whose chosen option text is captured.
    #[serde(default)]
    pub marital_status: Vec<String>,
    #[serde(default)]
    pub address: Vec<String>,
    #[serde(default)]
    pub postal_code: Vec<String>,
    #[serde(default)]
    pub phone: Vec<String>,
    #[serde(default)]
    pub tax_id: Vec<String>,
    #[serde(default)]
    pub email: Vec<String>,
}

/// The secondary registry lookup page (richest flow only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupSpec {
    pub start_url: String,
    pub page: UrlMatcher,
    /// Identifier input on the lookup page.
    pub input: Vec<String>,
    pub submit: ButtonFinder,
    /// Element carrying the registered name on success.
    pub result_name: String,
    /// Phrase marking the locality/region paragraph.
    pub locality_marker: String,
    /// Phrase proving the identifier is not registered.
    pub not_registered: String,
}

/// How terminal classifications reach the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PersistMode {
    /// Primary flow: create a record when a candidate is found and its
    /// detail extraction succeeds.
    CreateOnFound,
    /// Validation flow over store-sourced candidates: enrich the backing
    /// record when the registry confirms it, delete it otherwise.
    UpdateOrDelete,
    /// Eligibility flow: flip a per-record flag true/false; never delete.
    UpdateFlag,
}

/// Complete configuration of one automation flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowConfig {
    pub name: String,
    /// Page the batch loop (re-)enters between candidates.
    pub start_url: String,
    /// Domain root used by the post-login auto redirect.
    pub site_root: String,
    pub form_page: UrlMatcher,
    /// Detail page recognition; `None` disables the extraction phase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail_page: Option<UrlMatcher>,
    pub form: FormSteps,
    pub phrases: PhraseRules,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<DetailSpec>,
    /// Inline secondary lookup; present only in the richest flow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary: Option<LookupSpec>,
    pub persist: PersistMode,
    /// Inject the post-login redirect helper when a navigation lands
    /// inside the site but off the form page.
    #[serde(default)]
    pub auto_redirect: bool,
}

impl FlowConfig {
    pub fn has_detail_phase(&self) -> bool {
        self.detail.is_some() && self.detail_page.is_some()
    }

    /// Primary flow: check each generated identifier against the
    /// membership form, extract the profile of every registered one,
    /// and create a store record per hit.
    pub fn registration_check() -> Self {
        Self {
            name: "registration-check".to_string(),
            start_url: "https://sipp.bpjsketenagakerjaan.go.id/tenaga-kerja/baru/form-tambah-tk-individu".to_string(),
            site_root: "sipp.bpjsketenagakerjaan.go.id".to_string(),
            form_page: UrlMatcher {
                contains: vec!["/form-tambah/kpj".to_string(), "/form-tambah-tk-individu".to_string()],
                ends_with: vec!["/kpj".to_string()],
            },
            detail_page: Some(UrlMatcher {
                contains: vec!["/form-tambah/".to_string(), "/edit".to_string(), "/profile".to_string(), "/data".to_string()],
                ends_with: vec![],
            }),
            form: FormSteps {
                opener: Some(ButtonFinder::labeled("button[href=\"#collapseTwo\"]", "sudah")),
                input: vec!["input#kpj".to_string(), "input[name=\"kpj\"]".to_string()],
                submit: ButtonFinder::labeled("button.btn.btn-primary.btn-bordered.waves-effect.w-md", "lanjut"),
                result_container: vec![".swal2-content".to_string()],
                confirm_found: ButtonFinder::labeled("button.swal2-confirm.btn.btn-success", "lanjutkan"),
                confirm_other: ButtonFinder::labeled("button.swal2-confirm", "ok"),
            },
            phrases: PhraseRules::new(
                vec!["sudah tidak dapat digunakan".to_string()],
                vec!["terdaftar sebagai peserta bpjs ketenagakerjaan".to_string()],
            ),
            detail: Some(DetailSpec {
                primary_id: vec![
                    "#no_identitas".to_string(),
                    "input[name=\"no_identitas\"]".to_string(),
                    "#nik".to_string(),
                    "input[name=\"nik\"]".to_string(),
                    "input[name=\"no_identitas_peserta\"]".to_string(),
                ],
                name: vec!["#nama_lengkap".to_string(), "input[name=\"nama_lengkap\"]".to_string()],
                birthdate: vec![
                    "#tgl_lahir".to_string(),
                    "input[name=\"tgl_lahir\"]".to_string(),
                    "#birthdate".to_string(),
                    "input[name=\"birthdate\"]".to_string(),
                ],
                gender: vec!["#jenis_kelamin".to_string(), "input[name=\"jenis_kelamin\"]".to_string()],
                marital_status: vec!["#status_kawin".to_string(), "select[name=\"status_kawin\"]".to_string()],
                address: vec!["#alamat".to_string(), "input[name=\"alamat\"]".to_string()],
                postal_code: vec!["#kode_pos".to_string(), "input[name=\"kode_pos\"]".to_string()],
                phone: vec!["#no_handphone".to_string(), "input[name=\"no_handphone\"]".to_string()],
                tax_id: vec!["#npwp".to_string(), "input[name=\"npwp\"]".to_string()],
                email: vec!["#email".to_string(), "input[name=\"email\"]".to_string()],
            }),
            secondary: None,
            persist: PersistMode::CreateOnFound,
            auto_redirect: true,
        }
    }

    /// The richest variant: registration check plus an inline lookup
    /// against the electoral registry that enriches or invalidates the
    /// record created moments earlier.
    pub fn registration_check_with_validation() -> Self {
        let mut flow = Self::registration_check();
        flow.name = "registration-check-validated".to_string();
        flow.secondary = Some(Self::electoral_registry_lookup());
        flow
    }

    /// Validation flow: candidates come from store records whose
    /// validation flag is still false; the registry either confirms them
    /// (enrich with canonical name and region) or proves them spurious
    /// (delete).
    pub fn registry_validation() -> Self {
        Self {
            name: "registry-validation".to_string(),
            start_url: "https://cekdptonline.kpu.go.id/".to_string(),
            site_root: "cekdptonline.kpu.go.id".to_string(),
            form_page: UrlMatcher {
                contains: vec!["cekdptonline.kpu.go.id".to_string()],
                ends_with: vec![],
            },
            detail_page: None,
            form: FormSteps {
                opener: None,
                input: vec!["input#__BVID__20".to_string()],
                submit: ButtonFinder {
                    css: None,
                    text: Some("pencarian".to_string()),
                },
                result_container: vec!["h2.mb-2 b".to_string()],
                confirm_found: ButtonFinder::default(),
                confirm_other: ButtonFinder::default(),
            },
            phrases: PhraseRules::new(
                vec![],
                vec!["anda telah terdaftar".to_string()],
            ),
            detail: None,
            // Lookup-driven: candidates come from the store and walk the
            // lookup chain directly, there is no primary form step.
            secondary: Some(Self::electoral_registry_lookup()),
            persist: PersistMode::UpdateOrDelete,
            auto_redirect: false,
        }
    }

    /// Eligibility flow: submits the candidate's identifier to the claims
    /// portal and records whether the consent wording appears. Updates
    /// the record's flag, never deletes.
    pub fn eligibility_check() -> Self {
        Self {
            name: "eligibility-check".to_string(),
            start_url: "https://lapakasik.bpjsketenagakerjaan.go.id/".to_string(),
            site_root: "lapakasik.bpjsketenagakerjaan.go.id".to_string(),
            form_page: UrlMatcher {
                contains: vec!["lapakasik.bpjsketenagakerjaan.go.id".to_string()],
                ends_with: vec![],
            },
            detail_page: None,
            form: FormSteps {
                opener: Some(ButtonFinder::css("#btn-close-popup-banner")),
                input: vec!["input.form-control[placeholder=\"Isi Nomor E-KTP\"]".to_string()],
                submit: ButtonFinder {
                    css: Some("button.swal2-confirm.swal2-styled".to_string()),
                    text: Some("ok".to_string()),
                },
                result_container: vec!["body".to_string()],
                confirm_found: ButtonFinder::default(),
                confirm_other: ButtonFinder::default(),
            },
            // A visible captcha challenge blocks the whole flow for this
            // candidate; it maps to the unusable category so the flag is
            // written false with a reason instead of left dangling.
            phrases: PhraseRules::new(
                vec!["recaptcha".to_string()],
                vec!["bersedia".to_string()],
            ),
            detail: None,
            secondary: None,
            persist: PersistMode::UpdateFlag,
            auto_redirect: false,
        }
    }

    fn electoral_registry_lookup() -> LookupSpec {
        LookupSpec {
            start_url: "https://cekdptonline.kpu.go.id/".to_string(),
            page: UrlMatcher {
                contains: vec!["cekdptonline.kpu.go.id".to_string()],
                ends_with: vec![],
            },
            input: vec!["input#__BVID__20".to_string()],
            submit: ButtonFinder {
                css: None,
                text: Some("pencarian".to_string()),
            },
            result_name: "h2.mb-2 b".to_string(),
            locality_marker: "anda telah terdaftar".to_string(),
            not_registered: "data anda belum terdaftar".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn form_page_matcher_recognizes_cache_busted_urls() {
        let flow = FlowConfig::registration_check();
        assert!(flow.form_page.matches(
            "https://sipp.bpjsketenagakerjaan.go.id/tenaga-kerja/baru/form-tambah-tk-individu"
        ));
        assert!(flow.form_page.matches(
            "https://sipp.bpjsketenagakerjaan.go.id/tenaga-kerja/baru/form-tambah-tk-individu?t=1712000000"
        ));
        assert!(flow
            .form_page
            .matches("https://sipp.bpjsketenagakerjaan.go.id/tenaga-kerja/baru/form-tambah/kpj/"));
        assert!(!flow.form_page.matches("https://sipp.bpjsketenagakerjaan.go.id/"));
    }

    #[test]
    fn detail_page_excludes_nothing_it_should_match() {
        let flow = FlowConfig::registration_check();
        let detail = flow.detail_page.as_ref().unwrap();
        assert!(detail.matches("https://sipp.bpjsketenagakerjaan.go.id/tenaga-kerja/baru/form-tambah/data-pribadi"));
        assert!(!detail.matches("https://sipp.bpjsketenagakerjaan.go.id/login"));
    }

    #[test]
    fn richest_flow_enables_the_secondary_lookup() {
        let base = FlowConfig::registration_check();
        assert!(base.secondary.is_none());
        let rich = FlowConfig::registration_check_with_validation();
        assert!(rich.secondary.is_some());
        assert!(rich.has_detail_phase());
    }

    #[test]
    fn validation_flow_is_lookup_driven() {
        let flow = FlowConfig::registry_validation();
        assert!(!flow.has_detail_phase());
        assert_eq!(flow.persist, PersistMode::UpdateOrDelete);
        assert!(flow.secondary.is_some());
    }
}
