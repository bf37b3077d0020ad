//! Templated script builder for the sandboxed page surface.
//!
//! Injection is the host's only way to act inside the sandbox. Every
//! instruction is a self-contained IIFE that polls the DOM on an interval
//! with a bounded attempt budget, performs its action, and posts exactly
//! one terminal `process` outcome back through the bridge object (plus an
//! intermediate `submit` progress message for the combined fill+submit
//! instruction). Values interpolated into scripts are JSON-escaped, never
//! spliced raw.

use serde::{Deserialize, Serialize};

use super::flow::{ButtonFinder, DetailSpec, FormSteps, LookupSpec};

/// Attempt budgets and the shared poll interval for injected scripts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PollingSpec {
    pub interval_ms: u64,
    pub submit_max_attempts: u32,
    /// Result watch budget. Result dialogs usually appear within a few
    /// seconds; 80 polls at the default interval covers slow backends.
    pub result_max_attempts: u32,
    pub extract_max_attempts: u32,
    pub lookup_max_attempts: u32,
}

impl Default for PollingSpec {
    fn default() -> Self {
        Self {
            interval_ms: 1_000,
            submit_max_attempts: 20,
            result_max_attempts: 80,
            extract_max_attempts: 30,
            lookup_max_attempts: 30,
        }
    }
}

/// Builds the per-step scripts for one flow.
#[derive(Debug, Clone)]
pub struct ScriptInjector {
    bridge: String,
    polling: PollingSpec,
}

fn js_str(value: &str) -> String {
    // serde_json string encoding is valid JS string literal syntax.
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

fn js_str_array(values: &[String]) -> String {
    serde_json::to_string(values).unwrap_or_else(|_| "[]".to_string())
}

fn js_finder(finder: &ButtonFinder) -> String {
    format!(
        "{{css:{css},text:{text}}}",
        css = finder.css.as_deref().map(js_str).unwrap_or_else(|| "null".to_string()),
        text = finder.text.as_deref().map(js_str).unwrap_or_else(|| "null".to_string()),
    )
}

/// Shared helper preamble: `post(obj)`, `q(selectors)` (first matching
/// element), `findBtn({css,text})`, and `setVal(el, v)` that fires the
/// input/change events framework-bound forms listen for.
fn helpers(bridge: &str) -> String {
    format!(
        r#"var post=function(o){{try{{{bridge}.postMessage(JSON.stringify(o));}}catch(e){{}}}};
var q=function(sels){{for(var i=0;i<sels.length;i++){{var el=document.querySelector(sels[i]);if(el)return el;}}return null;}};
var findBtn=function(f){{if(f.css){{var el=document.querySelector(f.css);if(el)return el;}}if(f.text){{var btns=document.querySelectorAll('button, a, input[type="submit"]');for(var i=0;i<btns.length;i++){{var t=(btns[i].textContent||btns[i].value||'').trim().toLowerCase();if(t.indexOf(f.text)!==-1)return btns[i];}}}}return null;}};
var setVal=function(el,v){{el.focus();el.value=v;el.dispatchEvent(new Event('input',{{bubbles:true}}));el.dispatchEvent(new Event('change',{{bubbles:true}}));el.blur();}};"#
    )
}

impl ScriptInjector {
    pub fn new(bridge: impl Into<String>, polling: PollingSpec) -> Self {
        Self {
            bridge: bridge.into(),
            polling,
        }
    }

    /// Post-login helper: when a navigation lands inside the site but off
    /// the working page, steer the sandbox back to the flow's entry URL.
    pub fn auto_redirect(&self, site_root: &str, target_url: &str) -> String {
        let bridge = &self.bridge;
        format!(
            r#"(function(){{
{helpers}
var here=window.location.href;
var target={target};
if(here.indexOf({root})!==-1&&here.indexOf(target.split('?')[0])===-1){{
  post({{type:'autoRedirect',phase:'redirecting',url:here}});
  window.location.href=target;
}}
}})();true;"#,
            helpers = helpers(bridge),
            root = js_str(site_root),
            target = js_str(target_url),
        )
    }

    /// Combined fill+submit instruction. Fills the candidate value, clicks
    /// submit (posting an intermediate `submit` progress message), then
    /// watches the result containers and posts the terminal `result`
    /// outcome carrying the raw text. Classification happens host-side.
    pub fn fill_and_submit(&self, form: &FormSteps, candidate_value: &str) -> String {
        let bridge = &self.bridge;
        let opener = match &form.opener {
            Some(finder) => format!(
                "var opener=findBtn({});if(opener)opener.click();",
                js_finder(finder)
            ),
            None => String::new(),
        };
        format!(
            r#"(function(){{
{helpers}
var value={value};
var attempts=0;
{opener}
var fill=setInterval(function(){{
  attempts++;
  var input=q({inputs});
  if(input){{
    clearInterval(fill);
    setVal(input,value);
    var submit=findBtn({submit});
    if(!submit){{post({{type:'process',step:'submit',ok:false,candidate:value,reason:'submitNotFound'}});return;}}
    submit.click();
    post({{type:'process',step:'submit',ok:true,candidate:value}});
    var watched=0;
    var watch=setInterval(function(){{
      watched++;
      var box=q({results});
      var text=box?(box.textContent||'').trim():'';
      if(text){{
        clearInterval(watch);
        post({{type:'process',step:'result',ok:true,candidate:value,text:text}});
        var lower=text.toLowerCase();
        var btn=lower.indexOf('terdaftar')!==-1&&lower.indexOf('tidak dapat')===-1?findBtn({confirm_found}):findBtn({confirm_other});
        if(btn)btn.click();
      }}else if(watched>={result_max}){{
        clearInterval(watch);
        post({{type:'process',step:'result',ok:false,candidate:value,reason:'resultTimeout',attempts:watched}});
      }}
    }},{interval});
  }}else if(attempts>={submit_max}){{
    clearInterval(fill);
    post({{type:'process',step:'submit',ok:false,candidate:value,reason:'inputNotFound',attempts:attempts}});
  }}
}},{interval});
}})();true;"#,
            helpers = helpers(bridge),
            value = js_str(candidate_value),
            opener = opener,
            inputs = js_str_array(&form.input),
            submit = js_finder(&form.submit),
            results = js_str_array(&form.result_container),
            confirm_found = js_finder(&form.confirm_found),
            confirm_other = js_finder(&form.confirm_other),
            result_max = self.polling.result_max_attempts,
            submit_max = self.polling.submit_max_attempts,
            interval = self.polling.interval_ms,
        )
    }

    /// One-shot readiness probe for the detail page: samples after one
    /// poll interval and reports which of the key fields are present and
    /// populated. The host decides whether to extract, re-probe (each
    /// re-injection burns one unit of the host-side probe budget), or
    /// give up.
    pub fn detail_probe(&self, detail: &DetailSpec) -> String {
        let bridge = &self.bridge;
        format!(
            r#"(function(){{
{helpers}
setTimeout(function(){{
  var idEl=q({ids});
  var bdEl=q({birthdates});
  var nameEl=q({names});
  post({{
    type:'pageCheck',
    ready:!!(idEl&&idEl.value),
    hasPrimaryId:!!(idEl&&idEl.value),
    hasBirthdate:!!(bdEl&&bdEl.value),
    hasName:!!(nameEl&&nameEl.value),
    url:window.location.href
  }});
}},{interval});
}})();true;"#,
            helpers = helpers(bridge),
            ids = js_str_array(&detail.primary_id),
            birthdates = js_str_array(&detail.birthdate),
            names = js_str_array(&detail.name),
            interval = self.polling.interval_ms,
        )
    }

    /// Detail field extraction. Polls until the strong id or birthdate
    /// field carries a value, then posts the full field set. On budget
    /// exhaustion posts a failed outcome followed by an explicit `unlock`
    /// so the host releases the extract lock without waiting for
    /// staleness.
    pub fn detail_extract(&self, detail: &DetailSpec, candidate_value: &str) -> String {
        let bridge = &self.bridge;
        let grab = |sels: &[String]| format!("read({})", js_str_array(sels));
        format!(
            r#"(function(){{
{helpers}
var read=function(sels){{var el=q(sels);if(!el)return '';if(el.tagName==='SELECT'){{var o=el.options[el.selectedIndex];return o?(o.textContent||'').trim():'';}}return (el.value||el.textContent||'').trim();}};
var value={value};
var attempts=0;
var poll=setInterval(function(){{
  attempts++;
  var primaryId={primary_id};
  var birthdate={birthdate};
  if(primaryId||birthdate){{
    clearInterval(poll);
    post({{type:'process',step:'extract',ok:true,candidate:value,fields:{{
      primaryId:primaryId,
      name:{name},
      birthdate:birthdate,
      gender:{gender},
      maritalStatus:{marital},
      address:{address},
      postalCode:{postal},
      phone:{phone},
      taxId:{tax},
      email:{email}
    }},url:window.location.href}});
  }}else if(attempts>={max}){{
    clearInterval(poll);
    post({{type:'process',step:'extract',ok:false,candidate:value,reason:'fieldsNeverPopulated',attempts:attempts}});
    post({{type:'unlock',step:'extract'}});
  }}
}},{interval});
}})();true;"#,
            helpers = helpers(bridge),
            value = js_str(candidate_value),
            primary_id = grab(&detail.primary_id),
            birthdate = grab(&detail.birthdate),
            name = grab(&detail.name),
            gender = grab(&detail.gender),
            marital = grab(&detail.marital_status),
            address = grab(&detail.address),
            postal = grab(&detail.postal_code),
            phone = grab(&detail.phone),
            tax = grab(&detail.tax_id),
            email = grab(&detail.email),
            max = self.polling.extract_max_attempts,
            interval = self.polling.interval_ms,
        )
    }

    /// Fill the lookup page's identifier input.
    pub fn lookup_fill(&self, lookup: &LookupSpec, lookup_value: &str) -> String {
        let bridge = &self.bridge;
        format!(
            r#"(function(){{
{helpers}
var value={value};
var attempts=0;
var poll=setInterval(function(){{
  attempts++;
  var input=q({inputs});
  if(input){{
    clearInterval(poll);
    setVal(input,value);
    post({{type:'process',step:'lookupFill',ok:true,candidate:value}});
  }}else if(attempts>={max}){{
    clearInterval(poll);
    post({{type:'process',step:'lookupFill',ok:false,candidate:value,reason:'inputNotFound',attempts:attempts}});
  }}
}},{interval});
}})();true;"#,
            helpers = helpers(bridge),
            value = js_str(lookup_value),
            inputs = js_str_array(&lookup.input),
            max = self.polling.lookup_max_attempts,
            interval = self.polling.interval_ms,
        )
    }

    /// Click the lookup page's search control.
    pub fn lookup_submit(&self, lookup: &LookupSpec) -> String {
        let bridge = &self.bridge;
        format!(
            r#"(function(){{
{helpers}
var attempts=0;
var poll=setInterval(function(){{
  attempts++;
  var btn=findBtn({submit});
  if(btn){{
    clearInterval(poll);
    btn.click();
    post({{type:'process',step:'lookupSubmit',ok:true}});
  }}else if(attempts>={max}){{
    clearInterval(poll);
    post({{type:'process',step:'lookupSubmit',ok:false,reason:'submitNotFound',attempts:attempts}});
  }}
}},{interval});
}})();true;"#,
            helpers = helpers(bridge),
            submit = js_finder(&lookup.submit),
            max = self.polling.lookup_max_attempts,
            interval = self.polling.interval_ms,
        )
    }

    /// Watch the lookup result: a populated name element means registered
    /// (locality/region read from the marker paragraph's emphasis
    /// elements); the not-registered phrase anywhere on the page is the
    /// negative terminal.
    pub fn lookup_extract(&self, lookup: &LookupSpec, lookup_value: &str) -> String {
        let bridge = &self.bridge;
        format!(
            r#"(function(){{
{helpers}
var value={value};
var attempts=0;
var poll=setInterval(function(){{
  attempts++;
  var body=(document.body.textContent||'').toLowerCase();
  var nameEl=document.querySelector({result_name});
  var name=nameEl?(nameEl.textContent||'').trim():'';
  if(name){{
    clearInterval(poll);
    var locality='',region='';
    var paras=document.querySelectorAll('p');
    for(var i=0;i<paras.length;i++){{
      if((paras[i].textContent||'').toLowerCase().indexOf({marker})!==-1){{
        var ems=paras[i].querySelectorAll('b, strong, u');
        if(ems.length>0)locality=(ems[0].textContent||'').trim();
        if(ems.length>1)region=(ems[1].textContent||'').trim();
        break;
      }}
    }}
    post({{type:'process',step:'lookupResult',ok:true,candidate:value,name:name,locality:locality,region:region}});
  }}else if(body.indexOf({not_registered})!==-1){{
    clearInterval(poll);
    post({{type:'process',step:'lookupResult',ok:false,candidate:value,reason:'notRegistered'}});
  }}else if(attempts>={max}){{
    clearInterval(poll);
    post({{type:'process',step:'lookupResult',ok:false,candidate:value,reason:'lookupTimeout',attempts:attempts}});
  }}
}},{interval});
}})();true;"#,
            helpers = helpers(bridge),
            value = js_str(lookup_value),
            result_name = js_str(&lookup.result_name),
            marker = js_str(&lookup.locality_marker),
            not_registered = js_str(&lookup.not_registered),
            max = self.polling.lookup_max_attempts,
            interval = self.polling.interval_ms,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::flow::FlowConfig;

    fn injector() -> ScriptInjector {
        ScriptInjector::new("window.__host", PollingSpec::default())
    }

    #[test]
    fn fill_and_submit_escapes_the_candidate_value() {
        let flow = FlowConfig::registration_check();
        let script = injector().fill_and_submit(&flow.form, "24\"09'000123");
        assert!(script.contains(r#""24\"09'000123""#));
        assert!(script.contains("window.__host.postMessage"));
        assert!(script.contains("'result'"));
        assert!(script.ends_with("true;"));
    }

    #[test]
    fn extract_script_posts_unlock_on_budget_exhaustion() {
        let flow = FlowConfig::registration_check();
        let detail = flow.detail.as_ref().unwrap();
        let script = injector().detail_extract(detail, "2409000123");
        assert!(script.contains("type:'unlock',step:'extract'"));
        assert!(script.contains("fieldsNeverPopulated"));
        assert!(script.contains(">=30"));
    }

    #[test]
    fn probe_script_reports_field_presence() {
        let flow = FlowConfig::registration_check();
        let detail = flow.detail.as_ref().unwrap();
        let script = injector().detail_probe(detail);
        assert!(script.contains("'pageCheck'"));
        assert!(script.contains("hasPrimaryId"));
        assert!(script.contains("hasBirthdate"));
    }

    #[test]
    fn lookup_scripts_carry_flow_markers() {
        let flow = FlowConfig::registration_check_with_validation();
        let lookup = flow.secondary.as_ref().unwrap();
        let script = injector().lookup_extract(lookup, "3173000000000001");
        assert!(script.contains("data anda belum terdaftar"));
        assert!(script.contains("anda telah terdaftar"));
        assert!(script.contains("'lookupResult'"));
    }

    #[test]
    fn polling_budgets_are_configurable() {
        let polling = PollingSpec {
            interval_ms: 250,
            submit_max_attempts: 5,
            ..PollingSpec::default()
        };
        let flow = FlowConfig::registration_check();
        let script =
            ScriptInjector::new("window.__host", polling).fill_and_submit(&flow.form, "X");
        assert!(script.contains(">=5"));
        assert!(script.contains(",250);"));
    }
}
