//! Risk classification for imported symbols and structured configs.
//!
//! The policy is table driven and independent of scan order. For a symbol
//! reference the first match wins, checked in this order:
//!
//!   - deny rules, highest severity first (CRITICAL, then HIGH, then any
//!     MEDIUM entries a custom table declares)
//!   - the data-only allowlist            → SAFE
//!   - anything else                      → MEDIUM (unknown global)
//!
//! An unknown symbol is not assumed harmless: a crafted class registry can
//! map any name onto something dangerous.

use serde_json::Value;

use crate::rules::catalog::{
    RULE_ALLOWLISTED, RULE_UNKNOWN_GLOBAL, RuleSet, Severity, table_contains, table_lists,
};
use crate::rules::eval::{StructuralMatch, Verdict};
use crate::symbols::model::SymbolReference;

/// Classify one imported symbol.
pub fn classify(rules: &RuleSet, reference: &SymbolReference) -> Verdict {
    let module = reference.module.as_str();
    let name = reference.qualified_name.as_str();

    let verdict = rules
        .deny
        .iter()
        .find(|rule| table_contains(&rule.symbols, module, name))
        .map(|rule| Verdict::new(rule.id.clone(), rule.severity, &rule.title, &rule.reason))
        .unwrap_or_else(|| {
            if table_lists(&rules.allow, module, name) {
                Verdict::new(RULE_ALLOWLISTED, Severity::Safe, "Allowlisted", "data-only constructor")
            } else {
                Verdict::new(
                    RULE_UNKNOWN_GLOBAL,
                    Severity::Medium,
                    "Unknown global",
                    "unknown global: symbol is outside the data-only allowlist and may resolve to arbitrary code",
                )
            }
        });

    escalate(rules, reference, verdict)
}

/// Apply the invocation knob. Only ever raises severity.
fn escalate(rules: &RuleSet, reference: &SymbolReference, mut verdict: Verdict) -> Verdict {
    if rules.escalate_invoked && reference.invoked && verdict.severity == Severity::Medium {
        verdict.severity = Severity::High;
        verdict.reason.push_str(" (invoked with stream-supplied arguments)");
    }
    verdict
}

/// Walk a decoded config document and report every object whose field
/// matches a structural rule. Matches are returned in document order.
pub fn classify_structure(rules: &RuleSet, document: &Value) -> Vec<StructuralMatch> {
    let mut matches = Vec::new();
    if !rules.structural.is_empty() {
        walk(rules, document, String::new(), &mut matches);
    }
    matches
}

fn walk(rules: &RuleSet, value: &Value, path: String, out: &mut Vec<StructuralMatch>) {
    match value {
        Value::Object(map) => {
            for rule in &rules.structural {
                if let Some(Value::String(found)) = map.get(&rule.field) {
                    if rule.values.iter().any(|v| v == found) {
                        out.push(StructuralMatch {
                            verdict: Verdict::new(
                                rule.id.clone(),
                                rule.severity,
                                &rule.title,
                                &rule.reason,
                            ),
                            path: if path.is_empty() { "/".into() } else { path.clone() },
                            field: rule.field.clone(),
                            value: found.clone(),
                        });
                    }
                }
            }
            for (key, child) in map {
                walk(rules, child, format!("{path}/{}", escape_pointer(key)), out);
            }
        }
        Value::Array(items) => {
            for (i, child) in items.iter().enumerate() {
                walk(rules, child, format!("{path}/{i}"), out);
            }
        }
        // Keras stores nested configs as JSON text inside string attributes.
        Value::String(text) if text.trim_start().starts_with('{') => {
            if let Ok(inner) = serde_json::from_str::<Value>(text) {
                walk(rules, &inner, path, out);
            }
        }
        _ => {}
    }
}

fn escape_pointer(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rules() -> RuleSet {
        RuleSet::builtin().unwrap()
    }

    fn sym(module: &str, name: &str) -> SymbolReference {
        SymbolReference::new(module, name, 0, "GLOBAL")
    }

    #[test]
    fn process_execution_is_critical() {
        let v = classify(&rules(), &sym("os", "system"));
        assert_eq!(v.severity, Severity::Critical);
        assert!(v.reason.contains("process execution"));

        let v = classify(&rules(), &sym("subprocess", "Popen"));
        assert_eq!(v.severity, Severity::Critical);

        let v = classify(&rules(), &sym("posix", "system"));
        assert_eq!(v.severity, Severity::Critical);
    }

    #[test]
    fn eval_is_critical() {
        let v = classify(&rules(), &sym("builtins", "eval"));
        assert_eq!(v.severity, Severity::Critical);
        assert_eq!(v.rule_id.as_str(), "R-EVAL-01");
    }

    #[test]
    fn network_access_is_high() {
        let v = classify(&rules(), &sym("webbrowser", "open"));
        assert_eq!(v.severity, Severity::High);
        assert_eq!(v.rule_id.as_str(), "R-NET-01");

        let v = classify(&rules(), &sym("socket", "create_connection"));
        assert_eq!(v.severity, Severity::High);
    }

    #[test]
    fn allowlisted_tensor_constructors_are_safe() {
        for (m, n) in [
            ("torch._utils", "_rebuild_tensor_v2"),
            ("collections", "OrderedDict"),
            ("torch", "FloatStorage"),
            ("numpy.core.multiarray", "_reconstruct"),
        ] {
            let v = classify(&rules(), &sym(m, n));
            assert!(v.is_safe(), "{m}.{n} should be safe, got {v:?}");
        }
    }

    #[test]
    fn attribute_walk_from_allowlisted_symbol_is_not_safe() {
        for (m, n) in [
            ("torch._utils", "_rebuild_tensor.__globals__"),
            ("builtins", "str.format"),
            ("collections", "OrderedDict.__init__.__globals__"),
        ] {
            let v = classify(&rules(), &sym(m, n));
            assert_eq!(v.severity, Severity::Medium, "{m}.{n}");
            assert_eq!(v.rule_id.as_str(), RULE_UNKNOWN_GLOBAL);
        }
    }

    #[test]
    fn unknown_symbol_is_medium() {
        let v = classify(&rules(), &sym("builtins", "print"));
        assert_eq!(v.severity, Severity::Medium);
        assert_eq!(v.rule_id.as_str(), RULE_UNKNOWN_GLOBAL);

        let v = classify(&rules(), &sym("__main__", "MyModel"));
        assert_eq!(v.severity, Severity::Medium);
    }

    #[test]
    fn deny_wins_over_allow_for_same_module() {
        // builtins has entries in both tables.
        assert!(classify(&rules(), &sym("builtins", "dict")).is_safe());
        assert_eq!(
            classify(&rules(), &sym("builtins", "exec")).severity,
            Severity::Critical
        );
    }

    #[test]
    fn classification_is_deterministic() {
        let r = rules();
        let s = sym("os", "popen");
        assert_eq!(classify(&r, &s), classify(&r, &s));
    }

    #[test]
    fn escalation_knob_raises_invoked_medium_only() {
        let mut r = rules();
        r.escalate_invoked = true;

        let mut invoked = sym("builtins", "print");
        invoked.invoked = true;
        assert_eq!(classify(&r, &invoked).severity, Severity::High);

        let idle = sym("builtins", "print");
        assert_eq!(classify(&r, &idle).severity, Severity::Medium);

        let mut safe = sym("collections", "OrderedDict");
        safe.invoked = true;
        assert!(classify(&r, &safe).is_safe());
    }

    #[test]
    fn invocation_ignored_without_knob() {
        let mut invoked = sym("builtins", "print");
        invoked.invoked = true;
        assert_eq!(classify(&rules(), &invoked).severity, Severity::Medium);
    }

    #[test]
    fn lambda_layer_matches_structural_rule() {
        let doc = json!({
            "class_name": "Sequential",
            "config": {
                "layers": [
                    {"class_name": "Dense", "config": {"units": 4}},
                    {"class_name": "Lambda", "config": {"function": "4wEAAAAA"}}
                ]
            }
        });
        let matches = classify_structure(&rules(), &doc);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].verdict.severity, Severity::Medium);
        assert_eq!(matches[0].path, "/config/layers/1");
        assert_eq!(matches[0].value, "Lambda");
    }

    #[test]
    fn structural_match_ignores_field_content() {
        let doc = json!({"layers": [{"class_name": "Lambda", "config": {}}]});
        assert_eq!(classify_structure(&rules(), &doc).len(), 1);
    }

    #[test]
    fn config_embedded_as_string_is_walked() {
        let inner = json!({"config": {"layers": [{"class_name": "Lambda"}]}}).to_string();
        let doc = json!({"model_config": inner});
        let matches = classify_structure(&rules(), &doc);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].path, "/model_config/config/layers/0");
    }

    #[test]
    fn plain_config_has_no_structural_matches() {
        let doc = json!({"layers": [{"class_name": "Dense"}, {"class_name": "Dropout"}]});
        assert!(classify_structure(&rules(), &doc).is_empty());
    }
}
