//! Placeholder substitution - `{identifier}` tokens
//!
//! Identifiers match `[a-z][a-z0-9_]*`. Anything else in braces (JSON
//! examples, `{Capitalized}`, `{ spaced }`) is literal text.

use std::borrow::Cow;
use std::collections::{BTreeSet, HashMap};

use once_cell::sync::Lazy;
use regex::Regex;

/// Pre-compiled placeholder pattern
static PLACEHOLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([a-z][a-z0-9_]*)\}").expect("placeholder regex is valid"));

/// Substitute every placeholder that has a value
///
/// Placeholders absent from `values` are left untouched so partial previews
/// stay legible. Substituted values are not rescanned.
pub fn render<'a>(template: &'a str, values: &HashMap<String, String>) -> Cow<'a, str> {
    if !template.contains('{') {
        return Cow::Borrowed(template);
    }

    PLACEHOLDER_RE.replace_all(template, |caps: &regex::Captures<'_>| {
        match values.get(&caps[1]) {
            Some(value) => value.clone(),
            None => caps[0].to_string(),
        }
    })
}

/// Names of every placeholder in `template`
pub fn placeholders(template: &str) -> BTreeSet<String> {
    PLACEHOLDER_RE
        .captures_iter(template)
        .map(|caps| caps[1].to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_render_missing_is_fail_open() {
        let out = render("Hello {missing}", &HashMap::new());
        assert_eq!(out, "Hello {missing}");
    }

    #[test]
    fn test_render_substitutes_known() {
        let out = render(
            "Client {client_name}, doc {document_name}: {unknown}",
            &values(&[("client_name", "J. Doe"), ("document_name", "intake.md")]),
        );
        assert_eq!(out, "Client J. Doe, doc intake.md: {unknown}");
    }

    #[test]
    fn test_render_ignores_non_identifiers() {
        let template = r#"Return {"key": 1} or {Name} or { spaced } or {9lives}"#;
        let out = render(template, &values(&[("key", "x"), ("name", "y")]));
        assert_eq!(out, template);
    }

    #[test]
    fn test_render_does_not_rescan_values() {
        let out = render(
            "{document_content}",
            &values(&[("document_content", "see {client_name}"), ("client_name", "X")]),
        );
        assert_eq!(out, "see {client_name}");
    }

    #[test]
    fn test_render_without_braces_borrows() {
        assert!(matches!(render("plain", &HashMap::new()), Cow::Borrowed(_)));
    }

    #[test]
    fn test_placeholders_unique_sorted() {
        let found = placeholders("{b} {a} {b} {A} {c_1}");
        assert_eq!(found.into_iter().collect::<Vec<_>>(), vec!["a", "b", "c_1"]);
    }
}
