//! Structural validation of generated artifacts.
//!
//! Checks run against an in-memory file map only: the root document must
//! exist and carry its structural sections, and every local reference in an
//! HTML file must resolve to a file in the map. Patterns that break offline
//! execution are reported as warnings.

use std::collections::BTreeSet;

use regex::Regex;

use crate::error::{BuildToolError, BuildToolResult};
use crate::files::FileMap;
use crate::result::BuildResult;

/// Path of the root document.
pub const ROOT_DOCUMENT: &str = "index.html";

const EXEMPT_PREFIXES: &[&str] = &[
    "http://",
    "https://",
    "//",
    "data:",
    "#",
    "mailto:",
    "javascript:",
];

/// A pattern that is allowed but suspicious in a sandboxed artifact.
#[derive(Debug, Clone)]
pub struct OfflineRule {
    pub id: String,
    pub name: String,
    pattern: Regex,
}

impl OfflineRule {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        pattern: &str,
    ) -> BuildToolResult<Self> {
        let id = id.into();
        let pattern = Regex::new(pattern).map_err(|e| BuildToolError::InvalidRule {
            rule: id.clone(),
            message: format!("Invalid regex: {}", e),
        })?;
        Ok(Self {
            id,
            name: name.into(),
            pattern,
        })
    }

    pub fn is_match(&self, content: &str) -> bool {
        self.pattern.is_match(content)
    }
}

/// Stateless validator over file maps.
#[derive(Debug, Clone)]
pub struct BuildValidator {
    rules: Vec<OfflineRule>,
    reference: Regex,
}

impl BuildValidator {
    /// Validator with the standard offline rule set.
    pub fn standard() -> BuildToolResult<Self> {
        let rules = vec![
            OfflineRule::new("module-import", "ES module import", r"\bimport\s+")?,
            OfflineRule::new("require-call", "CommonJS require", r"\brequire\s*\(")?,
            OfflineRule::new("network-fetch", "Network fetch", r"\bfetch\s*\(")?,
            OfflineRule::new(
                "external-script",
                "External script URL",
                r#"<script\s+src=["']https?://"#,
            )?,
            OfflineRule::new(
                "external-stylesheet",
                "External stylesheet URL",
                r#"<link\s+.*href=["']https?://"#,
            )?,
        ];
        Self::with_rules(rules)
    }

    pub fn with_rules(rules: Vec<OfflineRule>) -> BuildToolResult<Self> {
        let reference = Regex::new(r#"(?:src|href)=["']([^"']+)["']"#).map_err(|e| {
            BuildToolError::InvalidRule {
                rule: "reference".to_string(),
                message: e.to_string(),
            }
        })?;
        Ok(Self { rules, reference })
    }

    pub fn rules(&self) -> &[OfflineRule] {
        &self.rules
    }

    /// Validate a file map.
    pub fn validate(&self, files: &FileMap) -> BuildResult {
        let mut result = BuildResult::new();

        match files.get(ROOT_DOCUMENT) {
            Some(root) => result.merge(check_structure(root)),
            None => result.add_error("Missing index.html"),
        }

        for (path, content) in files {
            if is_html(path) {
                result.merge(self.check_references(path, content, files));
            }
            for rule in &self.rules {
                if rule.is_match(content) {
                    result.add_warning(format!(
                        "Warning: potentially risky pattern in {}: {}",
                        path, rule.id
                    ));
                }
            }
        }

        result
    }

    /// Local references in one HTML document, resolved against its folder.
    pub fn local_references(&self, html_path: &str, content: &str) -> Vec<(String, String)> {
        let base = match html_path.rfind('/') {
            Some(idx) => &html_path[..idx],
            None => "",
        };

        self.reference
            .captures_iter(content)
            .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
            .filter(|raw| !EXEMPT_PREFIXES.iter().any(|p| raw.starts_with(p)))
            .filter_map(|raw| resolve_reference(base, raw).map(|resolved| (raw.to_string(), resolved)))
            .collect()
    }

    fn check_references(&self, path: &str, content: &str, files: &FileMap) -> BuildResult {
        let mut result = BuildResult::new();
        let mut reported = BTreeSet::new();

        for (raw, resolved) in self.local_references(path, content) {
            if !files.contains_key(&resolved) && reported.insert(raw.clone()) {
                result.add_error(format!("Referenced file not found: {}", raw));
            }
        }

        result
    }
}

/// Whether `path` names an HTML document (`.html` or `.htm`, any case).
pub fn is_html(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    lower.ends_with(".html") || lower.ends_with(".htm")
}

/// Required sections of a root-level HTML document.
pub fn check_structure(content: &str) -> BuildResult {
    let mut result = BuildResult::new();
    if !content.contains("<!DOCTYPE html>") && !content.contains("<html") {
        result.add_error("Missing <!DOCTYPE html> or <html> tag");
    }
    if !content.contains("<head") {
        result.add_error("Missing <head> section");
    }
    if !content.contains("<body") {
        result.add_error("Missing <body> section");
    }
    result
}

/// Drop query and fragment, then resolve `raw` against `base`. Returns
/// `None` when nothing is left to look up.
fn resolve_reference(base: &str, raw: &str) -> Option<String> {
    let cut = raw.find(['?', '#']).unwrap_or(raw.len());
    let target = raw[..cut].trim();
    if target.is_empty() {
        return None;
    }

    let (root_relative, target) = match target.strip_prefix('/') {
        Some(rest) => (true, rest),
        None => (false, target),
    };

    let mut segments: Vec<&str> = if root_relative || base.is_empty() {
        Vec::new()
    } else {
        base.split('/').collect()
    };
    for segment in target.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    if segments.is_empty() {
        None
    } else {
        Some(segments.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> BuildValidator {
        BuildValidator::standard().unwrap()
    }

    fn files(entries: &[(&str, &str)]) -> FileMap {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    const VALID: &str = "<!DOCTYPE html><html><head><title>t</title></head><body></body></html>";

    #[test]
    fn test_valid_document() {
        let result = validator().validate(&files(&[("index.html", VALID)]));
        assert!(result.success, "{:?}", result.errors);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_missing_root_document() {
        let result = validator().validate(&files(&[("game.js", "let a = 1;")]));
        assert!(!result.success);
        assert_eq!(result.errors, vec!["Missing index.html"]);
    }

    #[test]
    fn test_missing_head_section() {
        let result = validator().validate(&files(&[("index.html", "<body>no head</body>")]));
        assert!(!result.success);
        assert!(result.errors.iter().any(|e| e.contains("<head>")));
    }

    #[test]
    fn test_unresolved_script_reference() {
        let html = r#"<html><head></head><body><script src="missing.js"></script></body></html>"#;
        let result = validator().validate(&files(&[("index.html", html)]));
        assert!(!result.success);
        assert_eq!(result.errors, vec!["Referenced file not found: missing.js"]);
    }

    #[test]
    fn test_exempt_references() {
        let html = r##"<html><head>
            <link href="https://cdn.example.com/a.css" rel="stylesheet">
            <link href="//cdn.example.com/b.css" rel="stylesheet">
            </head><body>
            <a href="#top">top</a>
            <a href="mailto:me@example.com">mail</a>
            <img src="data:image/png;base64,AAAA">
            <a href="javascript:void(0)">noop</a>
            </body></html>"##;
        let result = validator().validate(&files(&[("index.html", html)]));
        assert!(result.success, "{:?}", result.errors);
        // The external stylesheet is still flagged for offline use.
        assert!(result
            .warnings
            .iter()
            .any(|w| w.ends_with("external-stylesheet")));
    }

    #[test]
    fn test_reference_normalization() {
        let html = r#"<html><head><link href="./css/style.css?v=2" rel="stylesheet"></head>
            <body><script src="/js/game.js#main"></script></body></html>"#;
        let map = files(&[
            ("index.html", html),
            ("css/style.css", "body{}"),
            ("js/game.js", "let a;"),
        ]);
        assert!(validator().validate(&map).success);
    }

    #[test]
    fn test_nested_document_references() {
        let nested = r#"<a href="../index.html">home</a><script src="level.js"></script>"#;
        let map = files(&[("index.html", VALID), ("levels/one.html", nested)]);
        let result = validator().validate(&map);
        assert_eq!(result.errors, vec!["Referenced file not found: level.js"]);
    }

    #[test]
    fn test_offline_warnings() {
        let map = files(&[
            ("index.html", VALID),
            ("game.js", "import x from 'y';\nfetch('/api');"),
        ]);
        let result = validator().validate(&map);
        assert!(result.success);
        assert_eq!(result.warnings.len(), 2);
        assert!(result.warnings[0].starts_with("Warning: potentially risky pattern in game.js"));
    }

    #[test]
    fn test_validation_is_deterministic() {
        let map = files(&[("index.html", "<body>x</body>"), ("a.js", "require('z')")]);
        let v = validator();
        assert_eq!(v.validate(&map), v.validate(&map));
    }
}
