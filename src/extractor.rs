//! Candidate class extraction from markup and source text.
//!
//! Scans class attributes, template literals, plain string literals and
//! attributify attributes, expands variant groups, and keeps tokens that
//! look like utility classes. Relative imports are reported separately so
//! the incremental builder can track dependencies.

use crate::errors::{JitError, Result};
use crate::generator::{resolve_variant, VariantEffect};
use crate::incremental::path_key;
use crate::parser::{expand_variant_groups, ClassNameParser, MAX_CLASS_LENGTH};
use crate::regex_cache::RegexCache;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// HTML and framework attributes never read as attributify utilities
const NON_UTILITY_ATTRIBUTES: &[&str] = &[
    "class", "classname", "id", "href", "src", "srcset", "type", "name", "value", "alt", "title", "style", "rel",
    "lang", "for", "role", "placeholder", "content", "charset", "action", "method", "target", "key", "ref", "tw",
    "xmlns", "viewbox", "d", "fill", "stroke", "width", "height", "tabindex", "slot", "is", "loading", "crossorigin",
    "integrity", "async", "defer", "label", "media", "sizes", "accept", "autocomplete", "pattern",
];

/// Extensions tried when an import target has none
const IMPORT_EXTENSIONS: &[&str] = &["js", "jsx", "ts", "tsx", "vue", "svelte", "html", "css"];

/// Information about an extracted string
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExtractedString {
    /// A single class name
    pub value: String,
    /// Source file path
    pub file_path: String,
    /// Line number in source file (1-indexed)
    pub line: usize,
    /// Column number in source file (0-indexed)
    pub column: usize,
}

pub struct Extractor {
    regex_cache: Arc<RegexCache>,
    parser: ClassNameParser,
}

impl Extractor {
    pub fn new(regex_cache: Arc<RegexCache>) -> Self {
        Self {
            parser: ClassNameParser::new(Arc::clone(&regex_cache)),
            regex_cache,
        }
    }

    /// Extract candidate classes from `content` with their locations.
    /// Repeated occurrences at the same location are reported once.
    pub fn extract(&self, content: &str, source_name: &str) -> Vec<ExtractedString> {
        let lines = LineIndex::new(content);
        let mut segments: Vec<(usize, String)> = Vec::new();

        if let Some(re) = self.regex_cache.builtin("class-attribute") {
            for caps in re.captures_iter(content) {
                if let Some(m) = (1..=3).find_map(|i| caps.get(i)) {
                    segments.push((m.start(), m.as_str().to_string()));
                }
            }
        }

        if let (Some(re), Some(expr)) = (
            self.regex_cache.builtin("template-literal"),
            self.regex_cache.builtin("template-expression"),
        ) {
            for caps in re.captures_iter(content) {
                if let Some(m) = caps.get(1) {
                    segments.push((m.start(), expr.replace_all(m.as_str(), " ").into_owned()));
                }
            }
        }

        if let Some(re) = self.regex_cache.builtin("string-literal") {
            for caps in re.captures_iter(content) {
                if let Some(m) = caps.get(1).or_else(|| caps.get(2)) {
                    segments.push((m.start(), m.as_str().to_string()));
                }
            }
        }

        if let Some(re) = self.regex_cache.builtin("attributify") {
            for caps in re.captures_iter(content) {
                let (Some(attr), Some(value)) = (caps.get(1), caps.get(2)) else {
                    continue;
                };
                if let Some(expanded) = attributify_classes(attr.as_str(), value.as_str()) {
                    segments.push((value.start(), expanded));
                }
            }
        }

        let mut seen = HashSet::new();
        let mut extracted = Vec::new();
        for (offset, text) in segments {
            let (line, column) = lines.position(offset);
            for class in expand_variant_groups(&text) {
                if !is_valid_class(&class) || self.parser.parse(&class).is_empty() {
                    continue;
                }
                if seen.insert((class.clone(), line, column)) {
                    extracted.push(ExtractedString {
                        value: class,
                        file_path: source_name.to_string(),
                        line,
                        column,
                    });
                }
            }
        }
        extracted
    }

    /// Distinct classes in `content`, in first-seen order
    pub fn extract_classes(&self, content: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        self.extract(content, "")
            .into_iter()
            .filter_map(|e| seen.insert(e.value.clone()).then_some(e.value))
            .collect()
    }

    /// Read a file and extract from it
    pub fn extract_from_file(&self, file_path: &Path) -> Result<Vec<ExtractedString>> {
        let content = std::fs::read_to_string(file_path).map_err(|e| JitError::Build {
            path: file_path.display().to_string(),
            message: format!("Failed to read file: {}", e),
        })?;
        Ok(self.extract(&content, &file_path.display().to_string()))
    }

    /// Process files in parallel and extract strings
    pub fn extract_parallel(&self, files: &[PathBuf], jobs: Option<usize>) -> Result<Vec<ExtractedString>> {
        use rayon::prelude::*;

        // Configure thread pool only if specified and not already initialized
        if let Some(num_jobs) = jobs {
            let _ = rayon::ThreadPoolBuilder::new().num_threads(num_jobs).build_global();
        }

        let results: Result<Vec<_>> = files.par_iter().map(|file| self.extract_from_file(file)).collect();
        Ok(results?.into_iter().flatten().collect())
    }

    /// Manifest keys of the files `content` imports. Only relative targets
    /// (`./x`, `../x`) are considered.
    pub fn extract_imports(&self, content: &str, from: &Path) -> Vec<String> {
        let Some(re) = self.regex_cache.builtin("import-target") else {
            return Vec::new();
        };
        let mut seen = HashSet::new();
        re.captures_iter(content)
            .filter_map(|caps| caps.get(1))
            .filter_map(|m| resolve_import(from, m.as_str()))
            .filter(|key| seen.insert(key.clone()))
            .collect()
    }
}

/// Rewrite an attributify attribute into class names: `hover="a b"` becomes
/// `hover:a hover:b`, `bg="red-500"` becomes `bg-red-500`, and `~` stands
/// for the bare attribute name.
fn attributify_classes(attr: &str, value: &str) -> Option<String> {
    let lower = attr.to_ascii_lowercase();
    if NON_UTILITY_ATTRIBUTES.contains(&lower.as_str())
        || lower.starts_with("data-")
        || lower.starts_with("aria-")
        || lower.starts_with("on")
    {
        return None;
    }

    let is_variant = resolve_variant(attr) != VariantEffect::Unknown;
    let classes: Vec<String> = value
        .split_whitespace()
        .map(|token| {
            if is_variant {
                format!("{}:{}", attr, token)
            } else if token == "~" {
                attr.to_string()
            } else {
                format!("{}-{}", attr, token)
            }
        })
        .collect();

    (!classes.is_empty()).then(|| classes.join(" "))
}

/// Check if a string is a potentially valid utility class
pub fn is_valid_class(class: &str) -> bool {
    if class.is_empty() || class.len() > MAX_CLASS_LENGTH {
        return false;
    }

    // Check for dangerous characters
    if class.contains('<') || class.contains('>') || class.contains('{') || class.contains('}') || class.contains(';')
    {
        return false;
    }

    if class.starts_with('.') || class.starts_with('/') || class.starts_with("http") || class.ends_with(':') {
        return false;
    }

    if !class.chars().any(|c| c.is_ascii_alphabetic()) {
        return false;
    }

    class
        .chars()
        .all(|c| c.is_alphanumeric() || "-:/.[]!()#%&*_@,+'".contains(c))
}

/// Resolve a relative import against the importing file and return its
/// manifest key. Targets without an extension are tried with the usual
/// source extensions.
pub fn resolve_import(from: &Path, target: &str) -> Option<String> {
    if !(target.starts_with("./") || target.starts_with("../")) {
        return None;
    }
    let target = target.split(['?', '#']).next().unwrap_or(target);
    let base = from.parent().unwrap_or_else(|| Path::new(""));
    let candidate = base.join(target);

    if candidate.extension().is_none() && !candidate.is_file() {
        for ext in IMPORT_EXTENSIONS {
            let with_ext = candidate.with_extension(ext);
            if with_ext.is_file() {
                return Some(path_key(&with_ext));
            }
        }
    }
    Some(path_key(&candidate))
}

/// Byte offset to (line, column) lookup
struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    fn new(content: &str) -> Self {
        let starts = std::iter::once(0)
            .chain(content.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self { starts }
    }

    fn position(&self, offset: usize) -> (usize, usize) {
        let line = self.starts.partition_point(|&start| start <= offset);
        let start = self.starts[line.saturating_sub(1)];
        (line.max(1), offset - start)
    }
}
