//! Bounded store of compiled regular expressions.
//!
//! Patterns are keyed by `name:flags`. A fixed set of static patterns is
//! registered up front and never evicted; everything else is dynamic and kept
//! in least-recently-used order.

use indexmap::IndexMap;
use parking_lot::Mutex;
use regex::{Regex, RegexBuilder};
use std::collections::HashMap;
use std::sync::Arc;

/// Default ceiling on dynamic entries
pub const DEFAULT_MAX_DYNAMIC: usize = 500;

/// Fraction of dynamic entries dropped when the ceiling is exceeded
const EVICTION_DIVISOR: usize = 10;

/// Static patterns shared by the parser and the extractor.
pub const STATIC_PATTERNS: &[(&str, &str, &str)] = &[
    ("opacity-suffix", r"/(\d+(?:\.\d+)?|\[[^\[\]]+\])$", ""),
    (
        "class-attribute",
        r#"\b(?:class|className|class:list|tw)\s*=\s*(?:"([^"]*)"|'([^']*)'|\{\s*["'`]([^"'`]*)["'`]\s*\})"#,
        "",
    ),
    ("template-literal", r"`([^`]*)`", "s"),
    (
        "string-literal",
        r#""((?:[^"\\\n]|\\.)*)"|'((?:[^'\\\n]|\\.)*)'"#,
        "",
    ),
    ("template-expression", r"\$\{[^}]*\}", ""),
    (
        "attributify",
        r#"\s([a-z][a-z0-9-]*)\s*=\s*"([^"]*)""#,
        "",
    ),
    (
        "import-target",
        r#"(?:\bfrom\s+|@import\s+(?:url\()?|\bimport\s+|\bhref\s*=\s*)["']([^"']+)["']"#,
        "",
    ),
    (
        "class-selector",
        r"\.((?:\\[0-9a-fA-F]{1,6} ?|\\.|[A-Za-z0-9_\x{80}-\x{10FFFF}-])+)",
        "",
    ),
];

/// Snapshot of cache occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegexCacheStats {
    pub static_entries: usize,
    pub dynamic_entries: usize,
    pub compilations: u64,
    pub evictions: u64,
}

struct Inner {
    statics: HashMap<String, Arc<Regex>>,
    dynamic: IndexMap<String, Arc<Regex>>,
    compilations: u64,
    evictions: u64,
}

/// LRU cache of compiled patterns. Mutation is serialized behind a mutex;
/// compiled patterns are handed out as shared `Arc<Regex>` handles.
pub struct RegexCache {
    inner: Mutex<Inner>,
    max_dynamic: usize,
}

impl RegexCache {
    /// Create an empty cache with the default dynamic ceiling
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_DYNAMIC)
    }

    /// Create an empty cache with a custom dynamic ceiling
    pub fn with_capacity(max_dynamic: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                statics: HashMap::new(),
                dynamic: IndexMap::new(),
                compilations: 0,
                evictions: 0,
            }),
            max_dynamic: max_dynamic.max(1),
        }
    }

    /// Create a cache preloaded with [`STATIC_PATTERNS`]
    pub fn with_static_patterns(max_dynamic: usize) -> Self {
        let cache = Self::with_capacity(max_dynamic);
        for (key, pattern, flags) in STATIC_PATTERNS {
            // The built-in table is known to compile.
            if let Err(e) = cache.register_static(key, pattern, flags) {
                tracing::error!("built-in pattern '{}' failed to compile: {}", key, e);
            }
        }
        cache
    }

    /// Register a pattern that is exempt from eviction
    pub fn register_static(&self, key: &str, pattern: &str, flags: &str) -> Result<Arc<Regex>, regex::Error> {
        let regex = Arc::new(compile(pattern, flags)?);
        let mut inner = self.inner.lock();
        inner.compilations += 1;
        inner
            .statics
            .insert(cache_key(key, flags), Arc::clone(&regex));
        Ok(regex)
    }

    /// Look up a compiled pattern, compiling and inserting it on first use.
    ///
    /// Repeated calls for the same `key` and `flags` return the same `Arc`.
    /// Compilation errors in `pattern` are returned to the caller untouched.
    pub fn get(&self, key: &str, pattern: &str, flags: &str) -> Result<Arc<Regex>, regex::Error> {
        let full_key = cache_key(key, flags);

        {
            let mut inner = self.inner.lock();
            if let Some(regex) = inner.statics.get(&full_key) {
                return Ok(Arc::clone(regex));
            }
            if let Some(regex) = inner.dynamic.shift_remove(&full_key) {
                inner.dynamic.insert(full_key, Arc::clone(&regex));
                return Ok(regex);
            }
        }

        // Compile outside the lock so slow patterns don't block readers.
        let compiled = Arc::new(compile(pattern, flags)?);

        let mut inner = self.inner.lock();
        if let Some(existing) = inner.dynamic.get(&full_key) {
            return Ok(Arc::clone(existing));
        }
        inner.compilations += 1;
        inner.dynamic.insert(full_key, Arc::clone(&compiled));

        if inner.dynamic.len() > self.max_dynamic {
            let evict = (inner.dynamic.len() / EVICTION_DIVISOR).max(1);
            inner.dynamic.drain(..evict);
            inner.evictions += evict as u64;
            tracing::debug!("regex cache evicted {} dynamic patterns", evict);
        }

        Ok(compiled)
    }

    /// Look up a pattern previously registered as static
    pub fn get_static(&self, key: &str) -> Option<Arc<Regex>> {
        self.inner.lock().statics.get(&cache_key(key, static_flags(key))).cloned()
    }

    /// Look up a built-in pattern from [`STATIC_PATTERNS`], registering it
    /// again if it was cleared
    pub fn builtin(&self, key: &str) -> Option<Arc<Regex>> {
        if let Some(regex) = self.get_static(key) {
            return Some(regex);
        }
        let (_, pattern, flags) = STATIC_PATTERNS.iter().find(|(name, _, _)| *name == key)?;
        self.register_static(key, pattern, flags).ok()
    }

    /// Remove every entry, or only the dynamic ones when `preserve_static` is set
    pub fn clear(&self, preserve_static: bool) {
        let mut inner = self.inner.lock();
        inner.dynamic.clear();
        if !preserve_static {
            inner.statics.clear();
        }
    }

    /// Number of dynamic entries currently cached
    pub fn dynamic_len(&self) -> usize {
        self.inner.lock().dynamic.len()
    }

    pub fn stats(&self) -> RegexCacheStats {
        let inner = self.inner.lock();
        RegexCacheStats {
            static_entries: inner.statics.len(),
            dynamic_entries: inner.dynamic.len(),
            compilations: inner.compilations,
            evictions: inner.evictions,
        }
    }
}

impl Default for RegexCache {
    fn default() -> Self {
        Self::with_static_patterns(DEFAULT_MAX_DYNAMIC)
    }
}

fn cache_key(key: &str, flags: &str) -> String {
    format!("{}:{}", key, flags)
}

fn static_flags(key: &str) -> &'static str {
    STATIC_PATTERNS
        .iter()
        .find(|(name, _, _)| *name == key)
        .map(|(_, _, flags)| *flags)
        .unwrap_or("")
}

/// Compile `pattern` honouring JavaScript-style flag letters.
/// `g` and `y` have no meaning for a compiled `Regex` and are ignored.
fn compile(pattern: &str, flags: &str) -> Result<Regex, regex::Error> {
    let mut builder = RegexBuilder::new(pattern);
    for flag in flags.chars() {
        match flag {
            'i' => {
                builder.case_insensitive(true);
            }
            'm' => {
                builder.multi_line(true);
            }
            's' => {
                builder.dot_matches_new_line(true);
            }
            'x' => {
                builder.ignore_whitespace(true);
            }
            'u' => {
                builder.unicode(true);
            }
            _ => {}
        }
    }
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_key_returns_same_instance() {
        let cache = RegexCache::new();
        let a = cache.get("shade", r"^bg-(\w+)-(\d+)$", "").unwrap();
        let b = cache.get("shade", r"^bg-(\w+)-(\d+)$", "").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.stats().compilations, 1);
    }

    #[test]
    fn test_flags_are_part_of_the_key() {
        let cache = RegexCache::new();
        let plain = cache.get("word", "abc", "").unwrap();
        let insensitive = cache.get("word", "abc", "i").unwrap();
        assert!(!Arc::ptr_eq(&plain, &insensitive));
        assert!(insensitive.is_match("ABC"));
        assert!(!plain.is_match("ABC"));
    }

    #[test]
    fn test_dynamic_ceiling_is_enforced() {
        let cache = RegexCache::new();
        for i in 0..600 {
            cache.get(&format!("p{}", i), &format!("^p-{}$", i), "").unwrap();
        }
        assert!(cache.dynamic_len() <= DEFAULT_MAX_DYNAMIC);
        assert!(cache.stats().evictions > 0);
    }

    #[test]
    fn test_least_recently_used_entries_go_first() {
        let cache = RegexCache::with_capacity(10);
        for i in 0..10 {
            cache.get(&format!("k{}", i), "x", "").unwrap();
        }
        // Touch k0 so it becomes most recently used.
        let hot = cache.get("k0", "x", "").unwrap();
        cache.get("k10", "x", "").unwrap();

        let again = cache.get("k0", "x", "").unwrap();
        assert!(Arc::ptr_eq(&hot, &again));
        // k1 was the oldest untouched entry and must have been evicted.
        let before = cache.stats().compilations;
        cache.get("k1", "x", "").unwrap();
        assert_eq!(cache.stats().compilations, before + 1);
    }

    #[test]
    fn test_static_patterns_survive_eviction_and_clear() {
        let cache = RegexCache::with_static_patterns(5);
        for i in 0..50 {
            cache.get(&format!("d{}", i), "y", "").unwrap();
        }
        assert!(cache.get_static("opacity-suffix").is_some());

        cache.clear(true);
        assert_eq!(cache.dynamic_len(), 0);
        assert!(cache.get_static("class-attribute").is_some());

        cache.clear(false);
        assert!(cache.get_static("class-attribute").is_none());
        assert!(cache.builtin("class-attribute").is_some());
        assert!(cache.get_static("class-attribute").is_some());
        assert!(cache.builtin("no-such-pattern").is_none());
    }

    #[test]
    fn test_compile_error_propagates() {
        let cache = RegexCache::new();
        assert!(cache.get("broken", "(unclosed", "").is_err());
        assert_eq!(cache.dynamic_len(), 0);
    }
}
