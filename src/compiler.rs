//! Class list to CSS.
//!
//! [`compile_batch`] is the synchronous pipeline (parse, match, generate) used
//! both in process and inside workers. [`CompilerContext`] owns the shared
//! state for a session: the regex cache, the rule table, and optionally the
//! hybrid cache and worker pool.

use crate::config::JitConfig;
use crate::errors::Result;
use crate::generator::generate;
use crate::hash::ContentHash;
use crate::hybrid_cache::HybridCache;
use crate::matcher::{match_rules, match_with_rules, Match};
use crate::parser::{expand_variant_groups, parse, ClassNameParser, ParsedClass};
use crate::pool::WorkerPool;
use crate::regex_cache::RegexCache;
use crate::rule::{starter_rules, Rule, RuleSpec, RuleTable};
use crate::store::{MemoryStore, PersistentStore, RedbStore};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// CSS generated for one class, with the ids of the rules that produced it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassCss {
    pub class: String,
    /// Empty when no rule matched
    pub css: String,
    pub rule_ids: Vec<String>,
}

/// Compile one class. Matching rules are emitted in ascending priority;
/// rules with equal priority keep table order.
pub fn compile_class(class: &str, parsed: &ParsedClass, rules: &[Rule]) -> ClassCss {
    let mut hits = match_with_rules(class, &parsed.utility, rules);
    hits.sort_by_key(|(rule, _)| rule.priority);

    let mut blocks = Vec::new();
    let mut rule_ids = Vec::new();
    for (rule, hit) in &hits {
        if let Some(css) = generate(class, parsed, rule, hit) {
            blocks.push(css);
            rule_ids.push(rule.id.clone());
        }
    }

    ClassCss {
        class: class.to_string(),
        css: blocks.join("\n\n"),
        rule_ids,
    }
}

/// Compile a batch of classes, skipping repeats
pub fn compile_batch(classes: &[String], rules: &[Rule]) -> Vec<ClassCss> {
    compile_batch_with(classes, rules, parse)
}

pub fn compile_batch_with<F>(classes: &[String], rules: &[Rule], parse_fn: F) -> Vec<ClassCss>
where
    F: Fn(&str) -> ParsedClass,
{
    let mut seen = HashSet::new();
    classes
        .iter()
        .filter(|class| seen.insert(class.as_str()))
        .map(|class| {
            let parsed = parse_fn(class);
            if parsed.is_empty() {
                ClassCss {
                    class: class.clone(),
                    css: String::new(),
                    rule_ids: Vec::new(),
                }
            } else {
                compile_class(class, &parsed, rules)
            }
        })
        .collect()
}

/// Every match for every distinct class in the batch
pub fn match_batch<F>(classes: &[String], rules: &[Rule], parse_fn: F) -> Vec<Match>
where
    F: Fn(&str) -> ParsedClass,
{
    let mut seen = HashSet::new();
    classes
        .iter()
        .filter(|class| seen.insert(class.as_str()))
        .flat_map(|class| {
            let parsed = parse_fn(class);
            if parsed.is_empty() {
                Vec::new()
            } else {
                match_rules(class, &parsed.utility, rules)
            }
        })
        .collect()
}

/// Join the non-empty CSS of a batch into one stylesheet fragment
pub fn join_css(compiled: &[ClassCss]) -> String {
    compiled
        .iter()
        .filter(|c| !c.css.is_empty())
        .map(|c| c.css.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Shared compilation state for a session
pub struct CompilerContext {
    regex_cache: Arc<RegexCache>,
    parser: ClassNameParser,
    rules: Arc<RuleTable>,
    rule_specs: Arc<Vec<RuleSpec>>,
    fingerprint: String,
    /// Rules with closures can't be sent to workers
    in_process_only: bool,
    cache: Option<Arc<HybridCache>>,
    pool: Option<Arc<WorkerPool>>,
}

impl CompilerContext {
    pub fn new(regex_cache: Arc<RegexCache>, rules: RuleTable) -> Self {
        let in_process_only = rules.rules().iter().any(|rule| {
            rule.computed.is_some() || matches!(rule.selector, Some(crate::rule::SelectorTransform::Custom(_)))
        });
        if in_process_only {
            tracing::debug!("rule table has closures; compiling in process");
        }

        Self {
            parser: ClassNameParser::new(Arc::clone(&regex_cache)),
            rule_specs: Arc::new(rules.to_specs()),
            fingerprint: rules.fingerprint(),
            rules: Arc::new(rules),
            regex_cache,
            in_process_only,
            cache: None,
            pool: None,
        }
    }

    /// Build a context from configuration: rule table (starter rules when
    /// none are configured), hybrid cache and worker pool
    pub fn from_config(config: &JitConfig) -> Result<Self> {
        let regex_cache = Arc::new(RegexCache::with_static_patterns(config.regex.max_dynamic));
        let specs = if config.rules.is_empty() {
            starter_rules()
        } else {
            config.rules.clone()
        };
        let rules = RuleTable::from_specs(&specs, &regex_cache)?;
        let mut context = Self::new(regex_cache, rules);

        if config.cache.enabled {
            let store: Arc<dyn PersistentStore> = match &config.cache.path {
                Some(path) => match RedbStore::open(path) {
                    Ok(store) => Arc::new(store),
                    Err(e) => {
                        tracing::warn!(
                            "could not open cache at {}: {}; using a memory-only cache",
                            path.display(),
                            e
                        );
                        Arc::new(MemoryStore::new())
                    }
                },
                None => Arc::new(MemoryStore::new()),
            };
            context = context.with_cache(Arc::new(HybridCache::new(store, config.cache.options())));
        }

        Ok(context.with_pool(Arc::new(WorkerPool::new(config.workers.pool_options()))))
    }

    pub fn with_cache(mut self, cache: Arc<HybridCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_pool(mut self, pool: Arc<WorkerPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn regex_cache(&self) -> &Arc<RegexCache> {
        &self.regex_cache
    }

    pub fn parser(&self) -> &ClassNameParser {
        &self.parser
    }

    pub fn rules(&self) -> &RuleTable {
        &self.rules
    }

    pub fn cache(&self) -> Option<&Arc<HybridCache>> {
        self.cache.as_ref()
    }

    pub fn pool(&self) -> Option<&Arc<WorkerPool>> {
        self.pool.as_ref()
    }

    /// Cache key for a class under the current rule table
    pub fn cache_key(&self, class: &str) -> String {
        format!(
            "css:{}",
            ContentHash::from_str_content(&format!("{}\0{}", self.fingerprint, class))
        )
    }

    /// Compile `classes` (variant groups allowed), returning one record per
    /// distinct class in first-seen order. Cached classes skip compilation;
    /// fresh results are cached with a `rule:<id>` dependency per rule.
    pub async fn compile(&self, classes: &[String]) -> Result<Vec<ClassCss>> {
        let mut seen = HashSet::new();
        let unique: Vec<String> = classes
            .iter()
            .flat_map(|class| expand_variant_groups(class))
            .filter(|class| seen.insert(class.clone()))
            .collect();

        let mut results: HashMap<String, ClassCss> = HashMap::with_capacity(unique.len());
        let misses: Vec<String> = match &self.cache {
            Some(cache) => {
                let lookups = join_all(unique.iter().map(|class| {
                    let key = self.cache_key(class);
                    async move { cache.get_entry(&key).await }
                }))
                .await;

                let mut misses = Vec::new();
                for (class, entry) in unique.iter().zip(lookups) {
                    match entry {
                        Some(entry) => {
                            let rule_ids = entry
                                .dependencies
                                .iter()
                                .filter_map(|dep| dep.strip_prefix("rule:"))
                                .map(str::to_string)
                                .collect();
                            results.insert(
                                class.clone(),
                                ClassCss {
                                    class: class.clone(),
                                    css: entry.value,
                                    rule_ids,
                                },
                            );
                        }
                        None => misses.push(class.clone()),
                    }
                }
                misses
            }
            None => unique.clone(),
        };

        if !misses.is_empty() {
            tracing::debug!("compiling {} of {} classes", misses.len(), unique.len());
            for compiled in self.compile_uncached(&misses).await? {
                if let Some(cache) = &self.cache {
                    let deps: Vec<String> = compiled.rule_ids.iter().map(|id| format!("rule:{}", id)).collect();
                    cache.set(&self.cache_key(&compiled.class), &compiled.css, deps).await;
                }
                results.insert(compiled.class.clone(), compiled);
            }
        }

        Ok(unique.into_iter().filter_map(|class| results.remove(&class)).collect())
    }

    /// Compile and join into one stylesheet fragment
    pub async fn compile_to_css(&self, classes: &[String]) -> Result<String> {
        Ok(join_css(&self.compile(classes).await?))
    }

    async fn compile_uncached(&self, classes: &[String]) -> Result<Vec<ClassCss>> {
        match &self.pool {
            Some(pool) if !self.in_process_only => pool.compile_classes(classes, &self.rule_specs).await,
            _ => Ok(compile_batch_with(classes, self.rules.rules(), |c| self.parser.parse(c))),
        }
    }

    /// Drop cached CSS produced by rule `rule_id`
    pub async fn invalidate_rule(&self, rule_id: &str) -> usize {
        match &self.cache {
            Some(cache) => cache.invalidate_dependency(&format!("rule:{}", rule_id)).await,
            None => 0,
        }
    }

    /// Stop the worker pool, if any
    pub fn shutdown(&self) {
        if let Some(pool) = &self.pool {
            pool.terminate();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hybrid_cache::HybridCacheOptions;
    use crate::rule::{Properties, PropertyValue};

    fn starter_context() -> CompilerContext {
        let regex_cache = Arc::new(RegexCache::default());
        let rules = RuleTable::from_specs(&starter_rules(), &regex_cache).unwrap();
        CompilerContext::new(regex_cache, rules)
    }

    fn classes(list: &[&str]) -> Vec<String> {
        list.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_compile_batch_dedups_and_skips_unknown() {
        let regex_cache = RegexCache::default();
        let rules = RuleTable::from_specs(&starter_rules(), &regex_cache).unwrap();
        let out = compile_batch(&classes(&["p-4", "p-4", "wobble", ""]), rules.rules());
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].rule_ids, vec!["p"]);
        assert!(out[1].css.is_empty());
        assert_eq!(join_css(&out), out[0].css);
    }

    #[test]
    fn test_priority_orders_output() {
        let rules = vec![
            Rule::literal("card", [("padding", "2rem")]).with_priority(5),
            Rule::literal("card", [("margin", "0")]).with_priority(-1),
        ];
        let out = compile_class("card", &parse("card"), &rules);
        let margin = out.css.find("margin").unwrap();
        let padding = out.css.find("padding").unwrap();
        assert!(margin < padding);
    }

    #[tokio::test]
    async fn test_compile_uses_cache() {
        let cache = Arc::new(HybridCache::new(
            Arc::new(MemoryStore::new()),
            HybridCacheOptions::default(),
        ));
        let context = starter_context().with_cache(Arc::clone(&cache));

        let first = context.compile(&classes(&["hover:(p-4 flex)"])).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].class, "hover:p-4");

        let second = context.compile(&classes(&["hover:p-4", "hover:flex"])).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(cache.stats().hits, 2);

        assert_eq!(context.invalidate_rule("flex").await, 1);
    }

    #[tokio::test]
    async fn test_closure_rules_compile_in_process() {
        let regex_cache = Arc::new(RegexCache::default());
        let rule = Rule::regex("size", r"size-(\d+)", Properties::new())
            .unwrap()
            .with_computed(Arc::new(|caps: &[String]| {
                let mut props = Properties::new();
                props.insert("width".into(), PropertyValue::Str(format!("{}px", caps[0])));
                props
            }));
        let context = CompilerContext::new(regex_cache, RuleTable::new(vec![rule]))
            .with_pool(Arc::new(WorkerPool::inline()));
        let css = context.compile_to_css(&classes(&["size-8"])).await.unwrap();
        assert_eq!(css, ".size-8 {\n  width: 8px;\n}");
    }
}
