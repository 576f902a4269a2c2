//! Rule records supplied by the plugin layer.
//!
//! A [`Rule`] maps a utility pattern to CSS declarations. Rules built in
//! process may carry closures (computed properties, custom selector
//! transforms); their [`RuleSpec`] form is plain data and is what crosses the
//! worker boundary.

use crate::errors::Result;
use crate::regex_cache::RegexCache;
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// A declaration value as written by a plugin table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Str(String),
    Num(f64),
}

impl PropertyValue {
    pub fn render(&self) -> String {
        match self {
            PropertyValue::Str(s) => s.clone(),
            PropertyValue::Num(n) if n.fract() == 0.0 => format!("{}", *n as i64),
            PropertyValue::Num(n) => n.to_string(),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::Str(value.to_string())
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Num(value)
    }
}

pub type Properties = IndexMap<String, PropertyValue>;

/// Builds declarations from the pattern's capture groups
pub type ComputedProperties = Arc<dyn Fn(&[String]) -> Properties + Send + Sync>;

/// How a rule matches a utility
#[derive(Clone)]
pub enum RulePattern {
    /// Exact name, or a prefix when the literal ends in `-`
    Literal(String),
    /// Anchored regular expression
    Regex(Arc<Regex>),
}

impl RulePattern {
    pub fn source(&self) -> &str {
        match self {
            RulePattern::Literal(s) => s,
            RulePattern::Regex(r) => r.as_str(),
        }
    }
}

impl fmt::Debug for RulePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RulePattern::Literal(s) => write!(f, "Literal({:?})", s),
            RulePattern::Regex(r) => write!(f, "Regex({:?})", r.as_str()),
        }
    }
}

/// Rewrites the generated selector before variants are applied
#[derive(Clone)]
pub enum SelectorTransform {
    /// `&` is replaced by the selector, e.g. `& > * + *`
    Template(String),
    Custom(Arc<dyn Fn(&str) -> String + Send + Sync>),
}

impl SelectorTransform {
    pub fn apply(&self, selector: &str) -> String {
        match self {
            SelectorTransform::Template(template) => template.replace('&', selector),
            SelectorTransform::Custom(f) => f(selector),
        }
    }
}

impl fmt::Debug for SelectorTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectorTransform::Template(t) => write!(f, "Template({:?})", t),
            SelectorTransform::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// One entry of the rule table
#[derive(Clone)]
pub struct Rule {
    pub id: String,
    pub pattern: RulePattern,
    pub properties: Properties,
    pub computed: Option<ComputedProperties>,
    pub selector: Option<SelectorTransform>,
    pub layer: Option<String>,
    pub priority: i32,
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("id", &self.id)
            .field("pattern", &self.pattern)
            .field("properties", &self.properties)
            .field("computed", &self.computed.is_some())
            .field("selector", &self.selector)
            .field("layer", &self.layer)
            .field("priority", &self.priority)
            .finish()
    }
}

impl Rule {
    /// Rule matching `name` exactly (or as a prefix when it ends in `-`)
    pub fn literal<I, K, V>(name: &str, properties: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<PropertyValue>,
    {
        Self {
            id: name.to_string(),
            pattern: RulePattern::Literal(name.to_string()),
            properties: collect_properties(properties),
            computed: None,
            selector: None,
            layer: None,
            priority: 0,
        }
    }

    /// Rule matching the anchored pattern `^(?:source)$`
    pub fn regex<I, K, V>(id: &str, source: &str, properties: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<PropertyValue>,
    {
        Ok(Self {
            id: id.to_string(),
            pattern: RulePattern::Regex(Arc::new(Regex::new(&anchor(source))?)),
            properties: collect_properties(properties),
            computed: None,
            selector: None,
            layer: None,
            priority: 0,
        })
    }

    pub fn with_computed(mut self, computed: ComputedProperties) -> Self {
        self.computed = Some(computed);
        self
    }

    pub fn with_selector(mut self, selector: SelectorTransform) -> Self {
        self.selector = Some(selector);
        self
    }

    pub fn with_layer(mut self, layer: &str) -> Self {
        self.layer = Some(layer.to_string());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Declarations for a match, from the computed handler when present
    pub fn resolve_properties(&self, captures: &[String]) -> Properties {
        match &self.computed {
            Some(computed) => computed(captures),
            None => self.properties.clone(),
        }
    }

    /// Rebuild a rule from its serialized form. Regex sources are compiled
    /// through `regex_cache`, keyed by rule id.
    pub fn from_spec(spec: &RuleSpec, regex_cache: &RegexCache) -> Result<Self> {
        let pattern = if spec.regex {
            let anchored = anchor(&spec.pattern);
            RulePattern::Regex(regex_cache.get(&format!("rule:{}", spec.id), &anchored, "")?)
        } else {
            RulePattern::Literal(spec.pattern.clone())
        };

        Ok(Self {
            id: spec.id.clone(),
            pattern,
            properties: spec.properties.clone(),
            computed: None,
            selector: spec.selector.clone().map(SelectorTransform::Template),
            layer: spec.layer.clone(),
            priority: spec.priority,
        })
    }

    /// Plain-data form of this rule. Closures do not survive: computed
    /// handlers fall back to the static properties and custom selector
    /// transforms are dropped.
    pub fn to_spec(&self) -> RuleSpec {
        if self.computed.is_some() {
            tracing::debug!("rule '{}': computed properties dropped when serializing", self.id);
        }
        let selector = match &self.selector {
            Some(SelectorTransform::Template(t)) => Some(t.clone()),
            Some(SelectorTransform::Custom(_)) => {
                tracing::debug!("rule '{}': custom selector transform dropped when serializing", self.id);
                None
            }
            None => None,
        };

        let (pattern, regex) = match &self.pattern {
            RulePattern::Literal(s) => (s.clone(), false),
            RulePattern::Regex(r) => (unanchor(r.as_str()).to_string(), true),
        };

        RuleSpec {
            id: self.id.clone(),
            pattern,
            regex,
            properties: self.properties.clone(),
            selector,
            layer: self.layer.clone(),
            priority: self.priority,
        }
    }
}

/// Serializable rule, as found in configuration files and sent to workers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSpec {
    #[serde(default)]
    pub id: String,

    pub pattern: String,

    /// Treat `pattern` as a regular expression
    #[serde(default)]
    pub regex: bool,

    #[serde(default)]
    pub properties: Properties,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer: Option<String>,

    #[serde(default)]
    pub priority: i32,
}

/// Ordered rule collection owned by the plugin layer
#[derive(Debug, Clone, Default)]
pub struct RuleTable {
    rules: Vec<Rule>,
}

impl RuleTable {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    /// Build a table from config specs; specs without an id get their pattern
    pub fn from_specs(specs: &[RuleSpec], regex_cache: &RegexCache) -> Result<Self> {
        let rules = specs
            .iter()
            .map(|spec| {
                let mut spec = spec.clone();
                if spec.id.is_empty() {
                    spec.id = spec.pattern.clone();
                }
                Rule::from_spec(&spec, regex_cache)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn get(&self, id: &str) -> Option<&Rule> {
        self.rules.iter().find(|rule| rule.id == id)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn to_specs(&self) -> Vec<RuleSpec> {
        self.rules.iter().map(Rule::to_spec).collect()
    }

    /// Stable fingerprint of the table, used to scope cache entries
    pub fn fingerprint(&self) -> String {
        let json = serde_json::to_vec(&self.to_specs()).unwrap_or_default();
        crate::hash::ContentHash::from_bytes(&json).to_string()
    }
}

fn collect_properties<I, K, V>(properties: I) -> Properties
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<PropertyValue>,
{
    properties
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

fn anchor(source: &str) -> String {
    format!("^(?:{})$", source)
}

fn unanchor(source: &str) -> &str {
    source
        .strip_prefix("^(?:")
        .and_then(|s| s.strip_suffix(")$"))
        .unwrap_or(source)
}

/// Small built-in table used when no plugin rules are configured
pub fn starter_rules() -> Vec<RuleSpec> {
    fn spec(id: &str, pattern: &str, regex: bool, properties: &[(&str, &str)]) -> RuleSpec {
        RuleSpec {
            id: id.to_string(),
            pattern: pattern.to_string(),
            regex,
            properties: properties
                .iter()
                .map(|(k, v)| (k.to_string(), PropertyValue::Str(v.to_string())))
                .collect(),
            selector: None,
            layer: None,
            priority: 0,
        }
    }

    let mut rules = vec![
        spec("block", "block", false, &[("display", "block")]),
        spec("inline-block", "inline-block", false, &[("display", "inline-block")]),
        spec("flex", "flex", false, &[("display", "flex")]),
        spec("grid", "grid", false, &[("display", "grid")]),
        spec("hidden", "hidden", false, &[("display", "none")]),
        spec("flex-col", "flex-col", false, &[("flex-direction", "column")]),
        spec("items-center", "items-center", false, &[("align-items", "center")]),
        spec("justify-center", "justify-center", false, &[("justify-content", "center")]),
        spec("justify-between", "justify-between", false, &[("justify-content", "space-between")]),
        spec("rounded", "rounded", false, &[("border-radius", "0.25rem")]),
        spec("font-bold", "font-bold", false, &[("font-weight", "700")]),
        spec("p", r"p-(\d+(?:\.\d+)?)", true, &[("padding", "calc($1 * 0.25rem)")]),
        spec("px", r"px-(\d+(?:\.\d+)?)", true, &[
            ("padding-left", "calc($1 * 0.25rem)"),
            ("padding-right", "calc($1 * 0.25rem)"),
        ]),
        spec("py", r"py-(\d+(?:\.\d+)?)", true, &[
            ("padding-top", "calc($1 * 0.25rem)"),
            ("padding-bottom", "calc($1 * 0.25rem)"),
        ]),
        spec("m", r"m-(\d+(?:\.\d+)?)", true, &[("margin", "calc($1 * 0.25rem)")]),
        spec("mt", r"mt-(\d+(?:\.\d+)?)", true, &[("margin-top", "calc($1 * 0.25rem)")]),
        spec("mb", r"mb-(\d+(?:\.\d+)?)", true, &[("margin-bottom", "calc($1 * 0.25rem)")]),
        spec("gap", r"gap-(\d+(?:\.\d+)?)", true, &[("gap", "calc($1 * 0.25rem)")]),
        spec("translate-x", r"translate-x-(\d+)", true, &[("translate", "calc($1 * 0.25rem) 0")]),
        spec("bg-color", r"bg-([a-z]+)-(\d{2,3})", true, &[("background-color", "var(--color-$1-$2)")]),
        spec("bg-named", r"bg-(white|black|transparent)", true, &[("background-color", "var(--color-$1)")]),
        spec("bg-arbitrary", r"bg-\[(.+)\]", true, &[("background-color", "ARBITRARY")]),
        spec("text-color", r"text-([a-z]+)-(\d{2,3})", true, &[("color", "var(--color-$1-$2)")]),
        spec("text-named", r"text-(white|black)", true, &[("color", "var(--color-$1)")]),
        spec("text-size", r"text-(xs|sm|base|lg|xl|2xl|3xl)", true, &[("font-size", "var(--text-$1)")]),
        spec("w-arbitrary", r"w-\[(.+)\]", true, &[("width", "$1")]),
        spec("h-arbitrary", r"h-\[(.+)\]", true, &[("height", "$1")]),
        spec("grid-cols-arbitrary", r"grid-cols-\[(.+)\]", true, &[("grid-template-columns", "$1")]),
        spec("border", "border", false, &[("border-width", "1px")]),
        spec("z", r"z-(\d+)", true, &[("z-index", "$1")]),
    ];

    let mut space_x = spec("space-x", r"space-x-(\d+)", true, &[("margin-left", "calc($1 * 0.25rem)")]);
    space_x.selector = Some("& > :not(:last-child) + *".to_string());
    rules.push(space_x);

    rules
}
