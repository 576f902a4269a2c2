//! Class-name parsing.
//!
//! Turns one raw utility string such as `hover:dark:!-mt-[3px]` into a
//! [`ParsedClass`], and expands `variant:(a b c)` group syntax into plain
//! class names before parsing.

use crate::regex_cache::RegexCache;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Longest class name the parser will look at
pub const MAX_CLASS_LENGTH: usize = 500;

/// Characters of `original` kept when an oversized input is rejected
const TRUNCATED_ORIGINAL_LENGTH: usize = 100;

/// Nesting limit for `variant:(...)` groups
pub const MAX_GROUP_DEPTH: usize = 10;

/// Structured form of a single utility class
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedClass {
    /// Input as received (trimmed)
    pub original: String,

    /// Variant prefixes in left-to-right order, duplicates preserved
    pub variants: Vec<String>,

    /// Base utility with `!`, `-` and `/opacity` stripped
    pub utility: String,

    pub negative: bool,

    pub important: bool,

    /// Opacity modifier without the slash, e.g. `50` or `[0.35]`
    pub opacity: Option<String>,

    /// Raw contents of a trailing `[...]` payload
    pub arbitrary: Option<String>,
}

impl ParsedClass {
    fn empty(original: String) -> Self {
        Self {
            original,
            ..Default::default()
        }
    }

    /// True when parsing produced no utility
    pub fn is_empty(&self) -> bool {
        self.utility.is_empty()
    }
}

/// Parse one raw class name. Never fails: empty or oversized input yields an
/// empty [`ParsedClass`].
///
/// A single leading `-` is always read as the negative flag, so `--custom`
/// parses as a negative `-custom`. Use [`is_negative`] where the CSS
/// custom-property prefix must be told apart.
pub fn parse(raw: &str) -> ParsedClass {
    parse_with(raw, split_opacity)
}

/// Parser bound to a [`RegexCache`] for its opacity-suffix pattern.
///
/// Produces the same records as [`parse`].
#[derive(Clone)]
pub struct ClassNameParser {
    regex_cache: Arc<RegexCache>,
}

impl ClassNameParser {
    pub fn new(regex_cache: Arc<RegexCache>) -> Self {
        Self { regex_cache }
    }

    pub fn parse(&self, raw: &str) -> ParsedClass {
        match self.regex_cache.builtin("opacity-suffix") {
            Some(regex) => parse_with(raw, |utility| {
                let caps = regex.captures(utility)?;
                let whole = caps.get(0)?;
                let value = caps.get(1)?.as_str();
                if bracket_depth_at(utility, whole.start()) != 0 || is_fraction(utility, whole.start()) {
                    return None;
                }
                Some((&utility[..whole.start()], value))
            }),
            None => parse(raw),
        }
    }

    /// Expand variant groups in a whitespace-separated class list and parse
    /// every resulting class
    pub fn parse_all(&self, input: &str) -> Vec<ParsedClass> {
        expand_variant_groups(input)
            .iter()
            .map(|class| self.parse(class))
            .filter(|parsed| !parsed.is_empty())
            .collect()
    }
}

fn parse_with<F>(raw: &str, opacity: F) -> ParsedClass
where
    F: for<'u> Fn(&'u str) -> Option<(&'u str, &'u str)>,
{
    let trimmed = raw.trim();

    if trimmed.is_empty() {
        return ParsedClass::empty(String::new());
    }

    if trimmed.len() > MAX_CLASS_LENGTH {
        tracing::warn!(
            "class name of {} bytes exceeds the {} byte limit; ignoring",
            trimmed.len(),
            MAX_CLASS_LENGTH
        );
        let truncated: String = trimmed.chars().take(TRUNCATED_ORIGINAL_LENGTH).collect();
        return ParsedClass::empty(truncated);
    }

    let mut segments = split_variants(trimmed);
    let mut utility = segments.pop().unwrap_or_default();
    let variants = segments;

    let mut important = false;
    if let Some(rest) = utility.strip_prefix('!') {
        important = true;
        utility = rest.to_string();
    }

    let mut negative = false;
    if let Some(rest) = utility.strip_prefix('-') {
        negative = true;
        utility = rest.to_string();
    }

    let mut opacity_value = None;
    if let Some((base, value)) = opacity(&utility) {
        let base = base.to_string();
        opacity_value = Some(value.to_string());
        utility = base;
    }

    let arbitrary = trailing_arbitrary(&utility).map(str::to_string);

    ParsedClass {
        original: trimmed.to_string(),
        variants,
        utility,
        negative,
        important,
        opacity: opacity_value,
        arbitrary,
    }
}

/// Split on `:` outside of brackets
pub fn split_variants(class: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;

    for (i, c) in class.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            ':' if depth == 0 => {
                parts.push(class[start..i].to_string());
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(class[start..].to_string());
    parts
}

/// True for a leading single `-`; `--name` is a custom property, not a
/// negative value
pub fn is_negative(class: &str) -> bool {
    class.starts_with('-') && !class.starts_with("--")
}

/// Turn underscores into spaces; `\_` stays a literal underscore
pub fn normalize_arbitrary_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'_') => {
                chars.next();
                out.push('_');
            }
            '_' => out.push(' '),
            other => out.push(other),
        }
    }
    out
}

/// Hand-scanned opacity detection used by [`parse`]
fn split_opacity(utility: &str) -> Option<(&str, &str)> {
    let slash = last_top_level_slash(utility)?;
    let value = &utility[slash + 1..];
    if value.is_empty() || is_fraction(utility, slash) {
        return None;
    }

    let valid = if value.starts_with('[') {
        value.ends_with(']') && value.len() > 2
    } else {
        value.chars().all(|c| c.is_ascii_digit() || c == '.')
            && value.chars().next().is_some_and(|c| c.is_ascii_digit())
    };

    valid.then(|| (&utility[..slash], value))
}

fn last_top_level_slash(utility: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut found = None;
    for (i, c) in utility.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            '/' if depth == 0 => found = Some(i),
            _ => {}
        }
    }
    found
}

fn bracket_depth_at(s: &str, pos: usize) -> usize {
    let mut depth = 0usize;
    for c in s[..pos].chars() {
        match c {
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    depth
}

/// `w-1/2`, `basis-3/4`: a numerator smaller than a denominator of at most 12
/// is a fraction, not an opacity modifier
fn is_fraction(utility: &str, slash: usize) -> bool {
    let numerator = utility[..slash].rsplit('-').next().unwrap_or("");
    let denominator = &utility[slash + 1..];
    match (numerator.parse::<u32>(), denominator.parse::<u32>()) {
        (Ok(n), Ok(d)) => d > 0 && d <= 12 && n < d,
        _ => false,
    }
}

/// Contents of a trailing `[...]`, matching nested brackets
fn trailing_arbitrary(utility: &str) -> Option<&str> {
    if !utility.ends_with(']') {
        return None;
    }
    let mut depth = 0usize;
    for (i, c) in utility.char_indices().rev() {
        match c {
            ']' => depth += 1,
            '[' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&utility[i + 1..utility.len() - 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Expand `variant:(a b c)` groups into `variant:a variant:b variant:c`.
///
/// Groups nest; past [`MAX_GROUP_DEPTH`] levels the remaining text is kept as
/// one unexpanded token. Unbalanced groups are kept literally.
pub fn expand_variant_groups(input: &str) -> Vec<String> {
    let mut out = Vec::new();
    expand_into(input, "", 0, &mut out);
    out
}

fn expand_into(input: &str, prefix: &str, depth: usize, out: &mut Vec<String>) {
    for token in split_top_level(input) {
        match split_group(token) {
            Some((variant, inner)) if depth < MAX_GROUP_DEPTH => {
                let nested_prefix = format!("{}{}", prefix, variant);
                expand_into(inner, &nested_prefix, depth + 1, out);
            }
            Some(_) => {
                tracing::warn!(
                    "variant group nesting exceeds {} levels; leaving '{}' unexpanded",
                    MAX_GROUP_DEPTH,
                    token
                );
                out.push(format!("{}{}", prefix, token));
            }
            None => out.push(format!("{}{}", prefix, token)),
        }
    }
}

/// Split on whitespace outside parentheses and brackets
fn split_top_level(input: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut parens = 0usize;
    let mut brackets = 0usize;
    let mut start: Option<usize> = None;

    for (i, c) in input.char_indices() {
        match c {
            '(' => parens += 1,
            ')' => parens = parens.saturating_sub(1),
            '[' => brackets += 1,
            ']' => brackets = brackets.saturating_sub(1),
            _ => {}
        }

        if c.is_whitespace() && parens == 0 && brackets == 0 {
            if let Some(s) = start.take() {
                tokens.push(&input[s..i]);
            }
        } else if start.is_none() && !c.is_whitespace() {
            start = Some(i);
        }
    }
    if let Some(s) = start {
        tokens.push(&input[s..]);
    }
    tokens
}

/// `hover:(a b)` -> `("hover:", "a b")` when the group is balanced and closes
/// at the end of the token
fn split_group(token: &str) -> Option<(&str, &str)> {
    let mut brackets = 0usize;
    let mut open = None;
    let mut prev = '\0';

    for (i, c) in token.char_indices() {
        match c {
            '[' => brackets += 1,
            ']' => brackets = brackets.saturating_sub(1),
            '(' if brackets == 0 && prev == ':' => {
                open = Some(i);
                break;
            }
            _ => {}
        }
        prev = c;
    }

    let open = open?;
    if !token.ends_with(')') {
        return None;
    }

    let mut depth = 0usize;
    for (i, c) in token[open..].char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    let close = open + i;
                    return (close == token.len() - 1)
                        .then(|| (&token[..open], &token[open + 1..close]));
                }
            }
            _ => {}
        }
    }
    None
}
