//! Whole-stylesheet passes: block splitting, dedup-merge, tree shaking,
//! minification and the generated-file header.

use crate::regex_cache::RegexCache;
use chrono::Utc;
use regex::Regex;
use std::borrow::Cow;
use std::collections::HashSet;

/// Class names that only act as ancestor hooks (`.group:hover .x`)
const PARENT_MARKERS: &[&str] = &["group"];

/// Comment type for CSS minification
#[derive(Debug, Clone, Copy, PartialEq)]
enum CommentType {
    None,
    Block,
}

/// One top-level CSS statement: a rule or at-rule with a `{}` body, or a
/// bodiless statement such as `@import "x";`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CssBlock<'a> {
    pub prelude: &'a str,
    pub body: Option<&'a str>,
    pub text: &'a str,
}

/// Split a stylesheet into its top-level blocks. Comments between blocks are
/// skipped and backslash escapes in selectors are honoured.
pub fn split_blocks(css: &str) -> Vec<CssBlock<'_>> {
    let bytes = css.as_bytes();
    let mut blocks = Vec::new();
    let mut start: Option<usize> = None;
    let mut body_start = 0;
    let mut depth = 0usize;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\\' => {
                start.get_or_insert(i);
                i += 2;
                continue;
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = match css[i + 2..].find("*/") {
                    Some(end) => i + 2 + end + 2,
                    None => bytes.len(),
                };
                continue;
            }
            b'{' => {
                start.get_or_insert(i);
                if depth == 0 {
                    body_start = i + 1;
                }
                depth += 1;
            }
            b'}' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0 {
                        if let Some(s) = start.take() {
                            blocks.push(CssBlock {
                                prelude: css[s..body_start - 1].trim(),
                                body: Some(&css[body_start..i]),
                                text: &css[s..=i],
                            });
                        }
                    }
                }
            }
            b';' if depth == 0 => {
                if let Some(s) = start.take() {
                    let text = css[s..=i].trim();
                    blocks.push(CssBlock { prelude: text, body: None, text });
                }
            }
            c if depth == 0 && start.is_none() && !c.is_ascii_whitespace() => start = Some(i),
            _ => {}
        }
        i += 1;
    }

    // Unterminated trailing text is kept verbatim.
    if let Some(s) = start {
        let text = css[s..].trim();
        if !text.is_empty() {
            blocks.push(CssBlock { prelude: text, body: None, text });
        }
    }

    blocks
}

/// Append the blocks of `addition` that `existing` does not already contain
pub fn merge_css(existing: &str, addition: &str) -> String {
    let mut seen: HashSet<String> = split_blocks(existing)
        .iter()
        .map(|block| normalize_whitespace(block.text))
        .collect();

    let mut merged = existing.trim().to_string();
    for block in split_blocks(addition) {
        if seen.insert(normalize_whitespace(block.text)) {
            if !merged.is_empty() {
                merged.push_str("\n\n");
            }
            merged.push_str(block.text);
        }
    }
    merged
}

/// Remove rules whose class selectors are all outside `live`. Rules nested in
/// at-rules are shaken too; at-rules left empty are dropped. Rules with no
/// class selector at all are kept.
pub fn tree_shake(css: &str, live: &HashSet<String>, regex_cache: &RegexCache) -> String {
    let Some(class_selector) = regex_cache.builtin("class-selector") else {
        tracing::warn!("class selector pattern unavailable, skipping tree shaking");
        return css.to_string();
    };

    let (kept, removed) = shake_blocks(css, live, &class_selector);
    if removed > 0 {
        tracing::debug!("tree shaking removed {} rules", removed);
    }
    kept.join("\n\n")
}

fn shake_blocks<'a>(css: &'a str, live: &HashSet<String>, class_selector: &Regex) -> (Vec<Cow<'a, str>>, usize) {
    let mut kept = Vec::new();
    let mut removed = 0;

    for block in split_blocks(css) {
        match block.body {
            Some(body) if block.prelude.starts_with('@') => {
                let (inner, inner_removed) = shake_blocks(body, live, class_selector);
                removed += inner_removed;
                if inner_removed == 0 {
                    kept.push(Cow::Borrowed(block.text));
                } else if !inner.is_empty() {
                    kept.push(Cow::Owned(format!(
                        "{} {{\n  {}\n}}",
                        block.prelude,
                        inner.join("\n  ")
                    )));
                }
            }
            Some(_) => {
                if selector_is_live(block.prelude, live, class_selector) {
                    kept.push(Cow::Borrowed(block.text));
                } else {
                    removed += 1;
                }
            }
            None => kept.push(Cow::Borrowed(block.text)),
        }
    }

    (kept, removed)
}

fn selector_is_live(selector: &str, live: &HashSet<String>, class_selector: &Regex) -> bool {
    let mut classes: Vec<String> = class_selector
        .captures_iter(selector)
        .filter_map(|caps| caps.get(1).map(|m| unescape_css(m.as_str())))
        .collect();

    if classes.is_empty() {
        return true;
    }
    if classes.len() > 1 {
        classes.retain(|c| !PARENT_MARKERS.contains(&c.as_str()));
    }
    classes.iter().any(|c| live.contains(c))
}

/// Undo CSS identifier escaping, including hex escapes like `\32 `
pub fn unescape_css(escaped: &str) -> String {
    let mut out = String::with_capacity(escaped.len());
    let mut chars = escaped.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let mut hex = String::new();
        while hex.len() < 6 {
            match chars.peek() {
                Some(h) if h.is_ascii_hexdigit() => {
                    hex.push(*h);
                    chars.next();
                }
                _ => break,
            }
        }
        if hex.is_empty() {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            if let Some(decoded) = u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                out.push(decoded);
            }
            if chars.peek() == Some(&' ') {
                chars.next();
            }
        }
    }
    out
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Generate CSS header comment
pub fn generate_css_header(class_count: usize, minified: bool) -> String {
    let now = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
    if minified {
        if class_count == 0 {
            "/* tailwind-jit: No classes found */".to_string()
        } else {
            format!("/* Generated by tailwind-jit v{} at {} */", env!("CARGO_PKG_VERSION"), now)
        }
    } else if class_count == 0 {
        format!(
            r#"/**
 * Generated by tailwind-jit v{}
 * Generation time: {}
 *
 * No utility classes found
 */
"#,
            env!("CARGO_PKG_VERSION"),
            now
        )
    } else {
        format!(
            r#"/**
 * Generated by tailwind-jit v{}
 * Generation time: {}
 * Classes: {}
 *
 * DO NOT EDIT - This file is auto-generated.
 */

"#,
            env!("CARGO_PKG_VERSION"),
            now,
            class_count
        )
    }
}

/// Collapse whitespace and drop comments. A comment at the very start of the
/// stylesheet is treated as a header and preserved.
pub fn minify_css(css: &str) -> String {
    let mut result = String::with_capacity(css.len());
    let mut prev_char = ' ';
    let mut in_comment = false;
    let mut comment_type = CommentType::None;

    let chars: Vec<char> = css.chars().collect();
    let leading_ws = chars.iter().take_while(|c| c.is_whitespace()).count();
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];

        if !in_comment && ch == '/' && chars.get(i + 1) == Some(&'*') {
            if i == leading_ws {
                result.push_str("/*");
                i += 2;
                while i < chars.len() {
                    result.push(chars[i]);
                    if chars[i] == '*' && chars.get(i + 1) == Some(&'/') {
                        result.push('/');
                        i += 2;
                        break;
                    }
                    i += 1;
                }
                prev_char = '/';
                continue;
            }
            in_comment = true;
            comment_type = CommentType::Block;
            i += 2;
            continue;
        }

        if in_comment {
            if comment_type == CommentType::Block && ch == '*' && chars.get(i + 1) == Some(&'/') {
                in_comment = false;
                comment_type = CommentType::None;
                i += 2;
                continue;
            }
            i += 1;
            continue;
        }

        if ch == '\\' {
            // Escapes are copied through untouched, including an escaped space.
            result.push(ch);
            if let Some(next) = chars.get(i + 1) {
                result.push(*next);
                prev_char = *next;
            }
            i += 2;
            continue;
        }

        if ch.is_whitespace() {
            if !prev_char.is_whitespace() && !"{};:,".contains(prev_char) {
                if let Some(&next) = chars.get(i + 1) {
                    if !"{};:,".contains(next) && !next.is_whitespace() {
                        result.push(' ');
                        prev_char = ' ';
                    }
                }
            }
        } else {
            result.push(ch);
            prev_char = ch;
        }

        i += 1;
    }

    result
}
