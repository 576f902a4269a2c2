//! Turns a rule match into CSS rule text.
//!
//! Value transforms run in a fixed order: arbitrary-value substitution,
//! opacity, negation, then `!important`. The selector is built from the
//! escaped class name and folded through the class's variants.

use crate::matcher::Match;
use crate::parser::{normalize_arbitrary_value, ParsedClass};
use crate::rule::Rule;

/// Property value replaced wholesale by the arbitrary payload
pub const ARBITRARY_MARKER: &str = "ARBITRARY";

/// Responsive breakpoints and their minimum widths
pub const BREAKPOINTS: &[(&str, &str)] = &[
    ("sm", "640px"),
    ("md", "768px"),
    ("lg", "1024px"),
    ("xl", "1280px"),
    ("2xl", "1536px"),
];

const PSEUDO_VARIANTS: &[(&str, &str)] = &[
    ("hover", ":hover"),
    ("focus", ":focus"),
    ("active", ":active"),
    ("visited", ":visited"),
    ("first", ":first-child"),
    ("last", ":last-child"),
    ("odd", ":nth-child(odd)"),
    ("even", ":nth-child(even)"),
    ("disabled", ":disabled"),
    ("focus-within", ":focus-within"),
    ("focus-visible", ":focus-visible"),
    ("checked", ":checked"),
    ("first-of-type", ":first-of-type"),
    ("last-of-type", ":last-of-type"),
    ("placeholder", "::placeholder"),
    ("before", "::before"),
    ("after", "::after"),
];

const PARENT_VARIANTS: &[(&str, &str)] = &[
    ("group-hover", ".group:hover"),
    ("group-focus", ".group:focus"),
];

/// What a single variant does to the rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VariantEffect {
    /// Append a pseudo-class or pseudo-element
    Pseudo(&'static str),
    /// Prefix the selector with an ancestor selector
    Parent(&'static str),
    /// Wrap the rule in an at-rule
    Media(String),
    /// Unrecognized variants are ignored
    Unknown,
}

pub fn resolve_variant(variant: &str) -> VariantEffect {
    if let Some((_, pseudo)) = PSEUDO_VARIANTS.iter().find(|(name, _)| *name == variant) {
        return VariantEffect::Pseudo(pseudo);
    }
    if let Some((_, parent)) = PARENT_VARIANTS.iter().find(|(name, _)| *name == variant) {
        return VariantEffect::Parent(parent);
    }
    match variant {
        "dark" => return VariantEffect::Media("@media (prefers-color-scheme: dark)".to_string()),
        "print" => return VariantEffect::Media("@media print".to_string()),
        _ => {}
    }
    if let Some(width) = breakpoint_width(variant) {
        return VariantEffect::Media(format!("@media (min-width: {})", width));
    }
    if let Some(custom) = variant.strip_prefix('@') {
        let width = breakpoint_width(custom).map(str::to_string).or_else(|| {
            let inner = custom
                .strip_prefix('[')
                .and_then(|s| s.strip_suffix(']'))
                .unwrap_or(custom);
            (!inner.is_empty()).then(|| normalize_arbitrary_value(inner))
        });
        if let Some(width) = width {
            return VariantEffect::Media(format!("@media (min-width: {})", width));
        }
    }
    VariantEffect::Unknown
}

fn breakpoint_width(name: &str) -> Option<&'static str> {
    BREAKPOINTS
        .iter()
        .find(|(bp, _)| *bp == name)
        .map(|(_, width)| *width)
}

/// Render the CSS for one match, or `None` when the rule yields no
/// declarations.
pub fn generate(class_name: &str, parsed: &ParsedClass, rule: &Rule, m: &Match) -> Option<String> {
    let properties = rule.resolve_properties(&m.captures);
    if properties.is_empty() {
        return None;
    }

    let opacity = parsed.opacity.as_deref().and_then(parse_opacity);

    let declarations: Vec<String> = properties
        .iter()
        .map(|(property, value)| {
            let mut value = value.render();

            if let Some(arbitrary) = &parsed.arbitrary {
                if value == ARBITRARY_MARKER {
                    value = normalize_arbitrary_value(arbitrary);
                } else if value.contains("$1") {
                    value = value.replace("$1", &normalize_arbitrary_value(arbitrary));
                }
            }
            value = substitute_captures(&value, &m.captures);

            if let Some(percent) = opacity {
                if value.contains("var(--") {
                    value = format!("color-mix(in srgb, {} {}%, transparent)", value, percent);
                }
            }

            if parsed.negative {
                value = negate(&value);
            }

            if parsed.important {
                format!("{}: {} !important;", property, value)
            } else {
                format!("{}: {};", property, value)
            }
        })
        .collect();

    let mut selector = format!(".{}", escape_class_name(class_name));
    let mut wrappers = Vec::new();

    for variant in &parsed.variants {
        match resolve_variant(variant) {
            VariantEffect::Pseudo(pseudo) => selector.push_str(pseudo),
            VariantEffect::Parent(parent) => selector = format!("{} {}", parent, selector),
            VariantEffect::Media(at_rule) => wrappers.push(at_rule),
            VariantEffect::Unknown => {
                tracing::trace!("ignoring unknown variant '{}' on '{}'", variant, class_name);
            }
        }
    }

    if let Some(transform) = &rule.selector {
        selector = transform.apply(&selector);
    }

    let mut css = render_block(&selector, &declarations);
    for at_rule in wrappers.iter().rev() {
        css = wrap(at_rule, &css);
    }
    if let Some(layer) = &rule.layer {
        css = wrap(&format!("@layer {}", layer), &css);
    }

    Some(css)
}

/// Escape a class name for use in a selector
pub fn escape_class_name(class_name: &str) -> String {
    let mut escaped = String::with_capacity(class_name.len() + 8);
    for (i, c) in class_name.chars().enumerate() {
        if i == 0 && c.is_ascii_digit() {
            // Identifiers can't start with a digit; use the code point form.
            escaped.push_str(&format!("\\3{} ", c));
        } else if c.is_ascii_alphanumeric() || c == '-' || c == '_' || !c.is_ascii() {
            escaped.push(c);
        } else {
            escaped.push('\\');
            escaped.push(c);
        }
    }
    escaped
}

/// Opacity modifier as an integer percentage: `50`, `[35%]` and `[0.35]`
/// all work
pub fn parse_opacity(raw: &str) -> Option<u32> {
    let bracketed = raw.starts_with('[') && raw.ends_with(']');
    let inner = if bracketed { &raw[1..raw.len() - 1] } else { raw };
    let (number, explicit_percent) = match inner.strip_suffix('%') {
        Some(n) => (n, true),
        None => (inner, false),
    };
    let value: f64 = number.trim().parse().ok()?;
    let percent = if bracketed && !explicit_percent && value <= 1.0 && number.contains('.') {
        value * 100.0
    } else {
        value
    };
    (percent >= 0.0).then(|| percent.round().min(100.0) as u32)
}

/// Replace `$1`..`$n` with capture groups, longest placeholders first
fn substitute_captures(value: &str, captures: &[String]) -> String {
    if !value.contains('$') {
        return value.to_string();
    }
    let mut out = value.to_string();
    for (i, capture) in captures.iter().enumerate().rev() {
        out = out.replace(&format!("${}", i + 1), capture);
    }
    out
}

/// Flip the sign of a numeric value. `calc(...)` expressions are negated by
/// multiplying with -1; anything else is left alone.
fn negate(value: &str) -> String {
    let unsigned = value.strip_prefix('-').unwrap_or(value);
    if unsigned.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        if value.starts_with('-') {
            unsigned.to_string()
        } else {
            format!("-{}", value)
        }
    } else if value.starts_with("calc(") && value.ends_with(')') {
        format!("calc({} * -1)", &value[5..value.len() - 1])
    } else {
        value.to_string()
    }
}

fn render_block(selector: &str, declarations: &[String]) -> String {
    let mut css = format!("{} {{\n", selector);
    for declaration in declarations {
        css.push_str("  ");
        css.push_str(declaration);
        css.push('\n');
    }
    css.push('}');
    css
}

fn wrap(at_rule: &str, body: &str) -> String {
    let indented: Vec<String> = body.lines().map(|line| format!("  {}", line)).collect();
    format!("{} {{\n{}\n}}", at_rule, indented.join("\n"))
}
