//! Finds the rules whose pattern matches a utility.

use crate::rule::{Rule, RulePattern};
use serde::{Deserialize, Serialize};

/// A rule hit for one class
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
    pub class_name: String,
    pub rule_id: String,
    /// Capture groups 1..n; unmatched optional groups are empty strings
    pub captures: Vec<String>,
}

/// Return every rule matching `utility`, in table order.
///
/// An empty result means the utility is unknown; callers drop it silently.
pub fn match_rules(class_name: &str, utility: &str, rules: &[Rule]) -> Vec<Match> {
    match_with_rules(class_name, utility, rules)
        .into_iter()
        .map(|(_, m)| m)
        .collect()
}

/// Like [`match_rules`], keeping a reference to the rule behind each match
pub fn match_with_rules<'r>(class_name: &str, utility: &str, rules: &'r [Rule]) -> Vec<(&'r Rule, Match)> {
    rules
        .iter()
        .filter_map(|rule| {
            match_pattern(&rule.pattern, utility).map(|captures| {
                (
                    rule,
                    Match {
                        class_name: class_name.to_string(),
                        rule_id: rule.id.clone(),
                        captures,
                    },
                )
            })
        })
        .collect()
}

/// Captures for `utility` if `pattern` matches it.
///
/// Literal patterns match exactly; a literal ending in `-` also matches as a
/// prefix and captures the remainder.
pub fn match_pattern(pattern: &RulePattern, utility: &str) -> Option<Vec<String>> {
    match pattern {
        RulePattern::Literal(literal) => {
            if utility == literal {
                Some(Vec::new())
            } else if literal.ends_with('-') {
                utility
                    .strip_prefix(literal.as_str())
                    .filter(|rest| !rest.is_empty())
                    .map(|rest| vec![rest.to_string()])
            } else {
                None
            }
        }
        RulePattern::Regex(regex) => {
            let caps = regex.captures(utility)?;
            // Patterns are anchored, but guard against a hand-built regex.
            let whole = caps.get(0)?;
            if whole.start() != 0 || whole.end() != utility.len() {
                return None;
            }
            Some(
                caps.iter()
                    .skip(1)
                    .map(|group| group.map(|m| m.as_str().to_string()).unwrap_or_default())
                    .collect(),
            )
        }
    }
}
