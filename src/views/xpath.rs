//! Small xpath subset used by view patch operations.
//!
//! Supported syntax:
//!
//! - `/a/b/c`: child steps from the document root
//! - `//field`: descendant-or-self search at any step
//! - `*`: any element name
//! - `[@attr='value']`: attribute equality predicate (single or double
//!   quotes)
//! - `[3]`: 1-based positional predicate, applied after the other filters
//!
//! Matches are returned as child-index paths relative to the root element,
//! so callers can reach both a matched node and its parent for structural
//! edits.

use crate::core::error::ChassisError;
use crate::views::xml::{Element, Node};

#[derive(Debug, Clone, PartialEq)]
enum Axis {
    Child,
    Descendant,
}

#[derive(Debug, Clone)]
struct Step {
    axis: Axis,
    /// `None` matches any element (`*`).
    tag: Option<String>,
    attr: Option<(String, String)>,
    index: Option<usize>,
}

/// A location of a matched element: child indices from the root.
/// An empty path addresses the root element itself.
pub type MatchPath = Vec<usize>;

pub fn resolve(root: &Element, xpath: &str) -> Result<Vec<MatchPath>, ChassisError> {
    let steps = parse(xpath)?;

    // Candidate set starts at the root; each step narrows or expands it.
    let mut candidates: Vec<MatchPath> = vec![Vec::new()];
    for step in &steps {
        let mut next: Vec<MatchPath> = Vec::new();
        for candidate in &candidates {
            let context = node_at(root, candidate);
            let mut found: Vec<MatchPath> = Vec::new();
            match step.axis {
                Axis::Child => collect_children(context, candidate, step, &mut found),
                Axis::Descendant => collect_descendants(context, candidate, step, &mut found),
            }
            if let Some(n) = step.index {
                // Positional predicates are 1-based and count within this
                // context node's matches.
                if n >= 1 && n <= found.len() {
                    next.push(found[n - 1].clone());
                }
            } else {
                next.extend(found);
            }
        }
        candidates = next;
    }
    // Lexicographic order on index paths is document order.
    candidates.sort();
    candidates.dedup();
    Ok(candidates)
}

fn node_at<'a>(root: &'a Element, path: &[usize]) -> &'a Element {
    let mut current = root;
    for &index in path {
        match &current.children[index] {
            Node::Element(el) => current = el,
            Node::Text(_) => unreachable!("match paths only address elements"),
        }
    }
    current
}

fn step_matches(el: &Element, step: &Step) -> bool {
    if let Some(tag) = &step.tag {
        if el.tag != *tag {
            return false;
        }
    }
    if let Some((name, value)) = &step.attr {
        if el.attr(name) != Some(value.as_str()) {
            return false;
        }
    }
    true
}

fn collect_children(context: &Element, base: &[usize], step: &Step, out: &mut Vec<MatchPath>) {
    for (index, node) in context.children.iter().enumerate() {
        if let Node::Element(el) = node {
            if step_matches(el, step) {
                let mut path = base.to_vec();
                path.push(index);
                out.push(path);
            }
        }
    }
}

fn collect_descendants(context: &Element, base: &[usize], step: &Step, out: &mut Vec<MatchPath>) {
    for (index, node) in context.children.iter().enumerate() {
        if let Node::Element(el) = node {
            let mut path = base.to_vec();
            path.push(index);
            if step_matches(el, step) {
                out.push(path.clone());
            }
            collect_descendants(el, &path, step, out);
        }
    }
}

fn parse(xpath: &str) -> Result<Vec<Step>, ChassisError> {
    let invalid = |message: String| ChassisError::Validation(format!(
        "invalid xpath '{}': {}",
        xpath, message
    ));

    let mut rest = xpath.trim();
    if rest.is_empty() {
        return Err(invalid("empty expression".to_string()));
    }
    let mut steps = Vec::new();

    while !rest.is_empty() {
        let axis = if let Some(stripped) = rest.strip_prefix("//") {
            rest = stripped;
            Axis::Descendant
        } else if let Some(stripped) = rest.strip_prefix('/') {
            rest = stripped;
            Axis::Child
        } else if steps.is_empty() {
            // A bare leading name is treated as a child of the root.
            Axis::Child
        } else {
            return Err(invalid(format!("expected '/' before '{}'", rest)));
        };

        let step_end = rest
            .char_indices()
            .find(|(_, c)| *c == '/')
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        // Don't split inside a predicate: '/' is not allowed there by this
        // subset, so a plain scan is enough.
        let (step_str, remainder) = rest.split_at(step_end);
        rest = remainder;

        if step_str.is_empty() {
            return Err(invalid("empty step".to_string()));
        }
        steps.push(parse_step(step_str, &invalid, axis)?);
    }
    Ok(steps)
}

fn parse_step(
    step_str: &str,
    invalid: &impl Fn(String) -> ChassisError,
    axis: Axis,
) -> Result<Step, ChassisError> {
    let (name_part, predicates) = match step_str.find('[') {
        Some(i) => (&step_str[..i], &step_str[i..]),
        None => (step_str, ""),
    };

    if name_part.is_empty() {
        return Err(invalid("step is missing an element name".to_string()));
    }
    let tag = if name_part == "*" {
        None
    } else {
        if !name_part
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == '.')
        {
            return Err(invalid(format!("invalid element name '{}'", name_part)));
        }
        Some(name_part.to_string())
    };

    let mut step = Step {
        axis,
        tag,
        attr: None,
        index: None,
    };

    let mut rest = predicates;
    while !rest.is_empty() {
        if !rest.starts_with('[') {
            return Err(invalid(format!("unexpected '{}'", rest)));
        }
        let close = rest
            .find(']')
            .ok_or_else(|| invalid("unterminated predicate".to_string()))?;
        let body = &rest[1..close];
        rest = &rest[close + 1..];

        if let Some(attr_body) = body.strip_prefix('@') {
            let eq = attr_body
                .find('=')
                .ok_or_else(|| invalid(format!("predicate '[{}]' is not supported", body)))?;
            let name = attr_body[..eq].trim();
            let raw_value = attr_body[eq + 1..].trim();
            let value = raw_value
                .strip_prefix('\'')
                .and_then(|v| v.strip_suffix('\''))
                .or_else(|| {
                    raw_value
                        .strip_prefix('"')
                        .and_then(|v| v.strip_suffix('"'))
                })
                .ok_or_else(|| invalid(format!("attribute value in '[{}]' must be quoted", body)))?;
            if step.attr.is_some() {
                return Err(invalid(
                    "at most one attribute predicate per step".to_string(),
                ));
            }
            step.attr = Some((name.to_string(), value.to_string()));
        } else if let Ok(n) = body.trim().parse::<usize>() {
            if step.index.is_some() {
                return Err(invalid(
                    "at most one positional predicate per step".to_string(),
                ));
            }
            step.index = Some(n);
        } else {
            return Err(invalid(format!("predicate '[{}]' is not supported", body)));
        }
    }

    Ok(step)
}
