//! Structural edits against a view document tree.
//!
//! A patch operation addresses exactly one element via an xpath match and
//! inserts, replaces or removes nodes at that position. Matching zero or
//! more than one element is always an error; the engine never guesses.

use crate::core::error::ChassisError;
use crate::views::xml::{Element, Node};
use crate::views::xpath;

pub const PATCH_ACTIONS: &[&str] = &[
    "insert_before",
    "insert_after",
    "insert_inside",
    "replace",
    "remove",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchAction {
    InsertBefore,
    InsertAfter,
    InsertInside,
    Replace,
    Remove,
}

impl PatchAction {
    pub fn parse(action: &str) -> Option<PatchAction> {
        match action {
            "insert_before" => Some(PatchAction::InsertBefore),
            "insert_after" => Some(PatchAction::InsertAfter),
            "insert_inside" => Some(PatchAction::InsertInside),
            "replace" => Some(PatchAction::Replace),
            "remove" => Some(PatchAction::Remove),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PatchOp {
    pub xpath: String,
    pub action: PatchAction,
    /// Insertion index for `InsertInside`; negative or absent means append.
    pub position: Option<i64>,
    pub payload: Vec<Node>,
    /// Source line of the op, for error reporting.
    pub line: usize,
}

/// Apply one patch operation to `root` (the synthetic view wrapper).
/// `fragment` labels the contributing modify fragment in errors.
pub fn apply_patch(root: &mut Element, op: &PatchOp, fragment: &str) -> Result<(), ChassisError> {
    let patch_error = |message: &str| ChassisError::Patch {
        fragment: fragment.to_string(),
        xpath: op.xpath.clone(),
        message: message.to_string(),
    };

    let matches = xpath::resolve(root, &op.xpath).map_err(|e| ChassisError::Patch {
        fragment: fragment.to_string(),
        xpath: op.xpath.clone(),
        message: e.to_string(),
    })?;

    if matches.len() > 1 {
        return Err(patch_error(
            "xpath matched more than one element in the target view",
        ));
    }
    let path = matches
        .first()
        .ok_or_else(|| patch_error("xpath did not match any elements in the target view"))?;

    match op.action {
        PatchAction::Remove => {
            let (parent, index) = parent_of(root, path);
            parent.children.remove(index);
        }
        PatchAction::Replace => {
            let payload = op.payload.clone();
            let (parent, index) = parent_of(root, path);
            parent.children.remove(index);
            insert_all(parent, index, payload);
        }
        PatchAction::InsertBefore => {
            let payload = op.payload.clone();
            let (parent, index) = parent_of(root, path);
            insert_all(parent, index, payload);
        }
        PatchAction::InsertAfter => {
            let payload = op.payload.clone();
            let (parent, index) = parent_of(root, path);
            insert_all(parent, index + 1, payload);
        }
        PatchAction::InsertInside => {
            let payload = op.payload.clone();
            let target = element_at(root, path);
            let index = match op.position {
                Some(p) if p >= 0 => (p as usize).min(target.children.len()),
                _ => target.children.len(),
            };
            insert_all(target, index, payload);
        }
    }
    Ok(())
}

fn insert_all(parent: &mut Element, mut index: usize, payload: Vec<Node>) {
    for node in payload {
        parent.children.insert(index, node);
        index += 1;
    }
}

fn element_at<'a>(root: &'a mut Element, path: &[usize]) -> &'a mut Element {
    let mut current = root;
    for &index in path {
        match &mut current.children[index] {
            Node::Element(el) => current = el,
            Node::Text(_) => unreachable!("match paths only address elements"),
        }
    }
    current
}

/// Navigate to the parent of the matched node. `path` must be non-empty.
fn parent_of<'a>(root: &'a mut Element, path: &[usize]) -> (&'a mut Element, usize) {
    let (last, parents) = path.split_last().expect("non-root match path");
    (element_at(root, parents), *last)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::views::xml::parse_document;

    fn wrap(body: &str) -> Element {
        parse_document(&format!("<view>{}</view>", body), "test.xml").unwrap()
    }

    fn payload(markup: &str) -> Vec<Node> {
        parse_document(&format!("<p>{}</p>", markup), "test.xml")
            .unwrap()
            .children
    }

    fn op(xpath: &str, action: PatchAction, position: Option<i64>, body: &str) -> PatchOp {
        PatchOp {
            xpath: xpath.to_string(),
            action,
            position,
            payload: payload(body),
            line: 1,
        }
    }

    #[test]
    fn test_insert_after() {
        let mut root = wrap("<form><field name=\"x\"/></form>");
        apply_patch(
            &mut root,
            &op(
                "//field[@name='x']",
                PatchAction::InsertAfter,
                None,
                "<field name=\"y\"/>",
            ),
            "ext.m",
        )
        .unwrap();
        assert_eq!(
            root.inner_markup(),
            "<form><field name=\"x\"/><field name=\"y\"/></form>"
        );
    }

    #[test]
    fn test_insert_before_preserves_payload_order() {
        let mut root = wrap("<form><field name=\"x\"/></form>");
        apply_patch(
            &mut root,
            &op(
                "//field[@name='x']",
                PatchAction::InsertBefore,
                None,
                "<a/><b/>",
            ),
            "ext.m",
        )
        .unwrap();
        assert_eq!(
            root.inner_markup(),
            "<form><a/><b/><field name=\"x\"/></form>"
        );
    }

    #[test]
    fn test_replace() {
        let mut root = wrap("<form><field name=\"x\"/><field name=\"z\"/></form>");
        apply_patch(
            &mut root,
            &op(
                "//field[@name='x']",
                PatchAction::Replace,
                None,
                "<field name=\"y\"/>",
            ),
            "ext.m",
        )
        .unwrap();
        assert_eq!(
            root.inner_markup(),
            "<form><field name=\"y\"/><field name=\"z\"/></form>"
        );
    }

    #[test]
    fn test_remove() {
        let mut root = wrap("<form><field name=\"x\"/><field name=\"y\"/></form>");
        apply_patch(
            &mut root,
            &op("//field[@name='x']", PatchAction::Remove, None, ""),
            "ext.m",
        )
        .unwrap();
        assert_eq!(root.inner_markup(), "<form><field name=\"y\"/></form>");
    }

    #[test]
    fn test_insert_inside_append_and_position() {
        let mut root = wrap("<form><a/><b/></form>");
        apply_patch(
            &mut root,
            &op("//form", PatchAction::InsertInside, None, "<z/>"),
            "ext.m",
        )
        .unwrap();
        assert_eq!(root.inner_markup(), "<form><a/><b/><z/></form>");

        apply_patch(
            &mut root,
            &op("//form", PatchAction::InsertInside, Some(0), "<first/>"),
            "ext.m",
        )
        .unwrap();
        assert_eq!(root.inner_markup(), "<form><first/><a/><b/><z/></form>");
    }

    #[test]
    fn test_negative_position_appends() {
        let mut root = wrap("<form><a/></form>");
        apply_patch(
            &mut root,
            &op("//form", PatchAction::InsertInside, Some(-1), "<z/>"),
            "ext.m",
        )
        .unwrap();
        assert_eq!(root.inner_markup(), "<form><a/><z/></form>");
    }

    #[test]
    fn test_zero_matches_is_patch_error() {
        let mut root = wrap("<form/>");
        let err = apply_patch(
            &mut root,
            &op("//ghost", PatchAction::Remove, None, ""),
            "ext.m",
        )
        .unwrap_err();
        match err {
            ChassisError::Patch {
                fragment, xpath, ..
            } => {
                assert_eq!(fragment, "ext.m");
                assert_eq!(xpath, "//ghost");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_multiple_matches_is_patch_error() {
        let mut root = wrap("<form><field/><field/></form>");
        let err = apply_patch(
            &mut root,
            &op("//field", PatchAction::Remove, None, ""),
            "ext.m",
        )
        .unwrap_err();
        assert!(err.to_string().contains("more than one"));
    }
}
