//! Indexed view fragments, keyed by `(module, view id)`.
//!
//! Every module may ship a `views/` directory of XML files. Each top-level
//! element inside a file is either a named base view (`id` attribute) or a
//! patch set targeting a view from an earlier-loaded module
//! (`modify="module.view"`). The two are mutually exclusive.

use crate::core::error::ChassisError;
use crate::core::fsutil;
use crate::modules::descriptor::ModuleDescriptor;
use crate::views::patch::{PatchAction, PatchOp, PATCH_ACTIONS};
use crate::views::xml::{self, Element};
use regex::Regex;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, warn};

pub const VIEWS_DIR: &str = "views";

fn view_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new("^[A-Za-z0-9_]+$").unwrap())
}

/// A named base view contributed by a module.
#[derive(Debug, Clone)]
pub struct BaseFragment {
    pub module: String,
    pub id: String,
    /// All attributes of the declaring element (including `id`), e.g. a
    /// target model or a human-readable name.
    pub meta: Vec<(String, String)>,
    pub body: Vec<xml::Node>,
    pub file: String,
    pub line: usize,
}

/// A patch set targeting a base view from another (or the same) module.
#[derive(Debug, Clone)]
pub struct ModifyFragment {
    pub module: String,
    /// Synthetic local id: relative file path plus ordinal within the file.
    /// Files are discovered in sorted order, so this id is stable across
    /// runs and hosts.
    pub id: String,
    pub target_module: String,
    pub target_id: String,
    pub ops: Vec<PatchOp>,
    pub file: String,
    pub line: usize,
}

#[derive(Debug, Default)]
pub struct ViewStore {
    base: FxHashMap<(String, String), BaseFragment>,
    modifies: Vec<ModifyFragment>,
}

impl ViewStore {
    pub fn new() -> ViewStore {
        ViewStore::default()
    }

    pub fn base(&self, module: &str, id: &str) -> Option<&BaseFragment> {
        self.base.get(&(module.to_string(), id.to_string()))
    }

    pub fn base_count(&self) -> usize {
        self.base.len()
    }

    /// All modify fragments targeting the given base view, in discovery
    /// order (the composer re-orders them by load order and fragment id).
    pub fn modifies_for(&self, module: &str, id: &str) -> Vec<&ModifyFragment> {
        self.modifies
            .iter()
            .filter(|m| m.target_module == module && m.target_id == id)
            .collect()
    }

    /// Sorted `(module, id)` pairs of every base view.
    pub fn base_ids(&self) -> Vec<(String, String)> {
        let mut ids: Vec<_> = self.base.keys().cloned().collect();
        ids.sort();
        ids
    }
}

/// Load and index the view fragments of every module in load order.
///
/// In strict mode (an active synchronize pass) any malformed fragment is
/// fatal; in passive mode it is logged and skipped so read paths keep
/// functioning.
pub fn load_views(
    module_info: &BTreeMap<String, ModuleDescriptor>,
    load_order: &[String],
    strict: bool,
) -> Result<ViewStore, ChassisError> {
    let mut store = ViewStore::new();

    for module in load_order {
        let descriptor = match module_info.get(module) {
            Some(d) => d,
            None => continue,
        };
        let views_dir = descriptor.path.join(VIEWS_DIR);
        if !views_dir.is_dir() {
            continue;
        }
        debug!(module = module.as_str(), "loading views");

        for file in fsutil::walk_files_sorted(&views_dir, "xml")? {
            let result = load_view_file(&mut store, module, &views_dir, &file, strict);
            if let Err(err) = result {
                if strict || !err.is_record_level() {
                    return Err(err);
                }
                warn!("{}", err);
            }
        }
    }
    Ok(store)
}

fn load_view_file(
    store: &mut ViewStore,
    module: &str,
    views_dir: &Path,
    file: &Path,
    strict: bool,
) -> Result<(), ChassisError> {
    let file_label = file.to_string_lossy().to_string();
    let content = std::fs::read_to_string(file)?;
    let root = xml::parse_document(&content, &file_label)?;

    let local_stem = file
        .strip_prefix(views_dir)
        .unwrap_or(file)
        .to_string_lossy()
        .replace('\\', "/");

    let mut ordinal = 0usize;
    for elem in root.child_elements() {
        let result = load_fragment(store, module, elem, &file_label, &local_stem, ordinal);
        match result {
            Ok(()) => {}
            Err(err) if strict => return Err(err),
            Err(err) => warn!("{}", err),
        }
        ordinal += 1;
    }
    Ok(())
}

fn load_fragment(
    store: &mut ViewStore,
    module: &str,
    elem: &Element,
    file: &str,
    local_stem: &str,
    ordinal: usize,
) -> Result<(), ChassisError> {
    let xml_error = |line: usize, message: String| ChassisError::XmlImport {
        file: file.to_string(),
        line,
        message,
    };

    let id_attr = elem.attr("id");
    let modify_attr = elem.attr("modify");

    match (id_attr, modify_attr) {
        (Some(_), Some(_)) | (None, None) => Err(xml_error(
            elem.line,
            format!(
                "<{}> must have either an 'id' or a 'modify' attribute",
                elem.tag
            ),
        )),
        (Some(id), None) => {
            if !view_id_pattern().is_match(id) {
                return Err(xml_error(
                    elem.line,
                    "'id' attribute must only contain letters, numbers and underscores"
                        .to_string(),
                ));
            }
            let key = (module.to_string(), id.to_string());
            if store.base.contains_key(&key) {
                return Err(xml_error(
                    elem.line,
                    format!("duplicate view id '{}' in module '{}'", id, module),
                ));
            }
            store.base.insert(
                key,
                BaseFragment {
                    module: module.to_string(),
                    id: id.to_string(),
                    meta: elem.attrs.clone(),
                    body: elem.children.clone(),
                    file: file.to_string(),
                    line: elem.line,
                },
            );
            Ok(())
        }
        (None, Some(target)) => {
            let (target_module, target_id) = match target.split_once('.') {
                Some((m, v)) if !m.is_empty() && !v.is_empty() && !v.contains('.') => (m, v),
                _ => {
                    return Err(xml_error(
                        elem.line,
                        format!(
                            "'modify' attribute '{}' must be in the format '<module>.<view_id>'",
                            target
                        ),
                    ))
                }
            };
            if store.base(target_module, target_id).is_none() {
                return Err(xml_error(
                    elem.line,
                    format!(
                        "could not find view '{}' specified in the 'modify' attribute. \
                         You might need to check your module's dependencies",
                        target
                    ),
                ));
            }

            let mut ops = Vec::new();
            for node in elem.child_elements() {
                ops.push(parse_patch_op(node, file)?);
            }

            store.modifies.push(ModifyFragment {
                module: module.to_string(),
                id: format!("{}#{}", local_stem, ordinal),
                target_module: target_module.to_string(),
                target_id: target_id.to_string(),
                ops,
                file: file.to_string(),
                line: elem.line,
            });
            Ok(())
        }
    }
}

fn parse_patch_op(node: &Element, file: &str) -> Result<PatchOp, ChassisError> {
    let xml_error = |message: String| ChassisError::XmlImport {
        file: file.to_string(),
        line: node.line,
        message,
    };

    if node.tag != "modify" {
        return Err(xml_error(format!("unexpected element '{}'", node.tag)));
    }
    let xpath = node
        .attr("xpath")
        .ok_or_else(|| xml_error("<modify> missing 'xpath' attribute".to_string()))?;
    let action_str = node
        .attr("action")
        .ok_or_else(|| xml_error("<modify> missing 'action' attribute".to_string()))?;
    let action = PatchAction::parse(action_str).ok_or_else(|| {
        xml_error(format!(
            "<modify> invalid action '{}'. Valid actions are: {}",
            action_str,
            PATCH_ACTIONS.join(", ")
        ))
    })?;
    let position = match node.attr("position") {
        Some(raw) => Some(raw.parse::<i64>().map_err(|_| {
            xml_error("<modify> 'position' must be an integer".to_string())
        })?),
        None => None,
    };

    Ok(PatchOp {
        xpath: xpath.to_string(),
        action,
        position,
        payload: node.children.clone(),
        line: node.line,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::descriptor::ModuleDescriptor;
    use std::fs;
    use std::path::PathBuf;

    fn descriptor(name: &str, path: PathBuf) -> ModuleDescriptor {
        ModuleDescriptor {
            module: name.to_string(),
            name: name.to_string(),
            description: String::new(),
            version: "1.0".to_string(),
            depends: vec![],
            auto_install: false,
            javascript: vec![],
            css: vec![],
            path,
        }
    }

    fn write_views(dir: &Path, module: &str, file: &str, content: &str) {
        let views = dir.join(module).join(VIEWS_DIR);
        fs::create_dir_all(&views).unwrap();
        fs::write(views.join(file), content).unwrap();
    }

    fn setup(
        tmp: &Path,
        files: &[(&str, &str, &str)],
    ) -> (BTreeMap<String, ModuleDescriptor>, Vec<String>) {
        let mut info = BTreeMap::new();
        let mut order = Vec::new();
        for (module, file, content) in files {
            write_views(tmp, module, file, content);
            if !order.contains(&module.to_string()) {
                order.push(module.to_string());
            }
            info.insert(
                module.to_string(),
                descriptor(module, tmp.join(module)),
            );
        }
        (info, order)
    }

    #[test]
    fn test_base_fragment_indexed() {
        let tmp = tempfile::tempdir().unwrap();
        let (info, order) = setup(
            tmp.path(),
            &[(
                "base",
                "forms.xml",
                "<views><view id=\"main\" model=\"user\"><form/></view></views>",
            )],
        );
        let store = load_views(&info, &order, true).unwrap();
        let fragment = store.base("base", "main").unwrap();
        assert_eq!(fragment.module, "base");
        assert!(fragment
            .meta
            .iter()
            .any(|(k, v)| k == "model" && v == "user"));
    }

    #[test]
    fn test_both_id_and_modify_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let (info, order) = setup(
            tmp.path(),
            &[(
                "base",
                "forms.xml",
                "<views><view id=\"a\" modify=\"base.b\"/></views>",
            )],
        );
        let err = load_views(&info, &order, true).unwrap_err();
        assert!(matches!(err, ChassisError::XmlImport { .. }));
    }

    #[test]
    fn test_neither_id_nor_modify_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let (info, order) =
            setup(tmp.path(), &[("base", "forms.xml", "<views><view/></views>")]);
        assert!(load_views(&info, &order, true).is_err());
    }

    #[test]
    fn test_duplicate_id_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let (info, order) = setup(
            tmp.path(),
            &[(
                "base",
                "forms.xml",
                "<views><view id=\"a\"/><view id=\"a\"/></views>",
            )],
        );
        let err = load_views(&info, &order, true).unwrap_err();
        assert!(err.to_string().contains("duplicate view id"));
    }

    #[test]
    fn test_unknown_modify_target_names_dependencies() {
        let tmp = tempfile::tempdir().unwrap();
        let (info, order) = setup(
            tmp.path(),
            &[(
                "ext",
                "mods.xml",
                "<views><view modify=\"base.main\"/></views>",
            )],
        );
        let err = load_views(&info, &order, true).unwrap_err();
        assert!(err.to_string().contains("check your module's dependencies"));
    }

    #[test]
    fn test_invalid_action_is_fatal_in_strict_mode() {
        let tmp = tempfile::tempdir().unwrap();
        let (info, order) = setup(
            tmp.path(),
            &[
                ("base", "forms.xml", "<views><view id=\"main\"><form/></view></views>"),
                (
                    "ext",
                    "mods.xml",
                    "<views><view modify=\"base.main\">\
                     <modify xpath=\"//form\" action=\"explode\"/></view></views>",
                ),
            ],
        );
        let err = load_views(&info, &order, true).unwrap_err();
        assert!(err.to_string().contains("invalid action"));
    }

    #[test]
    fn test_passive_mode_skips_bad_fragment() {
        let tmp = tempfile::tempdir().unwrap();
        let (info, order) = setup(
            tmp.path(),
            &[(
                "base",
                "forms.xml",
                "<views><view id=\"ok\"/><view id=\"bad id!\"/></views>",
            )],
        );
        let store = load_views(&info, &order, false).unwrap();
        assert!(store.base("base", "ok").is_some());
        assert_eq!(store.base_count(), 1);
    }

    #[test]
    fn test_modify_fragment_ids_are_stable() {
        let tmp = tempfile::tempdir().unwrap();
        let (info, order) = setup(
            tmp.path(),
            &[
                ("base", "forms.xml", "<views><view id=\"main\"><form/></view></views>"),
                (
                    "ext",
                    "a.xml",
                    "<views><view modify=\"base.main\">\
                     <modify xpath=\"//form\" action=\"insert_inside\"/></view></views>",
                ),
            ],
        );
        let store = load_views(&info, &order, true).unwrap();
        let modifies = store.modifies_for("base", "main");
        assert_eq!(modifies.len(), 1);
        assert_eq!(modifies[0].id, "a.xml#0");
    }
}
