//! View composition: folding modify fragments over a base view.
//!
//! Multiple modules may patch the same view, so the application order must
//! be a total order: contributing module's position in the global load
//! order first, then the fragment's own local id. Compiled results are
//! memoized for the lifetime of the module-load generation; a structural
//! change to the installed module set requires a full reload, there is no
//! partial invalidation.

use crate::core::error::ChassisError;
use crate::views::patch;
use crate::views::store::{ModifyFragment, ViewStore};
use crate::views::xml::Element;
use rustc_hash::FxHashMap;
use std::sync::Mutex;
use tracing::debug;

#[derive(Default)]
pub struct ViewComposer {
    cache: Mutex<FxHashMap<(String, String), String>>,
}

impl ViewComposer {
    pub fn new() -> ViewComposer {
        ViewComposer::default()
    }

    /// Compile the view `(module, id)`: apply every modify fragment that
    /// targets it, in deterministic order, and return the final markup.
    pub fn compile(
        &self,
        store: &ViewStore,
        load_order: &[String],
        module: &str,
        id: &str,
    ) -> Result<String, ChassisError> {
        let key = (module.to_string(), id.to_string());
        if let Some(compiled) = self.cache.lock().unwrap().get(&key) {
            return Ok(compiled.clone());
        }

        let compiled = compile_uncached(store, load_order, module, id)?;
        self.cache.lock().unwrap().insert(key, compiled.clone());
        Ok(compiled)
    }

    pub fn cached_count(&self) -> usize {
        self.cache.lock().unwrap().len()
    }
}

fn compile_uncached(
    store: &ViewStore,
    load_order: &[String],
    module: &str,
    id: &str,
) -> Result<String, ChassisError> {
    let base = store
        .base(module, id)
        .ok_or_else(|| ChassisError::NotFound(format!("view '{}.{}'", module, id)))?;

    let mut fragments = store.modifies_for(module, id);
    sort_fragments(&mut fragments, load_order);

    // The base body is wrapped in a synthetic root so ops can address
    // top-level siblings uniformly.
    let mut root = Element::new("view");
    root.children = base.body.clone();

    for fragment in fragments {
        debug!(
            target_module = module,
            target_id = id,
            contributor = fragment.module.as_str(),
            fragment = fragment.id.as_str(),
            "applying view modifications"
        );
        let label = format!("{}:{}", fragment.module, fragment.id);
        for op in &fragment.ops {
            patch::apply_patch(&mut root, op, &label)?;
        }
    }

    Ok(root.inner_markup())
}

fn sort_fragments(fragments: &mut [&ModifyFragment], load_order: &[String]) {
    let order_index = |name: &str| {
        load_order
            .iter()
            .position(|m| m == name)
            .unwrap_or(load_order.len())
    };
    fragments.sort_by(|a, b| {
        order_index(&a.module)
            .cmp(&order_index(&b.module))
            .then_with(|| a.id.cmp(&b.id))
    });
}
