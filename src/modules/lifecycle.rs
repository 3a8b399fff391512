//! Module lifecycle management: the status state machine, cascading
//! operation scheduling, desired-set reconciliation and load ordering.
//!
//! Scheduling is not transactional across a cascade; a failure can leave
//! the persisted status set partially applied. Every operation here is
//! written to converge when re-run against such partial state rather than
//! double-apply.

use crate::core::error::ChassisError;
use crate::core::provider::{CondOp, Criteria, DataProvider, FindOptions, Record, Value};
use crate::core::schemas::MODULES_COLLECTION;
use crate::modules::descriptor::ModuleDescriptor;
use crate::modules::diff::{diff_metadata, MetadataDiff};
use crate::modules::records::{descriptor_values, ModuleRecord, ModuleStatus};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleOp {
    Install,
    Update,
    Remove,
}

/// Changes needed to reconcile the database with the desired install set.
#[derive(Debug, Default, PartialEq)]
pub struct StateChanges {
    pub install: Vec<String>,
    pub remove: Vec<String>,
}

impl StateChanges {
    pub fn is_empty(&self) -> bool {
        self.install.is_empty() && self.remove.is_empty()
    }

    pub fn describe(&self) -> String {
        let mut out = String::new();
        if !self.install.is_empty() {
            out.push_str("\nThe following modules need to be INSTALLED:\n  ");
            out.push_str(&self.install.join(", "));
        }
        if !self.remove.is_empty() {
            out.push_str("\nThe following modules need to be REMOVED:\n  ");
            out.push_str(&self.remove.join(", "));
        }
        out
    }
}

/// Pending operations, grouped by scheduled status.
#[derive(Debug, Default, PartialEq)]
pub struct ScheduledOps {
    pub to_install: Vec<String>,
    pub to_update: Vec<String>,
    pub to_remove: Vec<String>,
}

impl ScheduledOps {
    pub fn is_empty(&self) -> bool {
        self.to_install.is_empty() && self.to_update.is_empty() && self.to_remove.is_empty()
    }

    pub fn describe(&self) -> String {
        let mut out = String::from("The following module operations are pending:");
        if !self.to_install.is_empty() {
            out.push_str("\nDue to be INSTALLED:\n  ");
            out.push_str(&self.to_install.join(", "));
        }
        if !self.to_update.is_empty() {
            out.push_str("\nDue to be UPDATED:\n  ");
            out.push_str(&self.to_update.join(", "));
        }
        if !self.to_remove.is_empty() {
            out.push_str("\nDue to be REMOVED:\n  ");
            out.push_str(&self.to_remove.join(", "));
        }
        out
    }
}

pub struct ModuleManager<'a> {
    provider: &'a dyn DataProvider,
}

impl<'a> ModuleManager<'a> {
    pub fn new(provider: &'a dyn DataProvider) -> ModuleManager<'a> {
        ModuleManager { provider }
    }

    fn find_records(&self, criteria: &Criteria) -> Result<Vec<ModuleRecord>, ChassisError> {
        let options = FindOptions {
            order_by: Some("name"),
            ..Default::default()
        };
        self.provider
            .find(MODULES_COLLECTION, criteria, &options)?
            .iter()
            .map(ModuleRecord::from_record)
            .collect()
    }

    fn records_by_name(
        &self,
        names: &[String],
    ) -> Result<BTreeMap<String, ModuleRecord>, ChassisError> {
        let records = self.find_records(&Criteria::field("name", CondOp::In, names.to_vec()))?;
        Ok(records
            .into_iter()
            .map(|record| (record.name.clone(), record))
            .collect())
    }

    fn set_status(&self, name: &str, status: ModuleStatus) -> Result<(), ChassisError> {
        debug!(module = name, status = status.as_code(), "status change");
        let mut values = Record::new();
        values.insert("status".to_string(), Value::from(status.as_code()));
        self.provider.update(
            MODULES_COLLECTION,
            &Criteria::field("name", CondOp::Eq, name),
            values,
            None,
        )?;
        Ok(())
    }

    pub fn all_records(&self) -> Result<Vec<ModuleRecord>, ChassisError> {
        self.find_records(&Criteria::all())
    }

    /// Compare on-disk descriptors with the persisted module records.
    pub fn metadata_changes(
        &self,
        descriptors: &BTreeMap<String, ModuleDescriptor>,
    ) -> Result<MetadataDiff, ChassisError> {
        let records = self
            .provider
            .find(MODULES_COLLECTION, &Criteria::all(), &FindOptions::default())?;
        Ok(diff_metadata(descriptors, &records))
    }

    /// Persist the metadata diff. Removed modules are only deleted once
    /// they are not installed; anything else stays so a removal can be
    /// scheduled and a later pass can finish the delete.
    pub fn update_module_records(
        &self,
        descriptors: &BTreeMap<String, ModuleDescriptor>,
    ) -> Result<MetadataDiff, ChassisError> {
        let diff = self.metadata_changes(descriptors)?;

        for name in &diff.new {
            let descriptor = &descriptors[name];
            let mut values = descriptor_values(descriptor);
            values.insert(
                "db_version".to_string(),
                Value::from(descriptor.version.clone()),
            );
            values.insert(
                "status".to_string(),
                Value::from(ModuleStatus::NotInstalled.as_code()),
            );
            self.provider.create(MODULES_COLLECTION, values)?;
        }

        for name in diff.changed.keys() {
            let values = descriptor_values(&descriptors[name]);
            self.provider.update(
                MODULES_COLLECTION,
                &Criteria::field("name", CondOp::Eq, name.as_str()),
                values,
                None,
            )?;
        }

        if !diff.removed.is_empty() {
            self.delete_modules(&diff.removed)?;
        }

        Ok(diff)
    }

    /// Delete module records, refusing any that is not `NotInstalled`.
    /// Refused modules are kept (with a warning) so that a remove can
    /// still be scheduled against their record.
    pub fn delete_modules(&self, names: &[String]) -> Result<(), ChassisError> {
        let records = self.records_by_name(names)?;
        for (name, record) in &records {
            if record.status == ModuleStatus::NotInstalled {
                self.provider.delete(
                    MODULES_COLLECTION,
                    &Criteria::field("name", CondOp::Eq, name.as_str()),
                    None,
                )?;
            } else {
                warn!(
                    "module '{}' disappeared from disk but is still {}; \
                     keeping its record until it is removed",
                    name,
                    record.status.as_code()
                );
            }
        }
        Ok(())
    }

    /// Schedule install and removal operations derived from the desired
    /// install set. Removals are scheduled first, matching the original
    /// reconciliation order.
    pub fn schedule_changes(&self, changes: &StateChanges) -> Result<(), ChassisError> {
        if !changes.remove.is_empty() {
            self.schedule(ModuleOp::Remove, &changes.remove)?;
        }
        if !changes.install.is_empty() {
            self.schedule(ModuleOp::Install, &changes.install)?;
        }
        Ok(())
    }

    pub fn schedule(&self, op: ModuleOp, names: &[String]) -> Result<(), ChassisError> {
        self.schedule_operation(op, names, &[])
    }

    /// Apply the status transition table to `names`, cascading through the
    /// dependency graph. `path` is the requester chain; it is rebuilt
    /// fresh for every recursion step and checked before any lookup, so a
    /// cyclic graph fails fast instead of recursing forever.
    pub fn schedule_operation(
        &self,
        op: ModuleOp,
        names: &[String],
        path: &[String],
    ) -> Result<(), ChassisError> {
        for name in names {
            if path.contains(name) {
                return Err(ChassisError::CircularDependency {
                    module: name.clone(),
                    path: path.to_vec(),
                });
            }
        }

        let records = self.records_by_name(names)?;

        for name in names {
            let record = records.get(name).ok_or_else(|| ChassisError::UnknownModule {
                name: name.clone(),
                chain: path.to_vec(),
            })?;

            match op {
                ModuleOp::Install => {
                    match record.status {
                        ModuleStatus::NotInstalled => {
                            self.set_status(name, ModuleStatus::ToInstall)?
                        }
                        // A pending removal is simply cancelled.
                        ModuleStatus::ToRemove => self.set_status(name, ModuleStatus::Installed)?,
                        _ => {}
                    }
                    // Dependencies must never be less installed than this
                    // module, so the cascade runs regardless of the
                    // module's own previous status.
                    if !record.depends.is_empty() {
                        let mut next = path.to_vec();
                        next.push(name.clone());
                        self.schedule_operation(ModuleOp::Install, &record.depends, &next)?;
                    }
                }
                ModuleOp::Update => match record.status {
                    ModuleStatus::NotInstalled => {
                        self.set_status(name, ModuleStatus::ToInstall)?;
                        if !record.depends.is_empty() {
                            self.schedule_operation(ModuleOp::Install, &record.depends, &[])?;
                        }
                    }
                    ModuleStatus::Installed => {
                        self.set_status(name, ModuleStatus::ToUpdate)?;
                        let dependents = self.find_records(
                            &Criteria::field(
                                "status",
                                CondOp::Eq,
                                ModuleStatus::Installed.as_code(),
                            )
                            .and("depends", CondOp::Contains, name.as_str()),
                        )?;
                        if !dependents.is_empty() {
                            let mut next = path.to_vec();
                            next.push(name.clone());
                            let dependent_names: Vec<String> =
                                dependents.into_iter().map(|r| r.name).collect();
                            self.schedule_operation(ModuleOp::Update, &dependent_names, &next)?;
                        }
                    }
                    _ => {}
                },
                ModuleOp::Remove => match record.status {
                    // A pending install is simply cancelled; nothing
                    // depends on it being present yet.
                    ModuleStatus::ToInstall => self.set_status(name, ModuleStatus::NotInstalled)?,
                    ModuleStatus::NotInstalled | ModuleStatus::ToRemove => {}
                    ModuleStatus::Installed | ModuleStatus::ToUpdate => {
                        self.set_status(name, ModuleStatus::ToRemove)?;
                        let dependents = self.find_records(
                            &Criteria::field("depends", CondOp::Contains, name.as_str()).and(
                                "status",
                                CondOp::NotIn,
                                vec![
                                    ModuleStatus::NotInstalled.as_code().to_string(),
                                    ModuleStatus::ToRemove.as_code().to_string(),
                                ],
                            ),
                        )?;
                        if !dependents.is_empty() {
                            let mut next = path.to_vec();
                            next.push(name.clone());
                            let dependent_names: Vec<String> =
                                dependents.into_iter().map(|r| r.name).collect();
                            self.schedule_operation(ModuleOp::Remove, &dependent_names, &next)?;
                        }
                    }
                },
            }
        }
        Ok(())
    }

    /// Revert every pending operation: ToInstall becomes NotInstalled,
    /// ToUpdate and ToRemove become Installed. Flat bulk revert; nothing
    /// needs to cascade since no new state is derived.
    pub fn cancel_scheduled_operations(&self) -> Result<(), ChassisError> {
        let pending = self.find_records(&Criteria::field(
            "status",
            CondOp::In,
            ModuleStatus::pending_codes(),
        ))?;
        for record in pending {
            let reverted = match record.status {
                ModuleStatus::ToInstall => ModuleStatus::NotInstalled,
                _ => ModuleStatus::Installed,
            };
            self.set_status(&record.name, reverted)?;
        }
        Ok(())
    }

    pub fn scheduled_operations(&self) -> Result<ScheduledOps, ChassisError> {
        let pending = self.find_records(&Criteria::field(
            "status",
            CondOp::In,
            ModuleStatus::pending_codes(),
        ))?;
        let mut ops = ScheduledOps::default();
        for record in pending {
            match record.status {
                ModuleStatus::ToInstall => ops.to_install.push(record.name),
                ModuleStatus::ToUpdate => ops.to_update.push(record.name),
                ModuleStatus::ToRemove => ops.to_remove.push(record.name),
                _ => {}
            }
        }
        Ok(ops)
    }

    /// Work out which modules should be installed or can be removed given
    /// the desired install set. A module is removable when it is active
    /// but not reachable from the desired set through transitive
    /// dependencies.
    pub fn compute_state_changes(
        &self,
        desired: &[String],
    ) -> Result<StateChanges, ChassisError> {
        let mut changes = StateChanges::default();

        let to_install = self.find_records(
            &Criteria::field("name", CondOp::In, desired.to_vec()).and(
                "status",
                CondOp::NotIn,
                ModuleStatus::active_codes(),
            ),
        )?;
        changes.install = to_install.into_iter().map(|r| r.name).collect();

        let active = self.find_records(&Criteria::field(
            "status",
            CondOp::In,
            ModuleStatus::active_codes(),
        ))?;

        struct Entry {
            depends: Vec<String>,
            required: bool,
        }
        let mut graph: BTreeMap<String, Entry> = active
            .into_iter()
            .map(|record| {
                let required = desired.contains(&record.name);
                (
                    record.name,
                    Entry {
                        depends: record.depends,
                        required,
                    },
                )
            })
            .collect();

        // Propagate the required flag depth-first; the flag itself is the
        // memo, so shared subtrees are visited once.
        let mut stack: Vec<String> = graph
            .iter()
            .filter(|(_, entry)| entry.required)
            .map(|(name, _)| name.clone())
            .collect();
        while let Some(name) = stack.pop() {
            let depends = match graph.get(&name) {
                Some(entry) => entry.depends.clone(),
                None => continue,
            };
            for dep in depends {
                if let Some(entry) = graph.get_mut(&dep) {
                    if !entry.required {
                        entry.required = true;
                        stack.push(dep);
                    }
                }
            }
        }

        changes.remove = graph
            .into_iter()
            .filter(|(_, entry)| !entry.required)
            .map(|(name, _)| name)
            .collect();

        Ok(changes)
    }

    /// Topological order of all active modules, dependencies first.
    pub fn load_order(&self) -> Result<Vec<String>, ChassisError> {
        let active = self.find_records(&Criteria::field(
            "status",
            CondOp::In,
            ModuleStatus::active_codes(),
        ))?;
        topological_order(&dependency_graph(&active))
    }

    /// Order in which ToRemove modules are dismantled: dependents before
    /// their dependencies.
    pub fn removal_order(&self) -> Result<Vec<String>, ChassisError> {
        let doomed = self.find_records(&Criteria::field(
            "status",
            CondOp::Eq,
            ModuleStatus::ToRemove.as_code(),
        ))?;
        let mut order = topological_order(&dependency_graph(&doomed))?;
        order.reverse();
        Ok(order)
    }
}

fn dependency_graph(records: &[ModuleRecord]) -> BTreeMap<String, Vec<String>> {
    records
        .iter()
        .map(|record| (record.name.clone(), record.depends.clone()))
        .collect()
}

/// Kahn's algorithm with a lexicographic tie-break: modules with no
/// ordering constraint between them always come out in name order, so
/// identical graphs yield byte-identical orders across runs.
/// Dependencies outside the graph are ignored here; their validity is the
/// scheduler's concern.
pub fn topological_order(
    graph: &BTreeMap<String, Vec<String>>,
) -> Result<Vec<String>, ChassisError> {
    let mut indegree: BTreeMap<&str, usize> =
        graph.keys().map(|name| (name.as_str(), 0)).collect();
    let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();

    for (name, depends) in graph {
        for dep in depends {
            if graph.contains_key(dep) {
                if let Some(degree) = indegree.get_mut(name.as_str()) {
                    *degree += 1;
                }
                dependents.entry(dep.as_str()).or_default().push(name.as_str());
            }
        }
    }

    let mut ready: BTreeSet<&str> = indegree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(name, _)| *name)
        .collect();

    let mut order = Vec::with_capacity(graph.len());
    while let Some(&name) = ready.iter().next() {
        ready.remove(name);
        order.push(name.to_string());
        if let Some(deps) = dependents.get(name) {
            for dependent in deps {
                if let Some(degree) = indegree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(dependent);
                    }
                }
            }
        }
    }

    if order.len() < graph.len() {
        let remaining: BTreeSet<String> = graph
            .keys()
            .filter(|name| !order.contains(name))
            .cloned()
            .collect();
        let cycle = extract_cycle(graph, &remaining);
        return Err(ChassisError::CircularDependency {
            module: cycle.first().cloned().unwrap_or_default(),
            path: cycle,
        });
    }
    Ok(order)
}

/// Walk dependency edges inside the unordered remainder until a node
/// repeats; the repeated suffix is a cycle.
fn extract_cycle(
    graph: &BTreeMap<String, Vec<String>>,
    remaining: &BTreeSet<String>,
) -> Vec<String> {
    let mut path: Vec<String> = Vec::new();
    let mut current = match remaining.iter().next() {
        Some(name) => name.clone(),
        None => return path,
    };
    loop {
        if let Some(start) = path.iter().position(|name| *name == current) {
            return path[start..].to_vec();
        }
        path.push(current.clone());
        let next = graph
            .get(&current)
            .and_then(|deps| deps.iter().find(|dep| remaining.contains(*dep)));
        match next {
            Some(dep) => current = dep.clone(),
            None => return path,
        }
    }
}
