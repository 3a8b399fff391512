//! Module lifecycle behaviour: cascading schedules, reconciliation,
//! cancellation and load ordering, all against the in-memory provider.

use chassis::core::memory::MemoryProvider;
use chassis::core::provider::{CondOp, Criteria, DataProvider, FindOptions, Record, Value};
use chassis::core::schemas::MODULES_COLLECTION;
use chassis::modules::lifecycle::{ModuleManager, ModuleOp, StateChanges};
use chassis::modules::records::ModuleStatus;

fn seed(provider: &MemoryProvider, name: &str, depends: &[&str], status: ModuleStatus) {
    let mut values = Record::new();
    values.insert("name".to_string(), Value::from(name));
    values.insert("description".to_string(), Value::from(""));
    values.insert("version".to_string(), Value::from("1.0.0"));
    values.insert("db_version".to_string(), Value::from("1.0.0"));
    values.insert(
        "depends".to_string(),
        Value::from(depends.iter().map(|s| s.to_string()).collect::<Vec<_>>()),
    );
    values.insert("status".to_string(), Value::from(status.as_code()));
    provider
        .create(MODULES_COLLECTION, values)
        .expect("seed module record");
}

fn status_of(provider: &MemoryProvider, name: &str) -> ModuleStatus {
    let records = provider
        .find(
            MODULES_COLLECTION,
            &Criteria::field("name", CondOp::Eq, name),
            &FindOptions::default(),
        )
        .expect("find module record");
    let code = records[0]
        .get("status")
        .and_then(Value::as_str)
        .expect("status field");
    ModuleStatus::parse(code).expect("valid status")
}

fn names(strings: &[&str]) -> Vec<String> {
    strings.iter().map(|s| s.to_string()).collect()
}

// ------------------------------ install ------------------------------

#[test]
fn install_cascades_through_the_dependency_chain() {
    let provider = MemoryProvider::new();
    seed(&provider, "app", &["mid"], ModuleStatus::NotInstalled);
    seed(&provider, "mid", &["base"], ModuleStatus::NotInstalled);
    seed(&provider, "base", &[], ModuleStatus::NotInstalled);

    let manager = ModuleManager::new(&provider);
    manager
        .schedule(ModuleOp::Install, &names(&["app"]))
        .expect("schedule install");

    for name in ["app", "mid", "base"] {
        assert_eq!(status_of(&provider, name), ModuleStatus::ToInstall);
    }
}

#[test]
fn install_cancels_a_pending_removal() {
    let provider = MemoryProvider::new();
    seed(&provider, "base", &[], ModuleStatus::ToRemove);

    let manager = ModuleManager::new(&provider);
    manager
        .schedule(ModuleOp::Install, &names(&["base"]))
        .expect("schedule install");

    assert_eq!(status_of(&provider, "base"), ModuleStatus::Installed);
}

#[test]
fn install_of_unknown_module_names_the_requester_chain() {
    let provider = MemoryProvider::new();
    seed(&provider, "app", &["ghost"], ModuleStatus::NotInstalled);

    let manager = ModuleManager::new(&provider);
    let err = manager
        .schedule(ModuleOp::Install, &names(&["app"]))
        .expect_err("ghost dependency must fail");
    let message = err.to_string();
    assert!(message.contains("ghost"), "{}", message);
    assert!(message.contains("app"), "{}", message);
}

#[test]
fn cyclic_dependencies_fail_with_the_cycle_path() {
    let provider = MemoryProvider::new();
    seed(&provider, "a", &["b"], ModuleStatus::NotInstalled);
    seed(&provider, "b", &["a"], ModuleStatus::NotInstalled);

    let manager = ModuleManager::new(&provider);
    let err = manager
        .schedule(ModuleOp::Install, &names(&["a"]))
        .expect_err("cycle must fail");
    let message = err.to_string();
    assert!(message.contains("a -> b"), "{}", message);
}

// ------------------------------ update -------------------------------

#[test]
fn update_cascades_to_installed_dependents_only() {
    let provider = MemoryProvider::new();
    seed(&provider, "base", &[], ModuleStatus::Installed);
    seed(&provider, "ext", &["base"], ModuleStatus::Installed);
    seed(&provider, "bystander", &["base"], ModuleStatus::NotInstalled);

    let manager = ModuleManager::new(&provider);
    manager
        .schedule(ModuleOp::Update, &names(&["base"]))
        .expect("schedule update");

    assert_eq!(status_of(&provider, "base"), ModuleStatus::ToUpdate);
    assert_eq!(status_of(&provider, "ext"), ModuleStatus::ToUpdate);
    assert_eq!(status_of(&provider, "bystander"), ModuleStatus::NotInstalled);
}

#[test]
fn update_of_a_not_installed_module_schedules_an_install() {
    let provider = MemoryProvider::new();
    seed(&provider, "ext", &["base"], ModuleStatus::NotInstalled);
    seed(&provider, "base", &[], ModuleStatus::NotInstalled);

    let manager = ModuleManager::new(&provider);
    manager
        .schedule(ModuleOp::Update, &names(&["ext"]))
        .expect("schedule update");

    assert_eq!(status_of(&provider, "ext"), ModuleStatus::ToInstall);
    assert_eq!(status_of(&provider, "base"), ModuleStatus::ToInstall);
}

// ------------------------------ remove -------------------------------

#[test]
fn remove_cascades_to_dependents() {
    let provider = MemoryProvider::new();
    seed(&provider, "base", &[], ModuleStatus::Installed);
    seed(&provider, "ext", &["base"], ModuleStatus::Installed);
    seed(&provider, "other", &[], ModuleStatus::Installed);

    let manager = ModuleManager::new(&provider);
    manager
        .schedule(ModuleOp::Remove, &names(&["base"]))
        .expect("schedule remove");

    assert_eq!(status_of(&provider, "base"), ModuleStatus::ToRemove);
    assert_eq!(status_of(&provider, "ext"), ModuleStatus::ToRemove);
    assert_eq!(status_of(&provider, "other"), ModuleStatus::Installed);
}

#[test]
fn remove_of_a_pending_install_just_reverts_it() {
    let provider = MemoryProvider::new();
    seed(&provider, "base", &[], ModuleStatus::ToInstall);

    let manager = ModuleManager::new(&provider);
    manager
        .schedule(ModuleOp::Remove, &names(&["base"]))
        .expect("schedule remove");

    assert_eq!(status_of(&provider, "base"), ModuleStatus::NotInstalled);
}

// ------------------------- cancel and grouping ------------------------

#[test]
fn cancel_reverts_every_pending_operation() {
    let provider = MemoryProvider::new();
    seed(&provider, "a", &[], ModuleStatus::ToInstall);
    seed(&provider, "b", &[], ModuleStatus::ToUpdate);
    seed(&provider, "c", &[], ModuleStatus::ToRemove);
    seed(&provider, "d", &[], ModuleStatus::Installed);

    let manager = ModuleManager::new(&provider);
    manager
        .cancel_scheduled_operations()
        .expect("cancel operations");

    assert_eq!(status_of(&provider, "a"), ModuleStatus::NotInstalled);
    assert_eq!(status_of(&provider, "b"), ModuleStatus::Installed);
    assert_eq!(status_of(&provider, "c"), ModuleStatus::Installed);
    assert_eq!(status_of(&provider, "d"), ModuleStatus::Installed);
}

#[test]
fn scheduled_operations_group_by_status() {
    let provider = MemoryProvider::new();
    seed(&provider, "a", &[], ModuleStatus::ToInstall);
    seed(&provider, "b", &[], ModuleStatus::ToUpdate);
    seed(&provider, "c", &[], ModuleStatus::ToRemove);
    seed(&provider, "d", &[], ModuleStatus::Installed);

    let manager = ModuleManager::new(&provider);
    let pending = manager.scheduled_operations().expect("pending ops");
    assert_eq!(pending.to_install, names(&["a"]));
    assert_eq!(pending.to_update, names(&["b"]));
    assert_eq!(pending.to_remove, names(&["c"]));
}

// --------------------------- reconciliation ---------------------------

#[test]
fn compute_state_changes_keeps_transitive_dependencies() {
    let provider = MemoryProvider::new();
    seed(&provider, "app", &["mid"], ModuleStatus::Installed);
    seed(&provider, "mid", &["base"], ModuleStatus::Installed);
    seed(&provider, "base", &[], ModuleStatus::Installed);
    seed(&provider, "orphan", &[], ModuleStatus::Installed);
    seed(&provider, "wanted", &[], ModuleStatus::NotInstalled);

    let manager = ModuleManager::new(&provider);
    let changes = manager
        .compute_state_changes(&names(&["app", "wanted"]))
        .expect("state changes");

    assert_eq!(
        changes,
        StateChanges {
            install: names(&["wanted"]),
            remove: names(&["orphan"]),
        }
    );
}

// ----------------------------- ordering -------------------------------

#[test]
fn load_order_puts_dependencies_first_and_breaks_ties_by_name() {
    let provider = MemoryProvider::new();
    seed(&provider, "zeta", &["base"], ModuleStatus::Installed);
    seed(&provider, "alpha", &["base"], ModuleStatus::Installed);
    seed(&provider, "base", &[], ModuleStatus::Installed);

    let manager = ModuleManager::new(&provider);
    let order = manager.load_order().expect("load order");
    assert_eq!(order, names(&["base", "alpha", "zeta"]));

    // Deterministic: a second computation is byte-identical.
    assert_eq!(manager.load_order().expect("load order"), order);
}

#[test]
fn removal_order_dismantles_dependents_first() {
    let provider = MemoryProvider::new();
    seed(&provider, "base", &[], ModuleStatus::ToRemove);
    seed(&provider, "ext", &["base"], ModuleStatus::ToRemove);

    let manager = ModuleManager::new(&provider);
    let order = manager.removal_order().expect("removal order");
    assert_eq!(order, names(&["ext", "base"]));
}

// --------------------------- record deletion --------------------------

#[test]
fn delete_keeps_records_that_are_still_installed() {
    let provider = MemoryProvider::new();
    seed(&provider, "gone", &[], ModuleStatus::NotInstalled);
    seed(&provider, "kept", &[], ModuleStatus::Installed);

    let manager = ModuleManager::new(&provider);
    manager
        .delete_modules(&names(&["gone", "kept"]))
        .expect("delete modules");

    let remaining = provider
        .find(MODULES_COLLECTION, &Criteria::all(), &FindOptions::default())
        .expect("find all");
    let remaining: Vec<_> = remaining
        .iter()
        .filter_map(|r| r.get("name").and_then(Value::as_str))
        .collect();
    assert_eq!(remaining, vec!["kept"]);
}
