//! Application assembly: everything a running application needs, built in
//! one explicit initialization pass and handed around by reference.

use crate::core::config::AppConfig;
use crate::core::db::SqliteProvider;
use crate::core::error::ChassisError;
use crate::core::memory::MemoryProvider;
use crate::core::provider::DataProvider;
use crate::core::registry::ModelRegistry;
use crate::modules::descriptor::{load_descriptors, ModuleDescriptor};
use crate::modules::lifecycle::{ModuleManager, ModuleOp};
use crate::modules::loader::{load_modules, modules_with_changed_data};
use crate::modules::plugin::PluginSet;
use crate::modules::records::ModuleStatus;
use crate::views::compose::ViewComposer;
use crate::views::store::{load_views, ViewStore};
use colored::Colorize;
use std::collections::BTreeMap;
use std::io::{BufRead, Write};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Read-only startup: report drift, never write schedule state.
    #[default]
    Off,
    /// Synchronize, asking for confirmation before applying operations.
    Interactive,
    /// Synchronize without asking.
    Auto,
}

impl SyncMode {
    pub fn is_active(&self) -> bool {
        !matches!(self, SyncMode::Off)
    }
}

/// Requested lifecycle operations for one startup.
#[derive(Debug, Default, Clone)]
pub struct InitOptions {
    pub sync: SyncMode,
    pub install: Vec<String>,
    pub update: Vec<String>,
    pub remove: Vec<String>,
}

/// The assembled application. Construction goes through [`init_app`];
/// every component receives its collaborators from here instead of
/// reaching for process-global state.
pub struct AppContext {
    pub config: AppConfig,
    pub provider: Box<dyn DataProvider>,
    pub registry: ModelRegistry,
    pub module_info: BTreeMap<String, ModuleDescriptor>,
    pub load_order: Vec<String>,
    pub views: ViewStore,
    pub composer: ViewComposer,
}

impl AppContext {
    pub fn compile_view(&self, module: &str, id: &str) -> Result<String, ChassisError> {
        self.composer
            .compile(&self.views, &self.load_order, module, id)
    }

    pub fn manager(&self) -> ModuleManager<'_> {
        ModuleManager::new(self.provider.as_ref())
    }
}

/// Initialize the application: open storage, scan modules, reconcile and
/// optionally synchronize the module set, then load modules and views.
pub fn init_app(
    config: AppConfig,
    plugins: &PluginSet,
    options: &InitOptions,
) -> Result<AppContext, ChassisError> {
    let provider: Box<dyn DataProvider> = if config.database.in_memory {
        Box::new(MemoryProvider::new())
    } else {
        Box::new(SqliteProvider::open(&config.database.path)?)
    };

    let module_info = load_descriptors(&config.module_paths)?;
    let sync = options.sync.is_active();

    {
        let manager = ModuleManager::new(provider.as_ref());

        if sync {
            let diff = manager.update_module_records(&module_info)?;
            if !diff.is_empty() {
                info!("module metadata updated:{}", diff.describe());
            }

            let desired = desired_modules(&config, &module_info);
            let changes = manager.compute_state_changes(&desired)?;
            if !changes.is_empty() {
                info!("{}", changes.describe());
            }
            manager.schedule_changes(&changes)?;

            // Re-import data of everything already installed so code and
            // data can never drift apart after a sync.
            let installed: Vec<String> = manager
                .all_records()?
                .into_iter()
                .filter(|r| r.status == ModuleStatus::Installed)
                .map(|r| r.name)
                .collect();
            if !installed.is_empty() {
                manager.schedule(ModuleOp::Update, &installed)?;
            }
        } else {
            let diff = manager.metadata_changes(&module_info)?;
            if !diff.is_empty() {
                warn!(
                    "module metadata has changed on disk:{}\nrun a sync to apply",
                    diff.describe()
                );
            }
        }

        if !options.remove.is_empty() {
            manager.schedule(ModuleOp::Remove, &options.remove)?;
        }
        if !options.install.is_empty() {
            manager.schedule(ModuleOp::Install, &options.install)?;
        }
        if !options.update.is_empty() {
            manager.schedule(ModuleOp::Update, &options.update)?;
        }

        let pending = manager.scheduled_operations()?;
        if !pending.is_empty() {
            if sync {
                println!("{}", pending.describe().yellow());
                if options.sync == SyncMode::Interactive && !confirm("Proceed?") {
                    if confirm("Cancel the scheduled operations?") {
                        manager.cancel_scheduled_operations()?;
                        println!("{}", "Scheduled operations cancelled.".green());
                    }
                    return Err(ChassisError::Validation(
                        "synchronization aborted by operator".to_string(),
                    ));
                }
            } else {
                warn!("{}", pending.describe());
            }
        }
    }

    let mut registry = ModelRegistry::new();
    let load_order = load_modules(provider.as_ref(), &mut registry, &module_info, plugins, sync)?;
    info!("module load order: {}", load_order.join(", "));

    let views = load_views(&module_info, &load_order, sync)?;

    if !sync {
        let changed = modules_with_changed_data(provider.as_ref(), &module_info)?;
        if !changed.is_empty() {
            warn!(
                "data files changed on disk for: {}; run a sync to re-import",
                changed.join(", ")
            );
        }
    }

    Ok(AppContext {
        config,
        provider,
        registry,
        module_info,
        load_order,
        views,
        composer: ViewComposer::new(),
    })
}

/// The operator's install set plus every auto-install module found on
/// disk, deduplicated and sorted.
pub fn desired_modules(
    config: &AppConfig,
    module_info: &BTreeMap<String, ModuleDescriptor>,
) -> Vec<String> {
    let mut desired: Vec<String> = config.installed_modules.clone();
    for (name, descriptor) in module_info {
        if descriptor.auto_install {
            desired.push(name.clone());
        }
    }
    desired.sort();
    desired.dedup();
    desired
}

fn confirm(question: &str) -> bool {
    print!("{} [y/N] ", question);
    let _ = std::io::stdout().flush();
    let mut answer = String::new();
    if std::io::stdin().lock().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}
