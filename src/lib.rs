//! Chassis: an extensible application platform.
//!
//! Applications are assembled from **modules**: directories carrying a
//! `module.toml` manifest, optional record data (`data/*.xml`), optional
//! view fragments (`views/*.xml`) and optional compiled-in behaviour (a
//! [`modules::plugin::ModulePlugin`]). The platform resolves module
//! dependencies, schedules install/update/remove operations through a
//! persisted state machine, imports data, and composes views by applying
//! modify fragments from extending modules onto base fragments.
//!
//! # Lifecycle
//!
//! A module record moves through five statuses: `not_installed`,
//! `to_install`, `installed`, `to_update` and `to_remove`. Scheduling an
//! operation cascades through the dependency graph (installing a module
//! installs its dependencies; removing one removes its dependents) and a
//! synchronize pass applies whatever is scheduled.
//!
//! # Views
//!
//! Every view is a base XML fragment plus any number of modify fragments
//! contributed by other modules. Compilation applies the modifies in
//! module load order and is fully deterministic: the same modules in the
//! same state always produce byte-identical markup.

pub mod core;
pub mod modules;
pub mod views;

use crate::core::config::{AppConfig, DEFAULT_CONFIG_FILE};
use crate::core::context::{init_app, InitOptions, SyncMode};
use crate::core::db::SqliteProvider;
use crate::core::error::ChassisError;
use crate::core::memory::MemoryProvider;
use crate::core::provider::DataProvider;
use crate::modules::assets::bundle_assets;
use crate::modules::descriptor::load_descriptors;
use crate::modules::lifecycle::ModuleManager;
use crate::modules::loader::modules_with_changed_data;
use crate::modules::plugin::PluginSet;
use crate::modules::records::{ModuleRecord, ModuleStatus};

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "chassis",
    version = env!("CARGO_PKG_VERSION"),
    about = "Modular application platform: dependency-resolved module lifecycles and composable views"
)]
struct Cli {
    /// Path to the application configuration file.
    #[clap(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Synchronize the module set: apply metadata changes and scheduled
    /// install/update/remove operations
    Sync(SyncCli),
    /// Inspect modules and their lifecycle state
    Modules(ModulesCli),
    /// Inspect composed views
    Views(ViewsCli),
    /// Inspect frontend asset bundles
    Assets(AssetsCli),
}

#[derive(clap::Args, Debug)]
struct SyncCli {
    /// Synchronization mode: 'off', 'interactive' or 'auto'.
    #[clap(long, default_value = "interactive")]
    mode: String,
    /// Modules to install, comma separated.
    #[clap(long, value_delimiter = ',')]
    install: Vec<String>,
    /// Modules to update, comma separated.
    #[clap(long, value_delimiter = ',')]
    update: Vec<String>,
    /// Modules to remove, comma separated.
    #[clap(long, value_delimiter = ',')]
    remove: Vec<String>,
}

#[derive(clap::Args, Debug)]
struct ModulesCli {
    #[clap(subcommand)]
    command: ModulesCommand,
}

#[derive(Subcommand, Debug)]
enum ModulesCommand {
    /// List every module found in the module paths with its status
    List,
    /// Show pending operations and drift between disk and database
    Status,
}

#[derive(clap::Args, Debug)]
struct ViewsCli {
    #[clap(subcommand)]
    command: ViewsCommand,
}

#[derive(Subcommand, Debug)]
enum ViewsCommand {
    /// Compile a view and print the final markup
    Compile {
        /// View reference of the form 'module.view_id'.
        view: String,
    },
    /// List every base view known to the application
    List,
}

#[derive(clap::Args, Debug)]
struct AssetsCli {
    #[clap(subcommand)]
    command: AssetsCommand,
}

#[derive(Subcommand, Debug)]
enum AssetsCommand {
    /// List the script and stylesheet bundles in load order
    List,
}

pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config)
        .with_context(|| format!("loading configuration from '{}'", cli.config.display()))?;

    match cli.command {
        Command::Sync(sync) => {
            let mode = match sync.mode.as_str() {
                "off" => SyncMode::Off,
                "interactive" => SyncMode::Interactive,
                "auto" => SyncMode::Auto,
                other => anyhow::bail!(
                    "unknown sync mode '{}'; use 'off', 'interactive' or 'auto'",
                    other
                ),
            };
            let options = InitOptions {
                sync: mode,
                install: sync.install,
                update: sync.update,
                remove: sync.remove,
            };
            // Binaries embedding chassis register their plugins here; the
            // bare CLI manages data-and-view modules only.
            let ctx = init_app(config, &PluginSet::new(), &options)
                .context("synchronization failed")?;
            println!(
                "{} {} modules loaded",
                "Sync complete.".green().bold(),
                ctx.load_order.len()
            );
            Ok(())
        }
        Command::Modules(modules) => match modules.command {
            ModulesCommand::List => cmd_modules_list(&config),
            ModulesCommand::Status => cmd_modules_status(&config),
        },
        Command::Views(views) => {
            let options = InitOptions::default();
            let ctx = init_app(config, &PluginSet::new(), &options)?;
            match views.command {
                ViewsCommand::Compile { view } => {
                    let (module, id) = view.split_once('.').ok_or_else(|| {
                        ChassisError::Validation(format!(
                            "view reference '{}' must be of the form 'module.view_id'",
                            view
                        ))
                    })?;
                    let markup = ctx.compile_view(module, id)?;
                    println!("{}", markup);
                    Ok(())
                }
                ViewsCommand::List => {
                    for (module, id) in ctx.views.base_ids() {
                        println!("{}.{}", module, id);
                    }
                    Ok(())
                }
            }
        }
        Command::Assets(assets) => match assets.command {
            AssetsCommand::List => {
                let options = InitOptions::default();
                let ctx = init_app(config, &PluginSet::new(), &options)?;
                let (scripts, styles) = bundle_assets(&ctx.module_info, &ctx.load_order)?;
                println!("{}", "Scripts:".bold());
                for path in scripts {
                    println!("  {}", path);
                }
                println!("{}", "Stylesheets:".bold());
                for path in styles {
                    println!("  {}", path);
                }
                Ok(())
            }
        },
    }
}

fn open_provider(config: &AppConfig) -> Result<Box<dyn DataProvider>, ChassisError> {
    if config.database.in_memory {
        Ok(Box::new(MemoryProvider::new()))
    } else {
        Ok(Box::new(SqliteProvider::open(&config.database.path)?))
    }
}

fn status_label(status: ModuleStatus) -> colored::ColoredString {
    match status {
        ModuleStatus::Installed => status.as_code().green(),
        ModuleStatus::ToInstall | ModuleStatus::ToUpdate | ModuleStatus::ToRemove => {
            status.as_code().yellow()
        }
        ModuleStatus::NotInstalled => status.as_code().normal(),
    }
}

fn cmd_modules_list(config: &AppConfig) -> anyhow::Result<()> {
    let provider = open_provider(config)?;
    let module_info = load_descriptors(&config.module_paths)?;
    let manager = ModuleManager::new(provider.as_ref());
    let records: BTreeMap<String, ModuleRecord> = manager
        .all_records()?
        .into_iter()
        .map(|record| (record.name.clone(), record))
        .collect();

    for (name, descriptor) in &module_info {
        let status = records
            .get(name)
            .map(|record| record.status)
            .unwrap_or(ModuleStatus::NotInstalled);
        println!(
            "{:<24} {:<12} {:<14} {}",
            name.bold(),
            descriptor.version,
            status_label(status),
            descriptor.name
        );
    }
    for (name, record) in &records {
        if !module_info.contains_key(name) {
            println!(
                "{:<24} {:<12} {:<14} {}",
                name.bold(),
                record.version,
                status_label(record.status),
                "(missing from disk)".red()
            );
        }
    }
    Ok(())
}

fn cmd_modules_status(config: &AppConfig) -> anyhow::Result<()> {
    let provider = open_provider(config)?;
    let module_info = load_descriptors(&config.module_paths)?;
    let manager = ModuleManager::new(provider.as_ref());

    let diff = manager.metadata_changes(&module_info)?;
    if diff.is_empty() {
        println!("{}", "Module metadata is in sync.".green());
    } else {
        println!("{}{}", "Metadata drift:".yellow().bold(), diff.describe());
    }

    let pending = manager.scheduled_operations()?;
    if pending.is_empty() {
        println!("{}", "No operations are scheduled.".green());
    } else {
        println!("{}", pending.describe().yellow());
    }

    let changed = modules_with_changed_data(provider.as_ref(), &module_info)?;
    if !changed.is_empty() {
        println!(
            "{} {}",
            "Data files changed on disk for:".yellow(),
            changed.join(", ")
        );
    }
    Ok(())
}
