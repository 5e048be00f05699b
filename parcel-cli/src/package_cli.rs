//! Parcel CLI commands
//!
//! Browse sources and the merged catalog, resolve dependencies and manage
//! installed packages.

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use std::path::PathBuf;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

use parcel_core::lifecycle::{
    export_seed, get_installed_packages, get_installed_record, install_package,
    install_with_dependencies, uninstall_package, UninstallOptions,
};
use parcel_core::resolver::{resolve_dependency_order, DependencyResolution};
use parcel_core::source::{MergedCatalogEntry, SearchFilters};
use parcel_core::{PackageRegistry, RegistryBuilder};

use crate::CliContext;

#[derive(Subcommand, Debug)]
pub enum PackageCommand {
    /// List configured package sources by priority
    Sources,

    /// List every package in the merged catalog
    List {
        /// Output as JSON
        #[clap(long)]
        json: bool,
    },

    /// Show details of one package
    Show {
        /// Package id
        id: String,

        /// Output as JSON
        #[clap(long)]
        json: bool,
    },

    /// List the versions each source offers for a package
    Versions {
        /// Package id
        id: String,
    },

    /// Search remote registries
    Search {
        /// Search query
        query: String,

        /// Filter by category
        #[clap(long)]
        category: Option<String>,

        /// Filter by minimum access level
        #[clap(long)]
        min_level: Option<u32>,
    },

    /// Resolve the dependency order of all packages
    Resolve {
        /// Only print packages whose dependency chain is complete and acyclic
        #[clap(long)]
        strict: bool,
    },

    /// Install a package
    Install {
        /// Package id
        id: String,

        /// Install missing dependencies first
        #[clap(long)]
        with_deps: bool,
    },

    /// Uninstall a package
    Uninstall {
        /// Package id
        id: String,

        /// Also remove the package's components and scripts
        #[clap(long)]
        purge: bool,
    },

    /// List installed packages
    Installed,

    /// Export every package as seed data (components, scripts, packages)
    Export {
        /// Write to this file instead of stdout
        #[clap(long, short)]
        output: Option<PathBuf>,
    },

    /// Build a registry from a seed directory and summarize it
    Bootstrap {
        /// Directory holding `index.json` and package folders
        root: PathBuf,

        /// Only summarize packages in this category
        #[clap(long)]
        category: Option<String>,
    },
}

impl PackageCommand {
    pub async fn execute(self, context: &CliContext) -> Result<()> {
        match self {
            PackageCommand::Sources => execute_sources(context),
            PackageCommand::List { json } => execute_list(context, json).await,
            PackageCommand::Show { id, json } => execute_show(context, &id, json).await,
            PackageCommand::Versions { id } => execute_versions(context, &id).await,
            PackageCommand::Search {
                query,
                category,
                min_level,
            } => execute_search(context, &query, category, min_level).await,
            PackageCommand::Resolve { strict } => execute_resolve(context, strict).await,
            PackageCommand::Install { id, with_deps } => {
                execute_install(context, &id, with_deps).await
            }
            PackageCommand::Uninstall { id, purge } => execute_uninstall(context, &id, purge).await,
            PackageCommand::Installed => execute_installed(context).await,
            PackageCommand::Export { output } => execute_export(context, output).await,
            PackageCommand::Bootstrap { root, category } => {
                execute_bootstrap(root, category.as_deref()).await
            }
        }
    }
}

fn print_table<T: Tabled>(rows: &[T]) {
    let table = Table::new(rows)
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()))
        .to_string();
    println!("{table}");
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        let cut: String = text.chars().take(max.saturating_sub(3)).collect();
        format!("{cut}...")
    } else {
        text.to_string()
    }
}

#[derive(Tabled)]
struct SourceRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Type")]
    source_type: String,
    #[tabled(rename = "Priority")]
    priority: i32,
    #[tabled(rename = "Enabled")]
    enabled: bool,
    #[tabled(rename = "URL")]
    url: String,
}

fn execute_sources(context: &CliContext) -> Result<()> {
    let mut sources: Vec<_> = context.config.sources.iter().collect();
    sources.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));

    println!(
        "Conflict resolution: {} (parallel fetch: {}, max {})\n",
        context.config.conflict_resolution,
        context.config.parallel_fetch,
        context.config.max_parallel_sources
    );

    let rows: Vec<SourceRow> = sources
        .into_iter()
        .map(|source| SourceRow {
            id: source.id.clone(),
            source_type: source.source_type.to_string(),
            priority: source.priority,
            enabled: source.enabled,
            url: source.url.clone(),
        })
        .collect();
    print_table(&rows);
    Ok(())
}

#[derive(Tabled)]
struct CatalogRow {
    #[tabled(rename = "Package")]
    id: String,
    #[tabled(rename = "Version")]
    version: String,
    #[tabled(rename = "Category")]
    category: String,
    #[tabled(rename = "Source")]
    source: String,
    #[tabled(rename = "Also in")]
    others: String,
    #[tabled(rename = "Description")]
    description: String,
}

impl From<&MergedCatalogEntry> for CatalogRow {
    fn from(entry: &MergedCatalogEntry) -> Self {
        let others: Vec<&str> = entry
            .available_sources
            .iter()
            .filter(|id| **id != entry.selected_source)
            .map(String::as_str)
            .collect();
        CatalogRow {
            id: entry.package_id().to_string(),
            version: entry.metadata.version.clone(),
            category: entry.metadata.category.clone(),
            source: entry.selected_source.clone(),
            others: others.join(", "),
            description: truncate(&entry.metadata.description, 50),
        }
    }
}

async fn execute_list(context: &CliContext, json_output: bool) -> Result<()> {
    let manager = context.manager()?;
    let entries = manager.fetch_merged_index().await;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No packages found.");
        return Ok(());
    }

    println!("Found {} package(s):\n", entries.len());
    let rows: Vec<CatalogRow> = entries.iter().map(CatalogRow::from).collect();
    print_table(&rows);
    Ok(())
}

async fn execute_show(context: &CliContext, id: &str, json_output: bool) -> Result<()> {
    let manager = context.manager()?;
    let entry = manager
        .get_entry(id)
        .await
        .with_context(|| format!("Package '{id}' not found in any source"))?;
    let data = manager
        .load_package(id)
        .await
        .with_context(|| format!("Failed to load package '{id}'"))?;

    if json_output {
        let output = serde_json::json!({
            "entry": entry,
            "package": data,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    let meta = &entry.metadata;
    println!("Package:  {} ({})", meta.name, meta.package_id);
    println!("Version:  {}", meta.version);
    if !meta.author.is_empty() {
        println!("Author:   {}", meta.author);
    }
    println!("Category: {}", meta.category);
    println!("Level:    {}", meta.min_level);
    println!(
        "Source:   {} (available from: {})",
        entry.selected_source,
        entry.available_sources.join(", ")
    );
    if !meta.dependencies.is_empty() {
        println!("Depends:  {}", meta.dependencies.join(", "));
    }
    if !meta.description.is_empty() {
        println!("\n{}", meta.description);
    }

    match data {
        Some(data) => {
            println!("\nComponents ({}):", data.components.len());
            for component in &data.components {
                println!("  - {}", component.id);
            }
            if data.scripts.is_some() || !data.script_files.is_empty() {
                println!(
                    "Scripts: {}{} file(s)",
                    if data.scripts.is_some() { "legacy + " } else { "" },
                    data.script_files.len()
                );
            }
        }
        None => println!("\nPackage payload could not be loaded from any source."),
    }
    Ok(())
}

async fn execute_versions(context: &CliContext, id: &str) -> Result<()> {
    let manager = context.manager()?;
    let versions = manager.get_all_versions(id).await;

    if versions.is_empty() {
        println!("No versions of '{id}' found.");
        return Ok(());
    }

    for (source_id, list) in &versions {
        println!("{source_id}: {}", list.join(", "));
    }
    Ok(())
}

#[derive(Tabled)]
struct SearchRow {
    #[tabled(rename = "Package")]
    id: String,
    #[tabled(rename = "Version")]
    version: String,
    #[tabled(rename = "Source")]
    source: String,
    #[tabled(rename = "Description")]
    description: String,
}

async fn execute_search(
    context: &CliContext,
    query: &str,
    category: Option<String>,
    min_level: Option<u32>,
) -> Result<()> {
    let manager = context.manager()?;
    let filters = SearchFilters {
        category,
        min_level,
        ..Default::default()
    };

    let mut rows = Vec::new();
    let mut searched = 0;
    for source in manager.sources_by_priority() {
        let Some(remote) = source.as_remote() else {
            continue;
        };
        searched += 1;
        match remote.search_packages(query, &filters).await {
            Ok(results) => rows.extend(results.packages.into_iter().map(|meta| SearchRow {
                id: meta.package_id,
                version: meta.version,
                source: meta.source_id,
                description: truncate(&meta.description, 50),
            })),
            Err(e) => eprintln!("Search failed on '{}': {e}", source.config().id),
        }
    }

    if searched == 0 {
        bail!("No enabled remote sources to search; enable one with PARCEL_ENABLE_REMOTE=true");
    }
    if rows.is_empty() {
        println!("No packages found.");
        return Ok(());
    }

    println!("Found {} package(s):\n", rows.len());
    print_table(&rows);
    Ok(())
}

fn print_resolution(resolution: &DependencyResolution, registry: &PackageRegistry, strict: bool) {
    let order = if strict {
        resolution.strict_order(registry)
    } else {
        resolution.load_order.clone()
    };

    println!("Load order ({} package(s)):", order.len());
    for (position, id) in order.iter().enumerate() {
        println!("  {:>3}. {}", position + 1, id);
    }

    if !resolution.unresolvable.is_empty() {
        println!("\nUnresolvable:");
        for unresolved in &resolution.unresolvable {
            println!(
                "  {} (missing: {})",
                unresolved.package_id,
                unresolved.missing.join(", ")
            );
        }
    }

    if !resolution.circular.is_empty() {
        println!("\nCircular dependencies:");
        for cycle in &resolution.circular {
            println!("  {}", cycle.join(" -> "));
        }
    }
}

async fn load_registry(context: &CliContext) -> Result<PackageRegistry> {
    let manager = context.manager()?;
    Ok(manager.build_registry().await)
}

async fn execute_resolve(context: &CliContext, strict: bool) -> Result<()> {
    let registry = load_registry(context).await?;
    let resolution = resolve_dependency_order(&registry);
    print_resolution(&resolution, &registry, strict);
    Ok(())
}

async fn execute_export(context: &CliContext, output: Option<PathBuf>) -> Result<()> {
    let registry = load_registry(context).await?;
    let export = export_seed(&registry);
    let json = serde_json::to_string_pretty(&export)?;

    match output {
        Some(path) => {
            tokio::fs::write(&path, json)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!(
                "Exported {} package(s) to {}",
                export.packages.len(),
                path.display()
            );
        }
        None => println!("{json}"),
    }
    Ok(())
}

async fn execute_install(context: &CliContext, id: &str, with_deps: bool) -> Result<()> {
    let registry = load_registry(context).await?;
    let store = context.store();

    let result = if with_deps {
        install_with_dependencies(&registry, id, &store).await
    } else {
        install_package(&registry, id, &store)
            .await
            .map(|report| vec![report])
    };
    let reports = result.with_context(|| format!("Failed to install '{id}'"))?;

    for report in &reports {
        println!(
            "Installed {} {} ({} component(s), {} script(s))",
            report.package_id, report.version, report.components_written, report.scripts_written
        );
    }
    Ok(())
}

async fn execute_uninstall(context: &CliContext, id: &str, purge: bool) -> Result<()> {
    let registry = load_registry(context).await?;
    let store = context.store();

    let existed = uninstall_package(&registry, id, &store, UninstallOptions { purge })
        .await
        .with_context(|| format!("Failed to uninstall '{id}'"))?;

    if existed {
        println!("Uninstalled {id}{}", if purge { " (purged)" } else { "" });
    } else {
        println!("{id} was not installed");
    }
    Ok(())
}

#[derive(Tabled)]
struct InstalledRow {
    #[tabled(rename = "Package")]
    id: String,
    #[tabled(rename = "Version")]
    version: String,
    #[tabled(rename = "Source")]
    source: String,
    #[tabled(rename = "Installed")]
    installed_at: String,
}

async fn execute_installed(context: &CliContext) -> Result<()> {
    let store = context.store();
    let ids = get_installed_packages(&store).await;

    if ids.is_empty() {
        println!("No packages installed.");
        return Ok(());
    }

    let mut rows = Vec::with_capacity(ids.len());
    for id in ids {
        let row = match get_installed_record(&id, &store).await {
            Some(record) => InstalledRow {
                id,
                version: record.version,
                source: record.source_id,
                installed_at: record.installed_at.format("%Y-%m-%d %H:%M").to_string(),
            },
            None => InstalledRow {
                id,
                version: "-".to_string(),
                source: "-".to_string(),
                installed_at: "-".to_string(),
            },
        };
        rows.push(row);
    }
    print_table(&rows);
    Ok(())
}

#[derive(Tabled)]
struct BootstrapRow {
    #[tabled(rename = "Package")]
    id: String,
    #[tabled(rename = "Version")]
    version: String,
    #[tabled(rename = "Components")]
    components: usize,
    #[tabled(rename = "Scripts")]
    scripts: usize,
    #[tabled(rename = "Examples")]
    examples: usize,
    #[tabled(rename = "Depends on")]
    dependencies: String,
}

async fn execute_bootstrap(root: PathBuf, category: Option<&str>) -> Result<()> {
    if !root.is_dir() {
        bail!("Seed directory {} does not exist", root.display());
    }

    let registry = RegistryBuilder::new(&root).build().await;
    println!(
        "Built {} package(s) from {}\n",
        registry.len(),
        root.display()
    );

    let definitions = match category {
        Some(category) => registry.by_category(category),
        None => registry.iter().collect(),
    };
    let rows: Vec<BootstrapRow> = definitions
        .into_iter()
        .map(|definition| {
            let id = definition.package_id();
            let scripts = registry.all_scripts(id);
            BootstrapRow {
                id: id.to_string(),
                version: definition.metadata.version.clone(),
                components: registry.components(id).len(),
                scripts: scripts.files.len() + usize::from(!scripts.legacy.is_empty()),
                examples: registry.examples(id).as_object().map_or(0, |o| o.len()),
                dependencies: definition.dependencies().join(", "),
            }
        })
        .collect();
    print_table(&rows);

    println!();
    let resolution = resolve_dependency_order(&registry);
    print_resolution(&resolution, &registry, false);
    Ok(())
}
