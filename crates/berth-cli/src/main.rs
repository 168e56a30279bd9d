//! Berth - Addon Release Manager
//!
//! Usage:
//!   berth init                 # Bootstrap the home directory
//!   berth repo list|add|update # Manage package repositories
//!   berth search <term>        # Search cached indexes
//!   berth pull <name>          # Resolve and cache a package
//!   berth releases             # List recorded releases

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

use berth_core::bootstrap;
use berth_core::prelude::*;
use berth_core::release::validate_release_name;
use berth_core::repo::{LOCAL_REPOSITORY, update_index};
use berth_core::sync::Deadline;

#[derive(Parser)]
#[command(name = "berth")]
#[command(about = "Addon Release Manager", long_about = None)]
struct Cli {
    /// Config file (defaults to <config_dir>/berth/berth.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Home directory (overrides the config file and $BERTH_HOME)
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the home layout and fetch the seed repository index
    Init {
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Manage package repositories
    Repo(RepoArgs),

    /// Search the cached repository indexes
    Search {
        /// Matched against package names and descriptions
        #[arg(default_value = "")]
        term: String,

        /// Only search this repository
        #[arg(long, short)]
        repository: Option<String>,

        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Resolve a package and store its archive in the cache
    Pull {
        /// Package as `name` or `repo/name`
        name: String,

        /// Version constraint; latest stable when omitted
        #[arg(long, short, default_value = "")]
        version: String,

        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Show a package's manifest and default values
    Show {
        name: String,

        #[arg(long, short, default_value = "")]
        version: String,
    },

    /// Add a package directory to the local repository
    Package {
        /// Directory containing package.yaml
        dir: PathBuf,
    },

    /// List releases recorded in the file release store
    Releases {
        /// Show the revision history of one release
        #[arg(long)]
        history: Option<String>,

        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },
}

#[derive(Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    /// Human-readable table
    #[default]
    Table,
    /// Machine-readable JSON
    Json,
}

#[derive(Args)]
struct RepoArgs {
    #[command(subcommand)]
    command: RepoSubcommand,
}

#[derive(Subcommand)]
enum RepoSubcommand {
    /// List registered repositories
    List {
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Register a repository and download its index
    Add {
        name: String,
        url: String,
    },

    /// Unregister a repository
    Remove { name: String },

    /// Refresh cached indexes
    Update {
        /// Repositories to refresh; all when empty
        names: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "berth=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config, cli.home)?;

    match cli.command {
        Commands::Init { format } => run_init(&config, format).await?,
        Commands::Repo(args) => run_repo(&config, args).await?,
        Commands::Search {
            term,
            repository,
            format,
        } => run_search(&config, &term, repository.as_deref(), format).await?,
        Commands::Pull {
            name,
            version,
            format,
        } => run_pull(&config, &name, &version, format).await?,
        Commands::Show { name, version } => run_show(&config, &name, &version).await?,
        Commands::Package { dir } => run_package(&config, &dir).await?,
        Commands::Releases { history, format } => {
            run_releases(&config, history.as_deref(), format).await?
        }
    }

    Ok(())
}

fn load_config(path: Option<PathBuf>, home: Option<PathBuf>) -> Result<ManagerConfig> {
    let store = match path {
        Some(path) => ConfigStore::from_path(path),
        None => ConfigStore::from_default_location()?,
    };
    let mut config = store.load()?;
    if home.is_some() {
        config.home = home;
    }
    tracing::debug!(config = %store.config_path().display(), "loaded configuration");
    Ok(config)
}

/// Bootstrap the home directory and build a resolver over it.
async fn prepare(config: &ManagerConfig) -> Result<(HomeLayout, Resolver)> {
    let layout = config.layout()?;
    let getters = Getters::standard().context("Failed to build HTTP client")?;
    bootstrap::ensure(
        &layout,
        &config.stable_repository.entry(),
        &getters,
        config.timeouts.bootstrap(),
    )
    .await
    .with_context(|| format!("Failed to bootstrap {}", layout.root().display()))?;
    let resolver = Resolver::new(layout.clone(), getters, config.default_repository.clone());
    Ok((layout, resolver))
}

async fn run_init(config: &ManagerConfig, format: OutputFormat) -> Result<()> {
    let layout = config.layout()?;
    let getters = Getters::standard().context("Failed to build HTTP client")?;
    let report = bootstrap::ensure(
        &layout,
        &config.stable_repository.entry(),
        &getters,
        config.timeouts.bootstrap(),
    )
    .await
    .with_context(|| format!("Failed to bootstrap {}", layout.root().display()))?;

    match format {
        OutputFormat::Table => {
            if report.is_noop() {
                println!("{} is up to date", layout.root().display());
                return Ok(());
            }
            println!("Initialized {}", layout.root().display());
            for dir in &report.created_dirs {
                println!("  created {}", dir.display());
            }
            if report.migrated_repositories {
                println!("  migrated repositories.yaml");
            }
            match report.seed_index_fetched {
                Some(true) => println!("  fetched index for '{}'", config.stable_repository.name),
                Some(false) => println!(
                    "  Warning: could not fetch index for '{}'; run `berth repo update` later",
                    config.stable_repository.name
                ),
                None => {}
            }
        }
        OutputFormat::Json => {
            let output = serde_json::json!({
                "home": layout.root(),
                "created_dirs": report.created_dirs,
                "seeded_repositories": report.seeded_repositories,
                "migrated_repositories": report.migrated_repositories,
                "created_local_index": report.created_local_index,
                "seed_index_fetched": report.seed_index_fetched,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

async fn run_repo(config: &ManagerConfig, args: RepoArgs) -> Result<()> {
    let (layout, _) = prepare(config).await?;
    let path = layout.repositories_file();
    let mut repositories = RepositoryFile::load(&path)?;

    match args.command {
        RepoSubcommand::List { format } => match format {
            OutputFormat::Table => {
                println!("{:<20} {:<30} URL", "Name", "Cache");
                println!("{}", "-".repeat(80));
                for entry in &repositories.repositories {
                    println!("{:<20} {:<30} {}", entry.name, entry.cache, entry.url);
                }
                if let Some(local) = repositories.local() {
                    println!("{:<20} {:<30} (local)", local.name, local.index);
                }
            }
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&repositories)?);
            }
        },
        RepoSubcommand::Add { name, url } => {
            let url = Url::parse(&url).with_context(|| format!("Invalid repository URL: {url}"))?;
            let entry = RepositoryEntry::new(name, url);
            repositories.add(entry.clone())?;
            repositories.save(&path)?;
            println!("Added repository '{}'", entry.name);

            let getters = Getters::standard()?;
            match tokio::time::timeout(
                config.timeouts.operation(),
                update_index(&entry, &layout, &getters),
            )
            .await
            {
                Ok(Ok(_)) => println!("  fetched index"),
                Ok(Err(err)) => println!("  Warning: {err}"),
                Err(_) => println!("  Warning: index download timed out"),
            }
        }
        RepoSubcommand::Remove { name } => {
            if name == LOCAL_REPOSITORY {
                anyhow::bail!("The local repository cannot be removed");
            }
            if !repositories.remove(&name) {
                anyhow::bail!("Repository '{}' is not registered", name);
            }
            repositories.save(&path)?;
            println!("Removed repository '{}'", name);
        }
        RepoSubcommand::Update { names } => {
            let getters = Getters::standard()?;
            let mut failed = 0;
            for entry in &repositories.repositories {
                if !names.is_empty() && !names.contains(&entry.name) {
                    continue;
                }
                match tokio::time::timeout(
                    config.timeouts.operation(),
                    update_index(entry, &layout, &getters),
                )
                .await
                {
                    Ok(Ok(_)) => println!("Updated '{}'", entry.name),
                    Ok(Err(err)) => {
                        failed += 1;
                        println!("Failed '{}': {}", entry.name, err);
                    }
                    Err(_) => {
                        failed += 1;
                        println!("Failed '{}': timed out", entry.name);
                    }
                }
            }
            if failed > 0 {
                anyhow::bail!("{} repository index(es) could not be updated", failed);
            }
        }
    }

    Ok(())
}

async fn run_search(
    config: &ManagerConfig,
    term: &str,
    only: Option<&str>,
    format: OutputFormat,
) -> Result<()> {
    let (layout, _) = prepare(config).await?;
    let repositories = RepositoryFile::load(&layout.repositories_file())?;

    let mut indexes = Vec::new();
    if only.is_none_or(|r| r == LOCAL_REPOSITORY) {
        indexes.push((LOCAL_REPOSITORY.to_string(), layout.local_index()));
    }
    for entry in &repositories.repositories {
        if only.is_none_or(|r| r == entry.name) {
            indexes.push((entry.name.clone(), layout.cache_index(entry)));
        }
    }

    let mut hits = Vec::new();
    for (repository, path) in indexes {
        if !path.exists() {
            tracing::debug!(repository, "no cached index");
            continue;
        }
        let index = IndexFile::load(&path)?;
        for entry in index.search(term) {
            hits.push((repository.clone(), entry.clone()));
        }
    }

    match format {
        OutputFormat::Table => {
            if hits.is_empty() {
                println!("No packages found.");
                return Ok(());
            }
            println!("{:<35} {:<12} Description", "Name", "Version");
            println!("{}", "-".repeat(80));
            for (repository, entry) in &hits {
                println!(
                    "{:<35} {:<12} {}",
                    format!("{}/{}", repository, entry.name),
                    entry.version,
                    entry.description
                );
            }
        }
        OutputFormat::Json => {
            let output: Vec<_> = hits
                .iter()
                .map(|(repository, entry)| {
                    serde_json::json!({
                        "repository": repository,
                        "name": entry.name,
                        "version": entry.version,
                        "description": entry.description,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

async fn run_pull(
    config: &ManagerConfig,
    name: &str,
    version: &str,
    format: OutputFormat,
) -> Result<()> {
    let (_, resolver) = prepare(config).await?;
    let deadline = Deadline::after(config.timeouts.operation());
    let resolved = resolver
        .resolve(name, version, &deadline)
        .await
        .with_context(|| format!("Failed to resolve '{}'", name))?;
    let reference = &resolved.reference;

    match format {
        OutputFormat::Table => {
            println!(
                "Pulled {}/{}@{}",
                reference.repository, reference.name, reference.version
            );
            println!("  archive: {}", reference.archive_path.display());
            println!("  digest:  {}", reference.digest);
        }
        OutputFormat::Json => {
            let output = serde_json::json!({
                "repository": reference.repository,
                "name": reference.name,
                "version": reference.version,
                "archive": reference.archive_path,
                "digest": reference.digest,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

async fn run_show(config: &ManagerConfig, name: &str, version: &str) -> Result<()> {
    let (_, resolver) = prepare(config).await?;
    let deadline = Deadline::after(config.timeouts.operation());
    let resolved = resolver
        .resolve(name, version, &deadline)
        .await
        .with_context(|| format!("Failed to resolve '{}'", name))?;
    let package = &resolved.package;

    println!("name:    {}", package.name());
    println!("version: {}", package.version());
    if let Some(app_version) = &package.manifest.app_version {
        println!("app:     {}", app_version);
    }
    if !package.manifest.description.is_empty() {
        println!("\n{}", package.manifest.description);
    }
    println!("\ntemplates:");
    for template in package.templates.keys() {
        println!("  {}", template);
    }
    println!("\nvalues:");
    println!("{}", serde_json::to_string_pretty(&package.values)?);
    Ok(())
}

async fn run_package(config: &ManagerConfig, dir: &Path) -> Result<()> {
    let (_, resolver) = prepare(config).await?;
    let package = Package::load_dir(dir)
        .with_context(|| format!("Failed to load package from {}", dir.display()))?;
    let entry = resolver.add_local(&package)?;
    println!(
        "Added {}/{}@{} to the local repository",
        LOCAL_REPOSITORY, entry.name, entry.version
    );
    Ok(())
}

async fn run_releases(
    config: &ManagerConfig,
    history: Option<&str>,
    format: OutputFormat,
) -> Result<()> {
    let layout = config.layout()?;
    let store = FileReleaseStore::new(layout.release_dir());

    if let Some(name) = history {
        validate_release_name(name).map_err(|e| anyhow::anyhow!(e))?;
        let release = store
            .get(name)
            .await
            .with_context(|| format!("Failed to read release '{}'", name))?;
        let revisions = release.revisions();
        match format {
            OutputFormat::Table => {
                println!("{:<10} {:<12} {:<12} Description", "Revision", "Version", "Status");
                println!("{}", "-".repeat(70));
                for revision in &revisions {
                    println!(
                        "{:<10} {:<12} {:<12} {}",
                        revision.revision, revision.version, revision.status, revision.description
                    );
                }
            }
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&revisions)?),
        }
        return Ok(());
    }

    let mut releases: Vec<Release> = store
        .list()
        .await?
        .into_iter()
        .filter(|r| !r.is_removed())
        .collect();
    releases.sort_by(|a, b| a.name.cmp(&b.name));

    match format {
        OutputFormat::Table => {
            if releases.is_empty() {
                println!("No releases recorded.");
                return Ok(());
            }
            println!(
                "{:<25} {:<15} {:<25} {:<10} {:<10}",
                "Name", "Namespace", "Package", "Revision", "Status"
            );
            println!("{}", "-".repeat(90));
            for release in &releases {
                println!(
                    "{:<25} {:<15} {:<25} {:<10} {:<10}",
                    release.name,
                    release.namespace,
                    format!("{}@{}", release.package_ref(), release.version),
                    release.revision,
                    release.status
                );
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&releases)?),
    }
    Ok(())
}
