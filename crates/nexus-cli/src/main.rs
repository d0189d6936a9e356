//! Command-line interface for Nexus extension packages.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use nexus_core::config;
use nexus_core::datasource::{DataSource, DataSourceContext};
use nexus_core::rpc::data_source::{ARGUMENTS_KEY, COMMAND_KEY};
use nexus_core::{ExtensionHive, PackageController, PackageReference, ProviderRegistry, RpcDataSource};
use serde::Serialize;
use serde_json::json;

/// Nexus - discover, restore and load data source extensions.
#[derive(Parser, Debug)]
#[command(name = "nexus")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the registered package providers.
    Providers,
    /// List the available versions of a package.
    Discover(PackageArgs),
    /// Download or copy a package version into the restore root.
    Restore(PackageArgs),
    /// Restore and load a package, then list its extensions.
    Load(PackageArgs),
    /// Start an RPC extension and query its catalogs.
    Rpc {
        /// Executable of the extension.
        #[arg(long)]
        command: String,
        /// Whitespace separated arguments for the executable.
        #[arg(long)]
        arguments: Option<String>,
        /// Resource locator passed to the extension.
        #[arg(long, default_value = "")]
        locator: String,
        /// Extra configuration entries (`Key=Value`).
        #[arg(short = 'c', long = "config", value_parser = parse_key_value)]
        entries: Vec<(String, String)>,
        /// Also query time range and availability of this catalog.
        #[arg(long)]
        catalog: Option<String>,
    },
}

#[derive(Args, Debug)]
struct PackageArgs {
    /// Provider tag, e.g. `local` or `github-releases`.
    #[arg(short, long)]
    provider: String,
    /// Provider configuration entries (`Key=Value`).
    #[arg(short = 'c', long = "config", value_parser = parse_key_value)]
    config: Vec<(String, String)>,
    /// Restore root; defaults to `NEXUS_PACKAGES_PATH`.
    #[arg(long)]
    root: Option<PathBuf>,
}

impl PackageArgs {
    fn reference(&self) -> PackageReference {
        let configuration: BTreeMap<String, String> = self.config.iter().cloned().collect();
        PackageReference::from_parts(self.provider.clone(), configuration)
    }

    fn root(&self) -> PathBuf {
        self.root.clone().unwrap_or_else(config::restore_root)
    }
}

fn parse_key_value(s: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected Key=Value, got '{}'", s))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{}'", s));
    }
    Ok((key.to_string(), value.to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        Command::Providers => print_json(&ProviderRegistry::with_defaults().providers()),
        Command::Discover(args) => discover(args).await,
        Command::Restore(args) => restore(args).await,
        Command::Load(args) => load(args).await,
        Command::Rpc {
            command,
            arguments,
            locator,
            entries,
            catalog,
        } => rpc(command, arguments, locator, entries, catalog).await,
    }
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("nexus=info,nexus_core=info"));

    // Logs go to stderr; stdout carries the command's JSON output.
    if config::log_json() {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .compact()
            .with_writer(std::io::stderr)
            .init();
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn discover(args: PackageArgs) -> Result<()> {
    let reference = args.reference();
    let versions = PackageController::new(reference.clone())
        .discover()
        .await
        .with_context(|| format!("Failed to discover versions of {}", reference))?;

    print_json(&versions)
}

async fn restore(args: PackageArgs) -> Result<()> {
    let reference = args.reference();
    let folder = PackageController::new(reference.clone())
        .restore(&args.root())
        .await
        .with_context(|| format!("Failed to restore {}", reference))?;

    print_json(&json!({ "folder": folder }))
}

async fn load(args: PackageArgs) -> Result<()> {
    let reference = args.reference();
    let mut hive = ExtensionHive::new(args.root());

    let loaded = hive.load_packages(std::slice::from_ref(&reference)).await;
    if loaded.is_empty() {
        anyhow::bail!("Package {} could not be loaded, see the log for details", reference);
    }

    print_json(&hive.extensions())
}

async fn rpc(
    command: String,
    arguments: Option<String>,
    locator: String,
    entries: Vec<(String, String)>,
    catalog: Option<String>,
) -> Result<()> {
    let mut context = DataSourceContext::new(locator).with_config(COMMAND_KEY, command);
    if let Some(arguments) = arguments {
        context = context.with_config(ARGUMENTS_KEY, arguments);
    }
    for (key, value) in entries {
        context = context.with_config(key, value);
    }

    let mut source = RpcDataSource::new();
    source.set_context(context).await.context("Failed to start the extension")?;

    let result = query(&source, catalog.as_deref()).await;
    if let Err(e) = source.shutdown().await {
        tracing::warn!(error = %e, "Failed to close the extension");
    }

    print_json(&result?)
}

async fn query(source: &RpcDataSource, catalog: Option<&str>) -> Result<serde_json::Value> {
    let catalogs = source.get_catalogs().await.context("GetCatalogs failed")?;

    let Some(catalog_id) = catalog else {
        return Ok(json!({ "catalogs": catalogs }));
    };

    let range = source
        .get_time_range(catalog_id)
        .await
        .context("GetTimeRange failed")?;
    let availability = source
        .get_availability(catalog_id, range.begin, range.end)
        .await
        .context("GetAvailability failed")?;

    Ok(json!({
        "catalogs": catalogs,
        "timeRange": range,
        "availability": availability,
    }))
}
