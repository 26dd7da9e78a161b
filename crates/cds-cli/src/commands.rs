use std::io::Write;
use std::path::Path;

use anyhow::{bail, Context};
use cds_archive::sniff_path;
use cds_sdk::{StoreConfig, StoreFactory, StoreLocation, StoreSession};
use cds_store::validate_external_name;
use cds_types::{BackendKind, OpenMode};
use colored::Colorize;
use serde_json::json;

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => StoreConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => StoreConfig::default(),
    };
    let factory = StoreFactory::new(config);
    let format = cli.format;
    match cli.command {
        Command::Pack(args) => cmd_pack(&factory, args, format),
        Command::Unpack(args) => cmd_unpack(&factory, args, format),
        Command::List(args) => cmd_list(&factory, args, format),
        Command::Cat(args) => cmd_cat(&factory, args),
        Command::Info(args) => cmd_info(&factory, args, format),
    }
}

fn open_for_read(
    factory: &StoreFactory,
    store: &str,
    password: Option<&str>,
) -> anyhow::Result<StoreSession> {
    let location = StoreLocation::parse(store)?;
    let mut session = factory
        .create_store_at(&location, OpenMode::Read, b"", BackendKind::Auto)
        .with_context(|| format!("opening {store}"))?;
    if let Some(password) = password {
        if !session.set_password(password) {
            bail!("password rejected for {store}");
        }
    }
    Ok(session)
}

fn cmd_pack(factory: &StoreFactory, args: PackArgs, format: OutputFormat) -> anyhow::Result<()> {
    if !args.dir.is_dir() {
        bail!("{} is not a directory", args.dir.display());
    }
    let location = StoreLocation::parse(&args.out)?;
    let app_id = args.app_id.unwrap_or_default();
    let mut store = factory
        .create_store_at(&location, OpenMode::Write, app_id.as_bytes(), args.backend)
        .with_context(|| format!("creating {}", args.out))?;
    match (&args.password, args.backend) {
        (Some(password), _) => {
            if !store.set_password(password) {
                bail!("backend {} does not take a password", store.backend_name());
            }
        }
        (None, BackendKind::Encrypted) => bail!("--password is required for encrypted stores"),
        (None, _) => {}
    }
    store.disallow_name_expansion();
    let added = store.add_local_directory(&args.dir, "")?;
    store.finalize()?;

    match format {
        OutputFormat::Json => println!(
            "{}",
            json!({ "store": args.out, "backend": store.backend_name(), "entries": added })
        ),
        OutputFormat::Text => {
            println!(
                "{} Packed {} entries into {} ({})",
                "✓".green().bold(),
                added.len().to_string().bold(),
                args.out.bold(),
                store.backend_name().cyan()
            );
        }
    }
    Ok(())
}

fn cmd_unpack(factory: &StoreFactory, args: UnpackArgs, format: OutputFormat) -> anyhow::Result<()> {
    let mut store = open_for_read(factory, &args.store, args.password.as_deref())?;
    store.disallow_name_expansion();
    std::fs::create_dir_all(&args.dir)?;

    let max = store.limits().max_name_len;
    let mut extracted = Vec::new();
    let mut skipped = Vec::new();
    for name in store.entries() {
        if validate_external_name(&name, max).is_err() {
            skipped.push(name);
            continue;
        }
        let dest = args.dir.join(&name);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        store
            .extract_file_to_path(&name, &dest)
            .with_context(|| format!("extracting {name}"))?;
        extracted.push(name);
    }

    match format {
        OutputFormat::Json => println!(
            "{}",
            json!({ "store": args.store, "extracted": extracted, "skipped": skipped })
        ),
        OutputFormat::Text => {
            for name in &skipped {
                println!("  {} {}", "skipped:".yellow(), name);
            }
            println!(
                "{} Extracted {} entries into {}",
                "✓".green().bold(),
                extracted.len().to_string().bold(),
                args.dir.display()
            );
        }
    }
    Ok(())
}

fn cmd_list(factory: &StoreFactory, args: ListArgs, format: OutputFormat) -> anyhow::Result<()> {
    let store = open_for_read(factory, &args.store, args.password.as_deref())?;
    let entries = store.entries();
    match format {
        OutputFormat::Json => println!("{}", json!(entries)),
        OutputFormat::Text => {
            for name in &entries {
                println!("{name}");
            }
        }
    }
    Ok(())
}

fn cmd_cat(factory: &StoreFactory, args: CatArgs) -> anyhow::Result<()> {
    let mut store = open_for_read(factory, &args.store, args.password.as_deref())?;
    if args.raw {
        store.disallow_name_expansion();
    }
    let data = store
        .extract_to_vec(&args.name)
        .with_context(|| format!("reading {}", args.name))?;
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&data)?;
    stdout.flush()?;
    Ok(())
}

fn cmd_info(factory: &StoreFactory, args: InfoArgs, format: OutputFormat) -> anyhow::Result<()> {
    let sniffed = describe_container(&args.store);
    let store = open_for_read(factory, &args.store, args.password.as_deref())?;
    let entries = store.entries();
    match format {
        OutputFormat::Json => println!(
            "{}",
            json!({
                "store": args.store,
                "container": sniffed,
                "backend": store.backend_name(),
                "entries": entries.len(),
                "encrypted": store.is_encrypted(),
            })
        ),
        OutputFormat::Text => {
            println!("Store:     {}", args.store.bold());
            println!("Container: {}", sniffed.cyan());
            println!("Backend:   {}", store.backend_name());
            println!("Entries:   {}", entries.len().to_string().bold());
            let encrypted = if store.is_encrypted() { "yes".yellow() } else { "no".green() };
            println!("Encrypted: {encrypted}");
        }
    }
    Ok(())
}

/// What the container looks like on disk, before any backend opens it.
fn describe_container(store: &str) -> String {
    let Ok(StoreLocation::Local(path)) = StoreLocation::parse(store) else {
        return "remote".to_string();
    };
    describe_path(&path)
}

fn describe_path(path: &Path) -> String {
    if path.is_dir() {
        return "directory".to_string();
    }
    match sniff_path(path) {
        Ok(Some(kind)) => kind.to_string(),
        Ok(None) => "unknown".to_string(),
        Err(err) => format!("unreadable ({err})"),
    }
}
