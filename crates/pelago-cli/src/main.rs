use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use dotenvy::dotenv;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use pelago_cli::{Command, Config};
use pelago_client::{ImportStatus, ImportTrigger, WaitMode, DEFAULT_WAIT};
use pelago_core::{
    default_config_path, manifest_path, read_pending_manifest, ArchivePublisher, BatchReport,
    Environment, EnvironmentsFile, PublishMode, RemovalManager, RunOptions, SyncEngine,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv().ok();

    // Setup logging (stderr to keep stdout clean for reports)
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    // Parse command line arguments
    let config = Config::parse();

    let config_path = config
        .config
        .clone()
        .or_else(default_config_path)
        .context("no configuration file given and no default config location")?;
    let environments = EnvironmentsFile::load(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;

    match config.command {
        Command::Publish {
            archives,
            no_update,
            no_copy,
            trigger_import,
            force,
            no_restrict,
        } => {
            let environment = environments.resolve(&config.env, no_restrict)?;
            publish(
                &environments,
                environment,
                archives,
                no_update,
                no_copy,
                trigger_import,
                force,
            )
            .await?;
        }
        Command::Remove {
            names,
            no_trigger,
            wait,
            keep_mirror,
        } => {
            let environment = environments.resolve(&config.env, false)?;
            remove(&environments, environment, &names, no_trigger, wait, keep_mirror).await?;
        }
        Command::Trigger { wait_removal } => {
            let environment = environments.resolve(&config.env, false)?;
            trigger(&environment, wait_removal).await?;
        }
        Command::Status => {
            let environment = environments.resolve(&config.env, false)?;
            status(&environment).await?;
        }
    }

    Ok(())
}

/// Run a publish batch and, optionally, wake the portal importer. A
/// configured shadow environment gets the same archives replayed after
/// the primary pass.
async fn publish(
    environments: &EnvironmentsFile,
    environment: Environment,
    archives: Vec<PathBuf>,
    no_update: bool,
    no_copy: bool,
    trigger_import: bool,
    force: bool,
) -> anyhow::Result<()> {
    // A first interrupt lets the archive in flight finish; the batch stops
    // at the next boundary.
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; finishing the archive in flight");
            flag.store(true, Ordering::Relaxed);
        }
    });

    let options = RunOptions {
        update_archives: !no_update,
        copy_to_datasets: !no_copy,
        mode: if force {
            PublishMode::ForceAll
        } else {
            PublishMode::Strict
        },
    };

    let shadow_tag = environment.shadow_environment.clone();
    let report = run_batch(environment, &archives, &options, trigger_import, &cancel).await?;
    print_report(&report);
    let mut failed = report.failed.len();
    let mut total = report.total;

    if let Some(tag) = shadow_tag {
        if report.cancelled {
            warn!("primary run cancelled; shadow environment not replayed");
        } else {
            info!(shadow = %tag, "replaying publish against shadow environment");
            let shadow = environments.resolve(&tag, false)?;
            let shadow_report =
                run_batch(shadow, &archives, &options, trigger_import, &cancel).await?;
            print_report(&shadow_report);
            failed += shadow_report.failed.len();
            total += shadow_report.total;
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {total} archive runs failed");
    }
    Ok(())
}

async fn run_batch(
    environment: Environment,
    archives: &[PathBuf],
    options: &RunOptions,
    trigger_import: bool,
    cancel: &Arc<AtomicBool>,
) -> anyhow::Result<BatchReport> {
    let importer = if trigger_import {
        let (trigger_url, status_url) = environment.require_endpoints()?;
        Some(ImportTrigger::new(status_url, trigger_url)?)
    } else {
        None
    };

    let mut publisher = ArchivePublisher::new(environment);
    for path in archives {
        publisher
            .register(path)
            .with_context(|| format!("cannot register {}", path.display()))?;
    }
    info!(archives = publisher.registered(), "starting publish batch");

    let report = publisher.run(options, cancel)?;

    if let Some(importer) = importer {
        if report.stats.published() > 0 {
            importer.trigger_import(WaitMode::Bounded(DEFAULT_WAIT)).await?;
        } else {
            info!("nothing published; import not triggered");
        }
    }
    Ok(report)
}

fn print_report(report: &BatchReport) {
    println!(
        "Processed {}/{} archives ({} created, {} updated, {} skipped)",
        report.processed,
        report.total,
        report.stats.created,
        report.stats.updated,
        report.stats.skipped
    );
    for denied in &report.publish_not_allowed {
        println!("NOT ALLOWED  {}: {}", denied.archive, denied.reason);
    }
    for failure in &report.failed {
        println!("FAILED       {}: {}", failure.archive, failure.message);
    }
    if report.cancelled {
        println!("Run cancelled before completion");
    }
}

/// Write the removal manifest, purge mirrors and wake the importer. A
/// configured shadow environment gets the same removal replayed, so test
/// portals never keep packages production has retired.
async fn remove(
    environments: &EnvironmentsFile,
    environment: Environment,
    names: &[String],
    no_trigger: bool,
    wait: bool,
    keep_mirror: bool,
) -> anyhow::Result<()> {
    let mut manager = RemovalManager::new();
    for name in names {
        manager.record_for_removal(name);
    }
    if manager.is_empty() {
        anyhow::bail!("no removable package names given");
    }

    apply_removal(&environment, &manager, no_trigger, wait, keep_mirror).await?;

    if let Some(shadow_tag) = &environment.shadow_environment {
        info!(shadow = %shadow_tag, "replaying removal against shadow environment");
        let shadow = environments.resolve(shadow_tag, false)?;
        apply_removal(&shadow, &manager, no_trigger, wait, keep_mirror).await?;
    }
    Ok(())
}

async fn apply_removal(
    environment: &Environment,
    manager: &RemovalManager,
    no_trigger: bool,
    wait: bool,
    keep_mirror: bool,
) -> anyhow::Result<()> {
    let datasets_dir = environment.require_datasets_directory()?;
    let manifest = manager.write_manifest(datasets_dir)?;

    if no_trigger {
        info!(environment = %environment.name, "manifest written; importer not triggered");
        return Ok(());
    }

    let (trigger_url, status_url) = environment.require_endpoints()?;
    let importer = ImportTrigger::new(status_url, trigger_url)?;
    let mode = if wait {
        WaitMode::Unbounded
    } else {
        WaitMode::Bounded(DEFAULT_WAIT)
    };
    importer.trigger_import(mode).await?;

    if !wait {
        info!(
            environment = %environment.name,
            "removal not awaited; mirrored copies kept until the portal confirms"
        );
        return Ok(());
    }

    if let Some(manifest) = manifest {
        importer
            .wait_for_manifest_removal(&manifest, WaitMode::Unbounded)
            .await?;
        println!("Removals processed by {}", environment.name);
    }

    // The portal has retired the packages; only now do the mirrored
    // copies go.
    if !keep_mirror {
        if let Some(mirror) = &environment.mirror_directory {
            if mirror.is_dir() {
                let mut engine = SyncEngine::new(mirror)?;
                let purged = manager.purge_mirror(&mut engine)?;
                info!(purged, mirror = %mirror.display(), "purged mirrored archives");
            }
        }
    }
    Ok(())
}

/// Wake the importer without publishing anything new
async fn trigger(environment: &Environment, wait_removal: bool) -> anyhow::Result<()> {
    let (trigger_url, status_url) = environment.require_endpoints()?;
    let importer = ImportTrigger::new(status_url, trigger_url)?;
    let mode = if wait_removal {
        WaitMode::Unbounded
    } else {
        WaitMode::Bounded(DEFAULT_WAIT)
    };
    importer.trigger_import(mode).await?;

    if wait_removal {
        let datasets_dir = environment.require_datasets_directory()?;
        importer
            .wait_for_manifest_removal(&manifest_path(datasets_dir), WaitMode::Unbounded)
            .await?;
    }
    Ok(())
}

/// Show importer availability and any pending removal manifest
async fn status(environment: &Environment) -> anyhow::Result<()> {
    let (trigger_url, status_url) = environment.require_endpoints()?;
    let importer = ImportTrigger::new(status_url, trigger_url)?;
    match importer.check_status().await {
        ImportStatus::Available => println!("importer: available"),
        ImportStatus::Busy(body) => println!("importer: busy ({body})"),
        ImportStatus::Unreachable(reason) => println!("importer: unreachable ({reason})"),
    }

    if let Ok(datasets_dir) = environment.require_datasets_directory() {
        match read_pending_manifest(datasets_dir)? {
            Some(names) => {
                println!("pending removals: {}", names.len());
                for name in names {
                    println!("  {name}");
                }
            }
            None => println!("pending removals: none"),
        }
    }
    Ok(())
}
