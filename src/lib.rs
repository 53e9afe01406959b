// src/lib.rs

pub mod cli;
pub mod collection;
pub mod config;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod logging;
pub mod pipeline;
pub mod types;
pub mod variables;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::collection::{Collection, flatten};
use crate::config::{
    ConfigFile, load_and_validate, load_collection, load_data_file, load_or_default,
    load_variables_file,
};
use crate::engine::{Collaborators, RunController, RunOptions, RunReport, TracingObserver};
use crate::errors::RunError;
use crate::exec::{EchoRequester, HostHandle, PassiveHost};
use crate::fs::RealFileResolver;
use crate::types::Listen;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config, collection, environment, globals and data loading
/// - CLI overrides on top of the config file
/// - the offline requester and script host
/// - Ctrl-C handling
///
/// Returns whether the run succeeded.
pub async fn run(args: CliArgs) -> Result<bool> {
    let (config_path, explicit) = args.config_path();
    let cfg = if explicit {
        load_and_validate(&config_path)
    } else {
        load_or_default(&config_path)
    }
    .with_context(|| format!("loading config {}", config_path.display()))?;

    let collection = load_collection(&args.collection)
        .with_context(|| format!("loading collection {}", args.collection.display()))?;
    let options = build_options(&args, &cfg)?;

    if args.dry_run {
        print_plan(&collection, &options);
        return Ok(true);
    }

    let working_dir = match args.collection.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir().context("resolving working directory")?,
    };
    let collaborators = Collaborators::new(
        Arc::new(EchoRequester),
        HostHandle::owned(Arc::new(PassiveHost)),
    )
    .with_files(Arc::new(RealFileResolver::new(working_dir)));

    let controller = RunController::new(collection, options, collaborators);
    info!(items = controller.items().len(), "starting run");
    let handle = controller.start(Arc::new(TracingObserver));

    // Ctrl-C → abort.
    {
        let control = handle.control();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            control.request_abort(Some(RunError::Aborted("interrupted".to_string())));
        });
    }

    let report = handle.join().await?;
    print_summary(&report);
    Ok(report.is_success())
}

/// Run options from the config file with CLI flags and data files applied.
pub fn build_options(args: &CliArgs, cfg: &ConfigFile) -> Result<RunOptions> {
    let mut options = cfg.run_options()?;

    if let Some(n) = args.iteration_count {
        if n == 0 {
            bail!("--iteration-count must be >= 1 (got 0)");
        }
        options.iteration_count = n;
    }
    if let Some(n) = args.parallel {
        if n == 0 {
            bail!("--parallel must be >= 1 (got 0)");
        }
        options.parallel = Some(n);
    }
    options.stop_on_error |= args.stop_on_error;
    options.abort_on_error |= args.abort_on_error;

    if let Some(path) = &args.environment {
        options.environment = load_variables_file(path).with_context(|| loading(path))?;
    }
    if let Some(path) = &args.globals {
        options.globals = load_variables_file(path).with_context(|| loading(path))?;
    }
    if let Some(path) = &args.data {
        options.data = load_data_file(path).with_context(|| loading(path))?;
        if args.iteration_count.is_none() && !options.data.is_empty() {
            options.iteration_count = options.data.len();
        }
    }
    Ok(options)
}

fn loading(path: &Path) -> String {
    format!("loading {}", path.display())
}

/// Dry-run output: every item in execution order with its effective auth
/// and inherited script counts.
fn print_plan(collection: &Collection, options: &RunOptions) {
    let items = flatten(collection);
    println!("runwright dry-run");
    println!("  collection = {}", collection.name);
    println!("  iterations = {}", options.cycles());
    match options.partitions() {
        Some(n) => println!("  parallel partitions = {n}"),
        None => println!("  sequential"),
    }
    println!("  stop_on_error = {}", options.stop_on_error);
    println!("  abort_on_error = {}", options.abort_on_error);
    if !options.data.is_empty() {
        println!("  data rows = {}", options.data.len());
    }
    println!();

    println!("items ({}):", items.len());
    for (position, flat) in items.iter().enumerate() {
        let mut path = flat.path.join(" / ");
        if !path.is_empty() {
            path.push_str(" / ");
        }
        println!("  {position}. {path}{}", flat.item.label());
        match &flat.item.request {
            Some(request) => println!("      {} {}", request.method, request.url),
            None => println!("      (no request)"),
        }
        if let Some(auth) = &flat.auth {
            println!("      auth: {}", auth.kind);
        }
        let prerequest = flat.scripts(Listen::Prerequest).len();
        let test = flat.scripts(Listen::Test).len();
        if prerequest + test > 0 {
            println!("      scripts: {prerequest} prerequest, {test} test");
        }
    }

    debug!("dry-run complete (nothing sent)");
}

fn print_summary(report: &RunReport) {
    println!(
        "{} iteration(s), {} item(s) completed, lifecycle {}",
        report.iterations_completed.len(),
        report.items_completed,
        report.lifecycle
    );
    if let Some(err) = &report.error {
        warn!(error = %err, "run finished with an error");
        println!("error: {err}");
    }
}
