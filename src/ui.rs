// UI layer: console output for each mode, the delete confirmation prompt
// and the single top-level catch that reports a failed run.

use crate::api::{ApiClient, Project};
use crate::config::{Mode, Settings};
use crate::store::CacheStore;
use crate::sync::{Outcome, SyncReport, Trainer};
use anyhow::{Context, Result};
use crossterm::style::Stylize;
use dialoguer::Confirm;
use tracing::error;

/// Run the configured mode. Failures are printed with their innermost
/// message and swallowed; only a failing confirmation prompt is returned.
pub async fn run(settings: Settings, assume_yes: bool) -> Result<()> {
    if settings.mode == Mode::Delete && !assume_yes && !confirm_delete(&settings)? {
        println!("Nothing deleted.");
        return Ok(());
    }

    if let Err(e) = execute(&settings).await {
        error!(error = ?e, "run failed");
        println!();
        println!("{}", format!("Unexpected error: {}.", e.root_cause()).red());
        println!();
    }
    Ok(())
}

async fn execute(settings: &Settings) -> Result<()> {
    let api = ApiClient::new(&settings.endpoint, &settings.training_key).context("Failed to build API client")?;
    let store = CacheStore::open(&settings.database)
        .with_context(|| format!("Failed to open upload cache at {}", settings.database.display()))?;

    if settings.mode == Mode::ListProjects {
        print!("Getting Custom Vision projects... ");
    }
    let outcome = Trainer::new(&api, &store, settings).run().await?;

    match outcome {
        Outcome::Deleted { completed: true } => println!("{}", "Images and tags successfully deleted.".green()),
        Outcome::Deleted { completed: false } => {}
        Outcome::Projects(projects) => print_projects(&projects),
        Outcome::Downloaded(count) => {
            println!("{}", format!("{} image(s) downloaded successfully.", count).green());
            println!();
        }
        Outcome::Synced(report) => print_report(&report),
        Outcome::CachePurged => println!("Local upload cache cleared."),
    }
    Ok(())
}

fn confirm_delete(settings: &Settings) -> Result<bool> {
    let project = settings
        .project_id
        .map(|p| p.to_string())
        .unwrap_or_else(|| "<none>".into());
    let confirmed = Confirm::new()
        .with_prompt(format!("Delete every image and tag of project {}?", project))
        .default(false)
        .interact()
        .context("Could not ask for confirmation; pass --yes to delete without a prompt")?;
    Ok(confirmed)
}

fn print_projects(projects: &[Project]) {
    println!("{} project(s) found.", projects.len());
    println!();
    for project in projects {
        println!("{}", project.name.clone().bold());
        println!("{}", project.id);
        println!();
    }
}

fn print_report(report: &SyncReport) {
    println!();
    println!(
        "Tags: {} created, {} reused. Images: {} uploaded in {} batch(es), {} already uploaded.",
        report.tags_created,
        report.tags_reused,
        report.uploaded,
        report.batches.len(),
        report.skipped
    );
    println!("{}", "Training completed.".green());
    if let Some(iteration) = report.iteration {
        println!("Default iteration: {}", iteration);
    }
    println!();
}
