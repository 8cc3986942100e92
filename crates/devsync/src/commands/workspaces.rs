//! Workspace commands: list, get, create, delete, start, stop.

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use clap::Args;
use console::{Style, style};
use devsync_client::{Error as ClientError, WorkspaceRecord, WorkspaceStatus};
use serde_json::Value;

use super::Context;

/// Arguments for the list command.
#[derive(Args, Debug)]
pub struct ListArgs {
    /// Namespaces to list (defaults to the context's namespaces)
    #[arg(short, long = "namespace")]
    pub namespaces: Vec<String>,
}

/// A workspace addressed by namespace and name.
#[derive(Args, Debug)]
pub struct WorkspaceRef {
    /// Namespace of the workspace
    pub namespace: String,

    /// Workspace name
    pub name: String,
}

/// Arguments for the create command.
#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Devfile to create the workspace from (YAML or JSON)
    pub file: PathBuf,

    /// Namespace to create the workspace in
    #[arg(short, long)]
    pub namespace: Option<String>,
}

/// Run the list command.
pub async fn list(args: ListArgs, ctx: &Context) -> Result<()> {
    let connection = ctx.connect()?;
    let namespaces = connection.namespaces_or(args.namespaces)?;
    let outcome = connection.client.list(&namespaces).await?;

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&outcome.workspaces)?);
    } else {
        print_table(&outcome.workspaces);
    }

    let red = Style::new().red();
    for (namespace, error) in &outcome.errors {
        eprintln!("{} {}: {}", red.apply_to("Error:"), namespace, error);
    }
    Ok(())
}

/// Run the get command.
pub async fn get(args: WorkspaceRef, ctx: &Context) -> Result<()> {
    let connection = ctx.connect()?;
    let workspace = connection
        .client
        .get(&args.namespace, &args.name)
        .await
        .with_context(|| format!("failed to get {}/{}", args.namespace, args.name))?;

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&workspace)?);
    } else {
        print_details(&workspace, ctx.verbose);
    }
    Ok(())
}

/// Run the create command.
pub async fn create(args: CreateArgs, ctx: &Context) -> Result<()> {
    let devfile = read_devfile(&args.file)?;
    let connection = ctx.connect()?;

    match connection
        .client
        .create(&devfile, args.namespace.as_deref())
        .await
    {
        Ok(workspace) => {
            if ctx.json_output {
                println!("{}", serde_json::to_string_pretty(&workspace)?);
            } else {
                println!(
                    "{} Workspace created: {}/{} ({})",
                    Style::new().green().apply_to("✓"),
                    workspace.namespace,
                    workspace.name,
                    status_style(workspace.status).apply_to(workspace.status)
                );
            }
            Ok(())
        }
        Err(ClientError::CreatePending {
            namespace, name, ..
        }) => {
            println!(
                "{} Workspace {}/{} accepted; it is still being set up.",
                Style::new().yellow().apply_to("…"),
                namespace,
                name
            );
            Ok(())
        }
        Err(e) => Err(e).context("failed to create workspace"),
    }
}

/// Run the delete command.
pub async fn delete(args: WorkspaceRef, ctx: &Context) -> Result<()> {
    let connection = ctx.connect()?;
    connection
        .client
        .delete(&args.namespace, &args.name)
        .await
        .with_context(|| format!("failed to delete {}/{}", args.namespace, args.name))?;

    if !ctx.json_output {
        println!(
            "{} Workspace deleted: {}/{}",
            Style::new().green().apply_to("✓"),
            args.namespace,
            args.name
        );
    }
    Ok(())
}

/// Run the start or stop command.
pub async fn set_started(args: WorkspaceRef, started: bool, ctx: &Context) -> Result<()> {
    let connection = ctx.connect()?;
    let client = &connection.client;
    let workspace = client.get(&args.namespace, &args.name).await?;
    let updated = client
        .set_started(&workspace, started)
        .await
        .with_context(|| format!("failed to update {}/{}", args.namespace, args.name))?;

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&updated)?);
    } else {
        let verb = if started { "Starting" } else { "Stopping" };
        println!(
            "{} {} {}/{}",
            Style::new().green().apply_to("✓"),
            verb,
            updated.namespace,
            updated.name
        );
    }
    Ok(())
}

/// Parse a devfile; `.json` files as JSON, anything else as YAML.
fn read_devfile(path: &Path) -> Result<Value> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read devfile {}", path.display()))?;

    let is_json = path.extension().and_then(|e| e.to_str()) == Some("json");
    let devfile = if is_json {
        serde_json::from_str(&contents)
            .with_context(|| format!("invalid JSON in {}", path.display()))?
    } else {
        serde_yaml::from_str(&contents)
            .with_context(|| format!("invalid YAML in {}", path.display()))?
    };
    Ok(devfile)
}

// ─────────────────────────────────────────────────────────────────────────────
// Output
// ─────────────────────────────────────────────────────────────────────────────

pub(crate) fn status_style(status: WorkspaceStatus) -> Style {
    match status {
        WorkspaceStatus::Running => Style::new().green(),
        WorkspaceStatus::Starting | WorkspaceStatus::Stopping => Style::new().yellow(),
        WorkspaceStatus::Error => Style::new().red(),
        WorkspaceStatus::Terminating => Style::new().magenta(),
        WorkspaceStatus::Stopped | WorkspaceStatus::Unknown => Style::new().dim(),
    }
}

fn print_table(workspaces: &[WorkspaceRecord]) {
    let dim = Style::new().dim();
    if workspaces.is_empty() {
        println!("{}", dim.apply_to("No workspaces found"));
        return;
    }

    println!(
        "{}",
        style(format!("{:<20} {:<24} {:<12} {}", "NAMESPACE", "NAME", "STATUS", "ID")).bold()
    );
    for workspace in workspaces {
        println!(
            "{:<20} {:<24} {:<12} {}",
            workspace.namespace,
            workspace.name,
            status_style(workspace.status).apply_to(workspace.status.as_str()),
            dim.apply_to(&workspace.id)
        );
    }
}

fn print_details(workspace: &WorkspaceRecord, verbose: bool) {
    let dim = Style::new().dim();
    println!("{}", style(&workspace.name).bold());
    println!("{}", dim.apply_to("─".repeat(50)));
    println!("  Namespace: {}", workspace.namespace);
    println!("  ID:        {}", workspace.id);
    println!(
        "  Status:    {}",
        status_style(workspace.status).apply_to(workspace.status)
    );
    if let Some(url) = workspace.ide_url() {
        println!("  IDE:       {}", url);
    }
    if verbose {
        println!("  Backend:   {:?}", workspace.kind);
        if let Some(created) = &workspace.attributes.created {
            println!("  Created:   {}", created);
        }
        if let Some(started) = workspace.started {
            println!("  Started:   {}", started);
        }
    }
}
