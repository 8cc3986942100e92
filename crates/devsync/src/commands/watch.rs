//! Watch command: stream workspace changes until interrupted.

use std::time::Duration;

use anyhow::Result;
use clap::Args;
use console::Style;
use devsync_client::{ChangeEvent, ChangeKind, channel_sink};
use futures::StreamExt;
use futures::stream::BoxStream;

use super::Context;
use super::workspaces::status_style;

/// Arguments for the watch command.
#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Namespaces to watch (defaults to the context's namespaces)
    #[arg(short, long = "namespace")]
    pub namespaces: Vec<String>,

    /// Use the HTTP watch stream instead of the push channel
    #[arg(long)]
    pub http: bool,
}

/// Run the watch command.
pub async fn run(args: WatchArgs, ctx: &Context) -> Result<()> {
    let connection = ctx.connect()?;
    let namespaces = connection.namespaces_or(args.namespaces)?;

    if !ctx.json_output {
        let dim = Style::new().dim();
        eprintln!(
            "{}",
            dim.apply_to(format!(
                "Watching {} (Ctrl+C to stop)",
                namespaces.join(", ")
            ))
        );
    }

    if args.http {
        watch_http(&connection.client, &namespaces, ctx).await
    } else {
        watch_push(&connection.client, &namespaces, ctx).await
    }
}

async fn watch_push(
    client: &devsync_client::WorkspaceSyncClient,
    namespaces: &[String],
    ctx: &Context,
) -> Result<()> {
    let (sink, mut rx) = channel_sink();
    client.subscribe(namespaces, sink)?;
    let mut health = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::debug!("interrupted");
                break;
            }
            event = rx.recv() => match event {
                Some(event) => print_event(&event, ctx)?,
                None => break,
            },
            _ = health.tick() => {}
        }
        // Stop once no channel can deliver anymore.
        if client.subscriber().subscribed_namespaces().is_empty() {
            break;
        }
    }

    let failing = client.failing_channels();
    client.unsubscribe_all();
    if !failing.is_empty() {
        let red = Style::new().red();
        for namespace in &failing {
            eprintln!("{} channel for {} closed", red.apply_to("Error:"), namespace);
        }
    }
    Ok(())
}

async fn watch_http(
    client: &devsync_client::WorkspaceSyncClient,
    namespaces: &[String],
    ctx: &Context,
) -> Result<()> {
    let mut streams: Vec<BoxStream<'static, devsync_client::Result<ChangeEvent>>> =
        Vec::with_capacity(namespaces.len());
    for namespace in namespaces {
        streams.push(client.watch(namespace).await?.boxed());
    }
    let mut merged = futures::stream::select_all(streams);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::debug!("interrupted");
                break;
            }
            event = merged.next() => match event {
                Some(Ok(event)) => print_event(&event, ctx)?,
                Some(Err(e)) => {
                    eprintln!("{} {}", Style::new().red().apply_to("Error:"), e);
                }
                None => break,
            },
        }
    }
    Ok(())
}

fn print_event(event: &ChangeEvent, ctx: &Context) -> Result<()> {
    if ctx.json_output {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }

    let status = event.status();
    let name = event
        .workspace()
        .map(|w| w.name.as_str())
        .unwrap_or(event.workspace_id.as_str());
    println!(
        "{:<9} {}/{} {}",
        kind_label(event.kind),
        event.namespace,
        name,
        status_style(status).apply_to(status)
    );
    Ok(())
}

fn kind_label(kind: ChangeKind) -> &'static str {
    match kind {
        ChangeKind::Added => "ADDED",
        ChangeKind::Modified => "MODIFIED",
        ChangeKind::Deleted => "DELETED",
    }
}
