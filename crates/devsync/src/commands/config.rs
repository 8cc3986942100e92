//! Config command - client context management.

use std::path::PathBuf;

use anyhow::{Result, anyhow};
use clap::{Args, Subcommand};
use console::Style;

use devsync_config::{AuthConfig, ClientConfig, Context as ClientContext};

use super::Context;

/// Arguments for the config command.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show the client configuration
    Show,

    /// Show the configuration file path
    Path,

    /// Show the current context name
    CurrentContext,

    /// List available contexts
    GetContexts,

    /// Switch to a different context
    UseContext {
        /// Context name to switch to
        name: String,
    },

    /// Create or update a context
    SetContext {
        /// Context name
        name: String,

        /// Backend API URL (e.g., https://che.example.com/api)
        #[arg(long)]
        server: Option<String>,

        /// Namespaces tracked by this context
        #[arg(short, long = "namespace")]
        namespaces: Vec<String>,

        /// Request timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Read the bearer token from this environment variable
        #[arg(long, conflicts_with = "token_file")]
        token_env: Option<String>,

        /// Read the bearer token from this file
        #[arg(long)]
        token_file: Option<PathBuf>,
    },

    /// Delete a context
    DeleteContext {
        /// Context name to delete
        name: String,
    },
}

/// Run the config command.
pub async fn run(args: ConfigArgs, ctx: &Context) -> Result<()> {
    match args.command {
        ConfigCommand::Show => cmd_show(ctx),
        ConfigCommand::Path => cmd_path(),
        ConfigCommand::CurrentContext => cmd_current_context(),
        ConfigCommand::GetContexts => cmd_get_contexts(),
        ConfigCommand::UseContext { name } => cmd_use_context(&name),
        ConfigCommand::SetContext {
            name,
            server,
            namespaces,
            timeout,
            token_env,
            token_file,
        } => {
            let auth = match (token_env, token_file) {
                (Some(var), _) => Some(AuthConfig::bearer_env(var)),
                (None, Some(path)) => Some(AuthConfig::bearer_file(path)),
                (None, None) => None,
            };
            cmd_set_context(&name, server, namespaces, timeout, auth)
        }
        ConfigCommand::DeleteContext { name } => cmd_delete_context(&name),
    }
}

fn cmd_show(ctx: &Context) -> Result<()> {
    let config = devsync_config::load_client_config()?;

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let dim = Style::new().dim();
    match devsync_config::client_config_path() {
        Some(path) if path.exists() => println!("{}", dim.apply_to(format!("# {}", path.display()))),
        _ => println!("{}", dim.apply_to("# no config file (using defaults)")),
    }
    print!("{}", config.to_yaml()?);
    Ok(())
}

fn cmd_path() -> Result<()> {
    let path = devsync_config::client_config_path()
        .ok_or_else(|| anyhow!("could not determine config directory"))?;
    println!("{}", path.display());
    Ok(())
}

fn cmd_current_context() -> Result<()> {
    let config = devsync_config::load_client_config()?;

    match &config.current_context {
        Some(name) => println!("{}", name),
        None => {
            println!("No current context set. Use 'devsync config use-context <name>' to set one.")
        }
    }
    Ok(())
}

fn cmd_get_contexts() -> Result<()> {
    let config = devsync_config::load_client_config()?;

    if config.contexts.is_empty() {
        println!("No contexts configured.");
        println!();
        println!("Create one with:");
        println!("  devsync config set-context local --server=http://localhost:8080/api -n my-namespace");
        return Ok(());
    }

    let current = config.current_context.as_deref();

    println!("CURRENT   NAME            SERVER                                   NAMESPACES");
    for ctx in &config.contexts {
        let marker = if current == Some(ctx.name.as_str()) {
            "*"
        } else {
            " "
        };
        println!(
            "{}         {:<15} {:<40} {}",
            marker,
            ctx.name,
            ctx.server,
            ctx.namespaces.join(",")
        );
    }
    Ok(())
}

fn cmd_use_context(name: &str) -> Result<()> {
    let mut config = devsync_config::load_client_config()?;

    config.use_context(name)?;
    devsync_config::save_client_config(&config)?;

    println!("Switched to context \"{}\".", name);
    Ok(())
}

fn cmd_set_context(
    name: &str,
    server: Option<String>,
    namespaces: Vec<String>,
    timeout: Option<u64>,
    auth: Option<AuthConfig>,
) -> Result<()> {
    let mut config = devsync_config::load_client_config()?;

    let created = apply_context(&mut config, name, server, namespaces, timeout, auth)?;
    if created {
        println!("Context \"{}\" created.", name);
    } else {
        println!("Context \"{}\" modified.", name);
    }

    // First context becomes current
    if config.current_context.is_none() && config.contexts.len() == 1 {
        config.current_context = Some(name.to_string());
        println!("Context \"{}\" set as current context.", name);
    }

    devsync_config::save_client_config(&config)?;
    Ok(())
}

/// Create or update `name` in `config`; returns true when it was created.
fn apply_context(
    config: &mut ClientConfig,
    name: &str,
    server: Option<String>,
    namespaces: Vec<String>,
    timeout: Option<u64>,
    auth: Option<AuthConfig>,
) -> Result<bool> {
    match config.get_context_mut(name) {
        Some(ctx) => {
            if let Some(url) = server {
                ctx.server = url;
            }
            if !namespaces.is_empty() {
                ctx.namespaces = namespaces;
            }
            if let Some(t) = timeout {
                ctx.timeout = Some(t);
            }
            if auth.is_some() {
                ctx.auth = auth;
            }
            Ok(false)
        }
        None => {
            let server = server
                .ok_or_else(|| anyhow!("--server is required when creating a new context"))?;

            let mut ctx = ClientContext::new(name, server).with_namespaces(namespaces);
            if let Some(t) = timeout {
                ctx = ctx.with_timeout(t);
            }
            if let Some(auth) = auth {
                ctx = ctx.with_auth(auth);
            }
            config.set_context(ctx);
            Ok(true)
        }
    }
}

fn cmd_delete_context(name: &str) -> Result<()> {
    let mut config = devsync_config::load_client_config()?;

    match config.remove_context(name) {
        Some(_) => {
            devsync_config::save_client_config(&config)?;
            println!("Context \"{}\" deleted.", name);
            if config.current_context.is_none() {
                println!(
                    "Note: No current context. Use 'devsync config use-context <name>' to set one."
                );
            }
        }
        None => println!("Context \"{}\" not found.", name),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_context_create_then_update() {
        let mut config = ClientConfig::new();

        let err = apply_context(&mut config, "dev", None, Vec::new(), None, None).unwrap_err();
        assert!(err.to_string().contains("--server"));

        let created = apply_context(
            &mut config,
            "dev",
            Some("http://localhost:8080/api".to_string()),
            vec!["alice-che".to_string()],
            None,
            Some(AuthConfig::bearer_env("DEV_TOKEN")),
        )
        .unwrap();
        assert!(created);

        let created = apply_context(
            &mut config,
            "dev",
            None,
            Vec::new(),
            Some(60),
            None,
        )
        .unwrap();
        assert!(!created);

        let ctx = config.get_context("dev").unwrap();
        assert_eq!(ctx.server, "http://localhost:8080/api");
        assert_eq!(ctx.namespaces, vec!["alice-che"]);
        assert_eq!(ctx.timeout, Some(60));
        assert_eq!(ctx.auth, Some(AuthConfig::bearer_env("DEV_TOKEN")));
    }
}
