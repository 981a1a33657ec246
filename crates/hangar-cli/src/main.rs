//! Hangar CLI - drive site projects through their lifecycle.

mod client;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use hangar_control::api::TransitionResponse;
use hangar_control::types::Page;
use hangar_control::{Action, ProjectId, TransitionConfig};

use client::ControlClient;

#[derive(Parser)]
#[command(name = "hangar")]
#[command(about = "Manage Hangar site projects")]
#[command(version)]
struct Cli {
    /// Control service URL
    #[arg(long, global = true, env = "HANGAR_URL", default_value = "http://127.0.0.1:8090")]
    url: String,

    /// Request timeout in seconds
    #[arg(long, global = true, default_value_t = 330)]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a project from a template
    Create {
        /// Project ID
        id: String,

        /// Template name
        #[arg(short, long)]
        template: Option<String>,

        #[command(flatten)]
        content: ContentArgs,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Replace a draft's name or pages
    Edit {
        /// Project ID
        id: String,

        #[command(flatten)]
        content: ContentArgs,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Build a draft
    Build(Target),

    /// Discard a build and return to draft
    Revert(Target),

    /// Provision containers for a build
    Deploy(Target),

    /// Start serving a deployed project
    Start(Target),

    /// Stop serving a project
    Stop(Target),

    /// Roll new content onto a deployed project
    Update {
        /// Project ID
        id: String,

        #[command(flatten)]
        content: ContentArgs,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Remove a project and all of its resources
    Delete(Target),

    /// Show a project and the actions available on it
    Status {
        /// Project ID
        id: String,
    },

    /// List projects
    List,

    /// Show finished transitions of a project
    History {
        /// Project ID
        id: String,
    },
}

#[derive(Args)]
struct Target {
    /// Project ID
    id: String,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(Args)]
struct ContentArgs {
    /// Display name
    #[arg(short, long)]
    name: Option<String>,

    /// JSON file holding the page tree
    #[arg(short, long)]
    pages: Option<PathBuf>,
}

#[derive(Args)]
struct RunArgs {
    /// Deadline for the side-effect stages, in seconds
    #[arg(long)]
    deadline: Option<u64>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let client = ControlClient::new(&cli.url, Duration::from_secs(cli.timeout))?;

    let (id, action, config) = match cli.command {
        Commands::Create {
            id,
            template,
            content,
            run,
        } => {
            let mut config = transition_config(&content, &run)?;
            config.template = template;
            (id, Action::Create, config)
        }
        Commands::Edit { id, content, run } => (id, Action::Edit, transition_config(&content, &run)?),
        Commands::Update { id, content, run } => {
            (id, Action::Update, transition_config(&content, &run)?)
        }
        Commands::Build(target) => target.into_request(Action::Build),
        Commands::Revert(target) => target.into_request(Action::Revert),
        Commands::Deploy(target) => target.into_request(Action::Deploy),
        Commands::Start(target) => target.into_request(Action::Start),
        Commands::Stop(target) => target.into_request(Action::Stop),
        Commands::Delete(target) => target.into_request(Action::Delete),
        Commands::Status { id } => {
            let response = client.project(&parse_id(&id)?).await?;
            println!("{} ({})", response.project.name, response.project.id);
            println!("  State:    {}", response.project.state);
            println!("  Modified: {}", response.project.last_modified);
            if let Some(deployment) = &response.project.deployment {
                for container in &deployment.containers {
                    println!(
                        "  {}: {} -> {}",
                        container.service, container.name, container.host_port
                    );
                }
            }
            let actions: Vec<&str> = response.available_actions.iter().map(Action::as_str).collect();
            println!("  Actions:  {}", actions.join(", "));
            return Ok(());
        }
        Commands::List => {
            for project in client.projects().await? {
                println!(
                    "{:<24} {:<8} {}",
                    project.id.as_str(),
                    project.state.as_str(),
                    project.name
                );
            }
            return Ok(());
        }
        Commands::History { id } => {
            for record in client.history(&parse_id(&id)?).await? {
                println!(
                    "{} {:<7} {} -> {} {:?} ({}ms)",
                    record.started_at,
                    record.action.as_str(),
                    record.from_state,
                    record.to_state,
                    record.outcome,
                    record.total_duration_ms()
                );
            }
            return Ok(());
        }
    };

    let id = parse_id(&id)?;
    let response = client.execute(&id, action, &config).await?;
    report(&id, action, &response)
}

impl Target {
    fn into_request(self, action: Action) -> (String, Action, TransitionConfig) {
        let config = TransitionConfig {
            timeout_secs: self.run.deadline,
            ..TransitionConfig::default()
        };
        (self.id, action, config)
    }
}

fn parse_id(id: &str) -> anyhow::Result<ProjectId> {
    ProjectId::parse(id).map_err(Into::into)
}

fn transition_config(content: &ContentArgs, run: &RunArgs) -> anyhow::Result<TransitionConfig> {
    let pages = content.pages.as_deref().map(load_pages).transpose()?;
    Ok(TransitionConfig {
        name: content.name.clone(),
        template: None,
        pages,
        timeout_secs: run.deadline,
    })
}

fn load_pages(path: &Path) -> anyhow::Result<Vec<Page>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("invalid page tree in {}", path.display()))
}

fn report(id: &ProjectId, action: Action, response: &TransitionResponse) -> anyhow::Result<()> {
    if response.success {
        let state = response
            .new_state
            .map_or_else(|| "?".to_owned(), |s| s.to_string());
        println!("{action} {id}: {state}");
        for warning in &response.warnings {
            println!("  warning: {warning}");
        }
        return Ok(());
    }

    match &response.error {
        Some(error) => bail!(
            "{} failed at {}: {} ({}{})",
            error.action,
            error.stage,
            error.message,
            error.kind,
            if error.retryable { ", retryable" } else { "" }
        ),
        None => bail!("{action} {id} failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_create_with_template() {
        let cli = Cli::try_parse_from([
            "hangar", "create", "site-1", "--template", "blank", "--name", "My Site",
        ])
        .unwrap();
        match cli.command {
            Commands::Create {
                id,
                template,
                content,
                ..
            } => {
                assert_eq!(id, "site-1");
                assert_eq!(template.as_deref(), Some("blank"));
                assert_eq!(content.name.as_deref(), Some("My Site"));
            }
            _ => panic!("expected create"),
        }
    }

    #[test]
    fn global_url_after_subcommand() {
        let cli = Cli::try_parse_from([
            "hangar",
            "deploy",
            "site-1",
            "--url",
            "http://ctl:9000",
            "--deadline",
            "30",
        ])
        .unwrap();
        assert_eq!(cli.url, "http://ctl:9000");
        let Commands::Deploy(target) = cli.command else {
            panic!("expected deploy");
        };
        let (_, action, config) = target.into_request(Action::Deploy);
        assert_eq!(action, Action::Deploy);
        assert_eq!(config.timeout_secs, Some(30));
    }

    #[test]
    fn failed_response_is_an_error() {
        let response: TransitionResponse = serde_json::from_value(serde_json::json!({
            "success": false,
            "error": {
                "kind": "IllegalTransitionError",
                "message": "illegal transition: BUILD is not allowed from OFFLINE",
                "stage": "check",
                "action": "BUILD",
                "projectId": "site-1",
                "retryable": false
            }
        }))
        .unwrap();
        let id = ProjectId::parse("site-1").unwrap();

        let err = report(&id, Action::Build, &response).unwrap_err();
        assert!(err.to_string().contains("IllegalTransitionError"));
    }
}
