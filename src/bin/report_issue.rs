use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

use equipqr::api::model::IssueDraft;
use equipqr::api::session::require_user;
use equipqr::display::render_issues;
use equipqr::error::ApiError;
use equipqr::http::FilePart;
use equipqr::{app, config};

#[derive(Debug, Parser)]
#[command(author, version, about = "List or report issues on a piece of equipment")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show the issues reported for an item
    List { equipment_id: String },
    /// Report a new issue, optionally with photos or videos
    Create {
        equipment_id: String,
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        description: String,
        /// Attachment to upload; repeatable
        #[arg(long = "file")]
        files: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    app::init_tracing();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let api = app::connect(&cfg).await?;
    let user = require_user(&api, cfg.credentials().as_ref())
        .await
        .map_err(|err| match err {
            ApiError::Unauthorized => anyhow!(
                "not signed in: set backend.email and ${}",
                cfg.backend.password_env
            ),
            other => other.into(),
        })?;
    info!(user = %user.username, "signed in");

    match args.command {
        Command::List { equipment_id } => {
            let issues = api.equipment_issues(&equipment_id).await?;
            print!("{}", render_issues(&issues));
        }
        Command::Create {
            equipment_id,
            title,
            description,
            files,
        } => {
            let mut attachments = Vec::with_capacity(files.len());
            for path in &files {
                let part = FilePart::from_path(path)
                    .await
                    .with_context(|| format!("failed to read {}", path.display()))?;
                attachments.push(part);
            }
            let draft = IssueDraft {
                title,
                description,
                equipment_id,
                attachments,
            };
            match api.create_issue(&draft).await {
                Ok(issue_id) => println!("created issue {}", issue_id),
                Err(ApiError::AttachmentUpload { issue_id, source }) => {
                    return Err(anyhow!(
                        "issue {} was created, but its files were not uploaded: {}",
                        issue_id,
                        source
                    ));
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
    Ok(())
}
