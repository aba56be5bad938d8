use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use equipqr::admin::view::{SortColumn, SortDirection, SortState};
use equipqr::admin::RegistrationStore;
use equipqr::api::model::{BusinessProfile, RegisterRequest};
use equipqr::api::session::require_user;
use equipqr::api::ApiClient;
use equipqr::display::{render_registration, render_stats};
use equipqr::error::ApiError;
use equipqr::model::{BulkActionKind, InviteOptions, UrgencyLevel};
use equipqr::{app, config};

#[derive(Debug, Parser)]
#[command(author, version, about = "Review pending registrations of a business")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Business whose registrations are managed
    #[arg(long, global = true)]
    business: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show the signed-in account
    Whoami,
    /// List pending registrations
    List {
        /// Match username or email
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        email: Option<String>,
        /// normal, urgent or critical
        #[arg(long)]
        urgency: Option<UrgencyLevel>,
        /// Created at or after (RFC 3339)
        #[arg(long)]
        since: Option<DateTime<Utc>>,
        /// Created at or before (RFC 3339)
        #[arg(long)]
        until: Option<DateTime<Utc>>,
        /// created_at, email, username or days_pending
        #[arg(long, default_value = "created_at")]
        sort: SortColumn,
        #[arg(long)]
        asc: bool,
        #[arg(long, default_value = "1")]
        page: usize,
    },
    /// Counts by age and urgency
    Stats,
    Approve { id: String },
    Deny { id: String },
    /// Apply one action to several registrations
    Bulk {
        #[arg(value_enum)]
        action: BulkKind,
        #[arg(required = true)]
        ids: Vec<String>,
        /// Grant admin permissions to approved users
        #[arg(long)]
        admin: bool,
    },
    /// Create an invite link
    Invite {
        email: String,
        #[arg(long, default_value = "7")]
        days: u32,
        #[arg(long)]
        admin: bool,
        /// Let the backend mail the link
        #[arg(long)]
        send_email: bool,
    },
    /// Create an account, optionally with a business profile
    Register {
        username: String,
        email: String,
        #[arg(long)]
        business_name: Option<String>,
        #[arg(long, default_value = "")]
        country: String,
    },
    /// End the backend session
    Logout,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BulkKind {
    Approve,
    Deny,
    GenerateInvite,
}

impl From<BulkKind> for BulkActionKind {
    fn from(kind: BulkKind) -> Self {
        match kind {
            BulkKind::Approve => BulkActionKind::Approve,
            BulkKind::Deny => BulkActionKind::Deny,
            BulkKind::GenerateInvite => BulkActionKind::GenerateInvite,
        }
    }
}

fn business(args_business: &Option<String>) -> Result<&str> {
    args_business
        .as_deref()
        .ok_or_else(|| anyhow!("--business is required for this command"))
}

#[tokio::main]
async fn main() -> Result<()> {
    app::init_tracing();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let api = Arc::new(app::connect(&cfg).await?);

    if let Command::Register {
        username,
        email,
        business_name,
        country,
    } = &args.command
    {
        let password = std::env::var(&cfg.backend.password_env)
            .map_err(|_| anyhow!("set ${} to the new account's password", cfg.backend.password_env))?;
        let mut request = RegisterRequest::new(username.as_str(), email.as_str(), password);
        if let Some(name) = business_name {
            request = request.with_business(BusinessProfile {
                business_name: name.clone(),
                business_email: email.clone(),
                country: country.clone(),
                ..Default::default()
            });
        }
        api.register(&request).await?;
        println!("registered {}", email);
        return Ok(());
    }

    let user = match require_user(&api, cfg.credentials().as_ref()).await {
        Ok(user) => user,
        Err(ApiError::Unauthorized) => bail!(
            "not signed in: set backend.email in {} and ${}",
            args.config.display(),
            cfg.backend.password_env
        ),
        Err(err) => return Err(err.into()),
    };
    info!(user = %user.username, "signed in");

    let store = RegistrationStore::new(api.clone(), cfg.admin.page_size);
    let result = run(&args, &api, &store, &user.username, &user.email).await;
    if let Some(message) = store.error() {
        eprintln!("{}", message);
    }
    result
}

async fn run(
    args: &Args,
    api: &ApiClient,
    store: &RegistrationStore,
    username: &str,
    email: &str,
) -> Result<()> {
    match &args.command {
        Command::Whoami => println!("{} <{}>", username, email),
        Command::List {
            search,
            email,
            urgency,
            since,
            until,
            sort,
            asc,
            page,
        } => {
            store.load(business(&args.business)?).await?;
            store.update_filters(|f| {
                f.search = search.clone().unwrap_or_default();
                f.email = email.clone().unwrap_or_default();
                f.urgency = *urgency;
                f.date_range.start = *since;
                f.date_range.end = *until;
            });
            store.set_sort(SortState {
                column: *sort,
                direction: if *asc { SortDirection::Asc } else { SortDirection::Desc },
            });
            store.set_page(*page);
            let view = store.page_view();
            for reg in &view.items {
                println!("{}", render_registration(reg));
            }
            println!(
                "page {}/{} ({} matching)",
                view.page,
                view.total_pages.max(1),
                view.total
            );
        }
        Command::Stats => {
            store.load(business(&args.business)?).await?;
            println!("{}", render_stats(&store.stats()));
        }
        Command::Approve { id } => {
            store.approve(id).await?;
            println!("approved {}", id);
        }
        Command::Deny { id } => {
            store.deny(id).await?;
            println!("denied {}", id);
        }
        Command::Bulk { action, ids, admin } => {
            for id in ids {
                store.toggle_selection(id);
            }
            let admin_permissions = matches!(action, BulkKind::Approve).then_some(*admin);
            let response = store.bulk_selected((*action).into(), admin_permissions).await?;
            if !response.is_null() {
                println!("{}", serde_json::to_string_pretty(&response)?);
            }
        }
        Command::Invite {
            email,
            days,
            admin,
            send_email,
        } => {
            let link = store
                .generate_invite(&InviteOptions {
                    email: email.clone(),
                    expiration_days: *days,
                    is_admin: *admin,
                    send_email: *send_email,
                })
                .await?;
            println!("{}", link);
        }
        Command::Logout => {
            api.logout().await;
            println!("signed out");
        }
        Command::Register { .. } => {}
    }
    Ok(())
}
