//! `invsheet` command-line entry point.
//!
//! # Responsibility
//! - Compose config, logging, store and dispatcher for one command.
//! - Print JSON to stdout; diagnostics go to the log backend.
//!
//! Usage:
//!   invsheet create "Party Loot"
//!   invsheet list
//!   invsheet add-item <sheet> Rope --weight 2
//!   invsheet apply <sheet> '{"type":"item_remove","data":"<item>"}'

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use invsheet_core::config::parse_write_mode;
use invsheet_core::db::open_db;
use invsheet_core::{
    Action, ActionEnvelope, ApiRequest, ApiResponse, CoreConfig, Dispatch, InProcessTransport,
    ItemDraft, Logging, Sheet, SheetApi, SheetState, SheetTransport, SyncDispatcher,
    TransportError,
};
use log::info;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Shared inventory sheet store.
#[derive(Parser, Debug)]
#[command(name = "invsheet", version)]
#[command(about = "Shared inventory sheets with optimistic sync")]
struct Args {
    /// SQLite database file (overrides INVSHEET_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// trace|debug|info|warn|error (overrides INVSHEET_LOG_LEVEL)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Absolute directory for rotating log files (overrides INVSHEET_LOG_DIR)
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// atomic|per_operation (overrides INVSHEET_WRITE_MODE)
    #[arg(long, global = true)]
    write_mode: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create an empty sheet
    Create { name: String },
    /// List sheet summaries
    List,
    /// Print one sheet
    Show { sheet: Uuid },
    /// Dispatch a JSON action envelope to a sheet
    Apply { sheet: Uuid, envelope: String },
    /// Add an item through the sync dispatcher
    AddItem {
        sheet: Uuid,
        name: String,
        #[arg(long, default_value_t = 0.0)]
        weight: f64,
        #[arg(long, default_value_t = 1)]
        quantity: u32,
        /// Member id; omit for unowned
        #[arg(long)]
        carried_by: Option<Uuid>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = resolve_config(&args)?;
    let _logging = Logging::init(config.log_level, config.log_dir.as_deref())
        .context("failed to start logging")?;

    let conn = open_db(&config.db_path)
        .with_context(|| format!("failed to open {}", config.db_path.display()))?;
    let api = Arc::new(SheetApi::new(conn).with_write_mode(config.write_mode));
    info!(
        "event=cli_start module=cli status=ok write_mode={} command={}",
        config.write_mode,
        command_name(&args.command)
    );

    match args.command {
        Command::Create { name } => {
            let body = json!({ "name": name }).to_string();
            print_response(api.handle(&ApiRequest::post("/sheets", body)))
        }
        Command::List => print_response(api.handle(&ApiRequest::get("/sheets"))),
        Command::Show { sheet } => {
            print_response(api.handle(&ApiRequest::get(format!("/sheets/{sheet}"))))
        }
        Command::Apply { sheet, envelope } => {
            let envelope: ActionEnvelope =
                serde_json::from_str(&envelope).context("envelope is not valid JSON")?;
            let action = Action::from_envelope(&envelope)?;
            sync_action(api, sheet, action).await
        }
        Command::AddItem {
            sheet,
            name,
            weight,
            quantity,
            carried_by,
        } => {
            let draft = ItemDraft {
                weight,
                quantity,
                carried_by,
                ..ItemDraft::named(name)
            };
            sync_action(api, sheet, Action::ItemAdd(draft)).await
        }
    }
}

fn resolve_config(args: &Args) -> Result<CoreConfig> {
    let mut config = CoreConfig::from_env()?;
    if let Some(db) = &args.db {
        config.db_path = db.clone();
    }
    if let Some(level) = &args.log_level {
        config.log_level = invsheet_core::logging::normalize_level(level)?;
    }
    if let Some(dir) = &args.log_dir {
        config.log_dir = Some(invsheet_core::logging::normalize_log_dir(dir)?);
    }
    if let Some(mode) = &args.write_mode {
        config.write_mode = parse_write_mode(mode)?;
    }
    Ok(config)
}

/// Runs one action through the dispatcher and prints the optimistic view,
/// then the reconciled one.
async fn sync_action(api: Arc<SheetApi>, sheet_id: Uuid, action: Action) -> Result<()> {
    let transport: Arc<dyn SheetTransport> = Arc::new(InProcessTransport::new(api));
    let initial = transport.fetch_sheet(sheet_id).await?;
    let dispatcher = SyncDispatcher::new(
        SheetState::confirmed(initial),
        transport,
        tokio::runtime::Handle::current(),
    );

    let (tx, mut rx) = mpsc::unbounded_channel::<Result<Sheet, TransportError>>();
    let catch_tx = tx.clone();
    let handle = dispatcher.dispatch(
        Dispatch::to_server(action)
            .on_then(move |sheet| {
                let _ = tx.send(Ok(sheet.clone()));
            })
            .on_catch(move |err| {
                let _ = catch_tx.send(Err(err.clone()));
            }),
    );
    print_stage("optimistic", &dispatcher.state())?;

    if let Some(handle) = handle {
        handle.await.context("dispatch task failed")?;
    }
    match rx.recv().await {
        Some(Ok(sheet)) => {
            dispatcher.reconcile(sheet);
            print_stage("confirmed", &dispatcher.state())
        }
        Some(Err(err)) => bail!("server rejected action: {err}"),
        None => bail!("dispatch finished without an outcome"),
    }
}

fn print_stage(stage: &str, state: &SheetState) -> Result<()> {
    let output = json!({ "stage": stage, "state": state });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn print_response(response: ApiResponse) -> Result<()> {
    if let Some(detail) = response.error() {
        bail!("{} {}: {}", response.status, detail.kind, detail.message);
    }
    if !response.is_success() {
        bail!("{} {}", response.status, response.body);
    }
    println!("{}", serde_json::to_string_pretty(&response.body)?);
    Ok(())
}

fn command_name(command: &Command) -> &'static str {
    match command {
        Command::Create { .. } => "create",
        Command::List => "list",
        Command::Show { .. } => "show",
        Command::Apply { .. } => "apply",
        Command::AddItem { .. } => "add-item",
    }
}
