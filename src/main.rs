use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

use equipqr::api::{ApiClient, EquipmentLookup};
use equipqr::display::{render_equipment, render_issues};
use equipqr::scanner::{
    CameraSlot, ChannelDecoder, FailureCause, ProcessDecoder, QrDecoder, ScanSession, ScanState,
    CAMERA_ERROR,
};
use equipqr::{app, config};

#[derive(Debug, Parser)]
#[command(author, version, about = "Scan equipment QR codes and show their records")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Read payloads from stdin, one per line, instead of the camera
    #[arg(long)]
    stdin: bool,

    /// Exit after the first lookup
    #[arg(long)]
    once: bool,

    /// Also list the reported issues of each scanned item
    #[arg(long)]
    issues: bool,

    /// Switch the flashlight on while scanning
    #[arg(long)]
    torch: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    app::init_tracing();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let api = Arc::new(app::connect(&cfg).await?);
    let lookup: Arc<dyn EquipmentLookup> = api.clone();

    if args.stdin {
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if tx.send(line).await.is_err() {
                    break;
                }
            }
        });
        run(ScanSession::new(ChannelDecoder::new(rx), lookup), &api, &args).await
    } else {
        let decoder = ProcessDecoder::new(
            cfg.scanner.decoder_command.clone(),
            &cfg.scanner.device,
            CameraSlot::new(),
        )
        .with_torch(cfg.scanner.torch_led.as_ref().map(PathBuf::from))
        .with_dedupe_window(Duration::from_millis(cfg.scanner.dedupe_window_ms));
        run(ScanSession::new(decoder, lookup), &api, &args).await
    }
}

async fn run<D: QrDecoder>(
    mut session: ScanSession<D>,
    api: &ApiClient,
    args: &Args,
) -> Result<()> {
    if session.start_scan().await.is_err() {
        let message = session.error().unwrap_or(CAMERA_ERROR).to_string();
        return Err(anyhow!(message));
    }
    if args.torch {
        if let Err(err) = session.set_torch(true).await {
            warn!(%err, "torch unavailable");
        }
    }
    info!(session = %session.id(), "scanning; press Ctrl-C to quit");

    let outcome = loop {
        let state = tokio::select! {
            state = session.next_outcome() => state.clone(),
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break Ok(());
            }
        };

        match state {
            ScanState::Result(equipment) => {
                print!("{}", render_equipment(&equipment));
                if args.issues {
                    match api.equipment_issues(&equipment.id).await {
                        Ok(issues) => print!("{}", render_issues(&issues)),
                        Err(err) => warn!(%err, "failed to load issues"),
                    }
                }
            }
            ScanState::Failed {
                cause: FailureCause::Camera,
                message,
            } => {
                if args.stdin {
                    info!("input closed");
                    break Ok(());
                }
                break Err(anyhow!(message));
            }
            ScanState::Failed { message, .. } => eprintln!("{}", message),
            _ => {}
        }

        if args.once {
            break Ok(());
        }
        session.reset();
        if let Err(err) = session.start_scan().await {
            break Err(err.into());
        }
    };

    session.stop().await;
    outcome
}
