//! TIRANGA: timed three-colour betting round engine
//!
//! Entry point. Loads configuration, initialises structured logging,
//! restores rounds and accounts from disk (resolving any round that
//! closed while the process was down), then drives the round clock and
//! serves the HTTP API until Ctrl+C.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use tiranga::api;
use tiranga::config::AppConfig;
use tiranga::engine::scheduler::{TickReport, Transition};
use tiranga::game::{Collaborators, Game};
use tiranga::notify::webhook::WebhookNotifier;
use tiranga::notify::{NotifierSet, TracingNotifier};
use tiranga::storage::FileStore;

const BANNER: &str = r#"
 _____ ___ ____      _    _   _  ____    _
|_   _|_ _|  _ \    / \  | \ | |/ ___|  / \
  | |  | || |_) |  / _ \ |  \| | |  _  / _ \
  | |  | ||  _ <  / ___ \| |\  | |_| |/ ___ \
  |_| |___|_| \_\/_/   \_\_| \_|\____/_/   \_\

  RED · GREEN · VIOLET round engine
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path = std::env::var("TIRANGA_CONFIG").unwrap_or_else(|_| "config.toml".into());
    let cfg = AppConfig::load_or_default(&config_path)?;

    init_logging();

    println!("{BANNER}");
    info!(
        config = %config_path,
        round_duration_secs = cfg.game.round_duration_secs,
        betting_cutoff_secs = cfg.game.betting_cutoff_secs,
        min_stake = cfg.game.min_stake,
        data_dir = %cfg.storage.data_dir,
        "TIRANGA starting up"
    );

    // -- Collaborators ---------------------------------------------------

    let store = FileStore::open(&cfg.storage.data_dir)
        .with_context(|| format!("Failed to open data dir {}", cfg.storage.data_dir))?;

    let mut notifier = NotifierSet::new().with(Arc::new(TracingNotifier));
    match cfg.alerts.webhook_url() {
        Some(url) => {
            notifier = notifier.with(Arc::new(WebhookNotifier::new(url)?));
            info!("Webhook notifications enabled");
        }
        None => info!("No webhook configured"),
    }

    let deps = Collaborators::system(Arc::new(store)).with_notifier(Arc::new(notifier));

    // -- Restore ---------------------------------------------------------

    let (game, report) = Game::start(&cfg.game, &cfg.wallet, deps)
        .context("Failed to restore game state")?;
    log_tick_report(&report);
    let game = Arc::new(game);

    if cfg.api.enabled {
        api::spawn_api(game.clone(), cfg.api.port).await?;
    } else {
        info!("HTTP API disabled");
    }

    // -- Main loop -------------------------------------------------------

    let mut interval = tokio::time::interval(cfg.game.tick_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        tick_interval_millis = cfg.game.tick_interval_millis,
        "Entering round loop. Press Ctrl+C to stop."
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let game = game.clone();
                match tokio::task::spawn_blocking(move || game.tick()).await {
                    Ok(Ok(report)) => log_tick_report(&report),
                    Ok(Err(e)) => error!(error = %e, "Tick failed, retrying next tick"),
                    Err(e) => error!(error = %e, "Tick task panicked"),
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    let round = game.current_round();
    info!(round = %round, "TIRANGA stopped. State is on disk; an unfinished round resumes on restart.");
    Ok(())
}

fn log_tick_report(report: &TickReport) {
    if report.skipped {
        warn!("Previous tick still running, skipped");
        return;
    }
    for transition in &report.transitions {
        if let Transition::Resolved { round_id, outcome, paid } = transition {
            info!(round_id, outcome = %outcome, paid, "Tick resolved round");
        }
    }
}

fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("tiranga=info"));

    let json_logging = std::env::var("TIRANGA_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
