// =============================================================================
// Meridian Perp Engine — Main Entry Point
// =============================================================================
//
// The engine starts in dry-run + STOPPED for safety. An explicit start
// command (control surface) is required before any cycle runs; live trading
// additionally requires dry_run=false in the config or start request.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod binance;
mod config;
mod context;
mod executor;
mod indicators;
mod monitor;
mod orchestrator;
mod position;
mod risk;
mod scanner;
mod signal;
mod store;
mod supervisor;
mod symbol_lock;
mod telemetry;
mod types;

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::binance::user_stream::{self, UserStreamEvent};
use crate::config::EngineConfig;
use crate::context::EngineContext;
use crate::monitor::PositionMonitor;
use crate::orchestrator::{EngineCommand, Orchestrator};
use crate::supervisor::{Heartbeat, Supervisor};
use crate::types::{Direction, ExitReason};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║          Meridian Perp Engine — Starting Up             ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let mut config = EngineConfig::load("engine_config.json").unwrap_or_else(|e| {
        warn!(error = %e, "failed to load config, using defaults");
        EngineConfig::default()
    });

    // SAFETY: always boot in dry-run; the operator opts into live trading.
    config.dry_run = true;

    // Whitelist override from env.
    if let Ok(syms) = std::env::var("MERIDIAN_SYMBOLS") {
        let symbols: Vec<String> = syms
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
        if config.testnet {
            config.scanner.testnet_whitelist = symbols;
        } else {
            config.scanner.whitelist = symbols;
        }
    }

    info!(
        testnet = config.testnet,
        dry_run = config.dry_run,
        cycle_interval_secs = config.cycle_interval_secs,
        max_symbols = config.scanner.max_symbols,
        "engine configured (SAFE mode: dry-run)"
    );

    // ── 2. Build the engine context ──────────────────────────────────────
    let api_key = std::env::var("BINANCE_API_KEY").unwrap_or_default();
    let api_secret = std::env::var("BINANCE_API_SECRET").unwrap_or_default();
    let ctx = EngineContext::new(config, api_key, api_secret);

    // Warm the symbol-filter cache; a failure here is not fatal (the start
    // command retries before the first cycle).
    if let Err(e) = ctx.client.refresh_filters().await {
        warn!(error = %e, "initial filter refresh failed");
    }

    // ── 3. Supervisor ────────────────────────────────────────────────────
    let supervisor = Supervisor::new(ctx.config.clone(), ctx.risk.clone(), ctx.telemetry.clone());
    tokio::spawn(supervisor.clone().run());

    // ── 4. User-data stream ──────────────────────────────────────────────
    let (stream_tx, _) = user_stream::channel();
    let stream_hb = Heartbeat::new("user-stream");
    {
        let spawn_stream = {
            let client = ctx.client.clone();
            let tx = stream_tx.clone();
            let hb = stream_hb.clone();
            move || {
                let client = client.clone();
                let tx = tx.clone();
                let hb = hb.clone();
                tokio::spawn(async move {
                    loop {
                        hb.beat();
                        if let Err(e) = user_stream::run_user_stream(&client, &tx, &hb).await {
                            error!(error = %e, "user stream error — reconnecting in 5s");
                        }
                        tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;
                    }
                })
            }
        };
        let handle = spawn_stream();
        supervisor.register(stream_hb.clone(), handle, Box::new(spawn_stream));
    }

    // Fold user-stream events back into the book (fill reconciliation).
    {
        let ctx = ctx.clone();
        let mut rx = stream_tx.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => apply_stream_event(&ctx, event),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "user stream consumer lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                }
            }
        });
    }

    // ── 5. Position monitor ──────────────────────────────────────────────
    let monitor_hb = Heartbeat::new("position-monitor");
    {
        let spawn_monitor = {
            let ctx = ctx.clone();
            let hb = monitor_hb.clone();
            move || {
                let monitor = Arc::new(PositionMonitor::new(
                    ctx.client.clone(),
                    ctx.book.clone(),
                    ctx.executor.clone(),
                    ctx.risk.clone(),
                    ctx.config.clone(),
                    ctx.telemetry.clone(),
                    hb.clone(),
                ));
                tokio::spawn(monitor.run())
            }
        };
        let handle = spawn_monitor();
        supervisor.register(monitor_hb.clone(), handle, Box::new(spawn_monitor));
    }

    // ── 6. Orchestrator ──────────────────────────────────────────────────
    let (cmd_tx, cmd_rx) = mpsc::channel::<EngineCommand>(64);
    let cmd_rx = Arc::new(tokio::sync::Mutex::new(cmd_rx));
    let orch_hb = Heartbeat::new("orchestrator");
    let orchestrator = Orchestrator::new(
        ctx.config.clone(),
        ctx.client.clone(),
        ctx.scanner.clone(),
        ctx.generator.clone(),
        ctx.risk.clone(),
        ctx.executor.clone(),
        ctx.book.clone(),
        ctx.state_store.clone(),
        ctx.telemetry.clone(),
        orch_hb.clone(),
    );
    {
        let spawn_orchestrator = {
            let orchestrator = orchestrator.clone();
            let cmd_rx = cmd_rx.clone();
            move || {
                let orchestrator = orchestrator.clone();
                let cmd_rx = cmd_rx.clone();
                tokio::spawn(orchestrator.run(cmd_rx))
            }
        };
        let handle = spawn_orchestrator();
        supervisor.register(orch_hb.clone(), handle, Box::new(spawn_orchestrator));
    }

    // ── 7. Control surface ───────────────────────────────────────────────
    let bind_addr =
        std::env::var("MERIDIAN_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".into());
    {
        let control_state = api::control::ControlState {
            commands: cmd_tx.clone(),
            ctx: ctx.clone(),
            orchestrator: orchestrator.clone(),
        };
        let bind_addr = bind_addr.clone();
        tokio::spawn(async move {
            let app = api::control::router(control_state);
            let listener = tokio::net::TcpListener::bind(&bind_addr)
                .await
                .expect("failed to bind control surface");
            info!(addr = %bind_addr, "control surface listening");
            axum::serve(listener, app)
                .await
                .expect("control surface failed");
        });
    }

    info!("all subsystems running — engine STOPPED until a start command arrives");

    // ── 8. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received — stopping gracefully");

    // Let the current cycle drain, then stop.
    let _ = cmd_tx.send(EngineCommand::Stop).await;
    tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;

    if let Err(e) = ctx.config.read().save("engine_config.json") {
        error!(error = %e, "failed to save config on shutdown");
    }

    info!("Meridian Perp Engine shut down complete.");
    Ok(())
}

/// Reconcile a user-stream event into the local book. Positions flattened on
/// the exchange (a protective order fired) become trade records here.
fn apply_stream_event(ctx: &Arc<EngineContext>, event: UserStreamEvent) {
    match event {
        UserStreamEvent::AccountUpdate { positions, .. } => {
            for (symbol, amount) in positions {
                if amount != 0.0 || !ctx.book.contains(&symbol) {
                    continue;
                }
                let Some(position) = ctx.book.get(&symbol) else { continue };

                // The exchange closed what we still track: infer the reason
                // from where the stop sat.
                let exit_price = if position.mark_price > 0.0 {
                    position.mark_price
                } else {
                    position.stop_price
                };
                let reason = infer_exit_reason(
                    position.direction,
                    position.entry_price,
                    position.stop_price,
                    position.breakeven_armed,
                    position.tp_filled,
                    exit_price,
                );

                info!(symbol = %symbol, reason = %reason, "exchange flattened position — reconciling");
                let meta = ctx.executor.persisted_meta(&symbol);
                if let Some(record) = ctx.book.close(&symbol, exit_price, 0.0, reason) {
                    if let Err(e) = ctx.trade_store.append(&record) {
                        warn!(symbol = %symbol, error = %e, "trade store append failed");
                    }
                    let _ = ctx.state_store.delete_meta(&symbol);
                    ctx.risk.register_close(meta.signal_type, &record);
                }
            }
        }
        UserStreamEvent::OrderUpdate {
            symbol,
            status,
            realized_pnl,
            ..
        } => {
            if status == "FILLED" && realized_pnl != 0.0 {
                tracing::debug!(symbol = %symbol, realized_pnl, "order fill reported by stream");
            }
        }
        UserStreamEvent::Expired => {}
    }
}

/// Best-effort exit-reason inference for fills that happened exchange-side.
fn infer_exit_reason(
    direction: Direction,
    entry: f64,
    stop: f64,
    breakeven_armed: bool,
    tp_filled: u8,
    exit_price: f64,
) -> ExitReason {
    let stopped_out = match direction {
        Direction::Long => exit_price <= stop * 1.001,
        Direction::Short => exit_price >= stop * 0.999,
    };
    if stopped_out {
        let at_breakeven = breakeven_armed
            && match direction {
                Direction::Long => stop >= entry,
                Direction::Short => stop <= entry,
            };
        if at_breakeven {
            ExitReason::Breakeven
        } else {
            ExitReason::StopLoss
        }
    } else {
        ExitReason::TakeProfit(tp_filled + 1)
    }
}
