// =============================================================================
// Orchestrator — the autonomous cycle loop and engine state machine
// =============================================================================
//
// States: STOPPED → STARTING → RUNNING ⇄ PAUSED → STOPPING → STOPPED.
// Transitions come from control commands and from the risk manager tripping
// a circuit breaker (RUNNING → PAUSED, and back when the cooldown elapses).
//
// While RUNNING, one cycle per interval:
//   scan → signals (bounded parallel fan-out, per-call deadline) →
//   admissions (risk manager, scanner order preserved as tiebreak) →
//   executions (parallel across symbols, serialized per symbol).
//
// Cycles are strictly serialized; commands are handled between cycles. The
// scan/signal/admission phases run under a 2×-interval deadline; the
// execution phase is never aborted mid-order and is bounded by the
// executor's own attempt timeouts. A cycle always ends with a summary.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::binance::client::FuturesClient;
use crate::config::{ConfigPatch, EngineConfig};
use crate::executor::{ExecutionOutcome, OrderExecutor};
use crate::position::PositionBook;
use crate::risk::{Admission, RejectReason, RiskManager};
use crate::scanner::MarketScanner;
use crate::signal::{Signal, SignalGenerator, SignalVerdict};
use crate::store::StateStore;
use crate::supervisor::Heartbeat;
use crate::telemetry::{Notification, Telemetry};
use crate::types::{Direction, EngineState, ExitReason};

/// Control-surface commands the engine accepts.
#[derive(Debug, Clone)]
pub enum EngineCommand {
    Start { dry_run: Option<bool> },
    Stop,
    Pause,
    Resume,
    UpdateConfig(ConfigPatch),
    ManualClose { symbol: String },
    ManualTrade {
        symbol: String,
        direction: Direction,
        notional: f64,
        leverage: Option<u32>,
    },
}

/// End-of-cycle report. Always emitted, even for aborted cycles.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleSummary {
    pub scanned: usize,
    pub signals: usize,
    pub admitted: usize,
    pub executed: usize,
    pub rejected_by_reason: HashMap<String, u32>,
}

impl CycleSummary {
    fn reject(&mut self, reason: RejectReason) {
        *self.rejected_by_reason.entry(reason.to_string()).or_insert(0) += 1;
    }
}

pub struct Orchestrator {
    config: Arc<RwLock<EngineConfig>>,
    client: Arc<FuturesClient>,
    scanner: Arc<MarketScanner>,
    generator: Arc<SignalGenerator>,
    risk: Arc<RiskManager>,
    executor: Arc<OrderExecutor>,
    book: Arc<PositionBook>,
    state_store: Arc<dyn StateStore>,
    telemetry: Arc<Telemetry>,
    heartbeat: Arc<Heartbeat>,
    state: RwLock<EngineState>,
    paused_by_breaker: RwLock<bool>,
    /// Overrun carried from the previous cycle; shortens the next deadline.
    deadline_debt: RwLock<Duration>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<RwLock<EngineConfig>>,
        client: Arc<FuturesClient>,
        scanner: Arc<MarketScanner>,
        generator: Arc<SignalGenerator>,
        risk: Arc<RiskManager>,
        executor: Arc<OrderExecutor>,
        book: Arc<PositionBook>,
        state_store: Arc<dyn StateStore>,
        telemetry: Arc<Telemetry>,
        heartbeat: Arc<Heartbeat>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            client,
            scanner,
            generator,
            risk,
            executor,
            book,
            state_store,
            telemetry,
            heartbeat,
            state: RwLock::new(EngineState::Stopped),
            paused_by_breaker: RwLock::new(false),
            deadline_debt: RwLock::new(Duration::ZERO),
        })
    }

    pub fn state(&self) -> EngineState {
        *self.state.read()
    }

    fn set_state(&self, next: EngineState) {
        let mut state = self.state.write();
        if *state != next {
            info!(from = %*state, to = %next, "engine state transition");
            *state = next;
        }
    }

    // -------------------------------------------------------------------------
    // Main loop
    // -------------------------------------------------------------------------

    /// Run the command/cycle loop until the command channel closes. The
    /// receiver is shared behind a mutex so the supervisor's restart factory
    /// can respawn this loop without losing queued commands.
    pub async fn run(self: Arc<Self>, commands: Arc<tokio::sync::Mutex<mpsc::Receiver<EngineCommand>>>) {
        info!("orchestrator started");
        loop {
            self.heartbeat.beat();
            self.reconcile_breaker_state();

            let interval = Duration::from_secs(self.config.read().cycle_interval_secs.max(1));
            let running = self.state() == EngineState::Running;

            tokio::select! {
                cmd = async { commands.lock().await.recv().await } => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd).await,
                        None => {
                            info!("command channel closed — orchestrator exiting");
                            self.set_state(EngineState::Stopped);
                            return;
                        }
                    }
                }
                _ = tokio::time::sleep(interval), if running => {
                    let started = std::time::Instant::now();
                    let summary = self.run_cycle(interval).await;
                    let wall = started.elapsed();

                    if wall > interval * 2 {
                        warn!(
                            wall_secs = wall.as_secs(),
                            interval_secs = interval.as_secs(),
                            "cycle exceeded twice the configured interval — shortening the next deadline"
                        );
                        *self.deadline_debt.write() = wall - interval * 2;
                    } else {
                        *self.deadline_debt.write() = Duration::ZERO;
                    }

                    info!(
                        scanned = summary.scanned,
                        signals = summary.signals,
                        admitted = summary.admitted,
                        executed = summary.executed,
                        rejected = ?summary.rejected_by_reason,
                        cycle = self.telemetry.record_cycle_complete(),
                        wall_ms = wall.as_millis() as u64,
                        "cycle complete"
                    );

                    if let Ok(value) = serde_json::to_value(&summary) {
                        let _ = self.state_store.put_record("cycle:metrics:latest", &value);
                    }
                }
            }
        }
    }

    /// RUNNING ⇄ PAUSED driven by the circuit breaker.
    fn reconcile_breaker_state(&self) {
        let tripped = self.risk.is_tripped();
        match self.state() {
            EngineState::Running if tripped => {
                let trip = self.risk.breaker();
                self.set_state(EngineState::Paused);
                *self.paused_by_breaker.write() = true;
                if let Some(trip) = trip {
                    self.telemetry.notify(Notification::CircuitBreakerTripped {
                        reason: trip.reason,
                        cooldown_until: trip.until.to_rfc3339(),
                    });
                }
            }
            EngineState::Paused if !tripped && *self.paused_by_breaker.read() => {
                *self.paused_by_breaker.write() = false;
                self.set_state(EngineState::Running);
            }
            _ => {}
        }
    }

    async fn handle_command(&self, cmd: EngineCommand) {
        debug!(command = ?cmd, "control command received");
        match cmd {
            EngineCommand::Start { dry_run } => {
                if self.state() != EngineState::Stopped {
                    warn!(state = %self.state(), "start ignored — engine not stopped");
                    return;
                }
                self.set_state(EngineState::Starting);
                if let Some(dry) = dry_run {
                    self.config.write().dry_run = dry;
                }
                // Warm the symbol-filter cache before the first cycle.
                if let Err(e) = self.client.refresh_filters().await {
                    error!(error = %e, "filter refresh failed on start — staying stopped");
                    self.set_state(EngineState::Stopped);
                    return;
                }
                // The engine assumes one-way position mode throughout.
                if !self.config.read().dry_run {
                    match self.client.is_hedge_mode().await {
                        Ok(true) => {
                            error!("account is in hedge mode — switch to one-way before starting");
                            self.set_state(EngineState::Stopped);
                            return;
                        }
                        Ok(false) => {}
                        Err(e) => warn!(error = %e, "position mode check failed — continuing"),
                    }
                }
                self.set_state(EngineState::Running);
            }
            EngineCommand::Stop => {
                self.set_state(EngineState::Stopping);
                // The current cycle (if any) has already completed: commands
                // are processed between cycles. Nothing in flight to drain
                // beyond pending entry limits, which the monitor reconciles.
                self.set_state(EngineState::Stopped);
            }
            EngineCommand::Pause => {
                *self.paused_by_breaker.write() = false;
                self.set_state(EngineState::Paused);
            }
            EngineCommand::Resume => {
                if self.risk.is_tripped() {
                    warn!("resume ignored — circuit breaker active");
                    return;
                }
                if self.state() == EngineState::Paused {
                    self.set_state(EngineState::Running);
                }
            }
            EngineCommand::UpdateConfig(patch) => {
                let changed = self.config.write().apply_patch(&patch);
                info!(changed, "config patch applied");
            }
            EngineCommand::ManualClose { symbol } => {
                let meta = self.executor.persisted_meta(&symbol);
                match self.executor.close_full_market(&symbol, ExitReason::Manual).await {
                    Ok(Some(record)) => {
                        self.risk.register_close(meta.signal_type, &record);
                    }
                    Ok(None) => warn!(symbol = %symbol, "manual close: no tracked position"),
                    Err(e) => error!(symbol = %symbol, error = %e, "manual close failed"),
                }
            }
            EngineCommand::ManualTrade {
                symbol,
                direction,
                notional,
                leverage,
            } => {
                self.manual_trade(&symbol, direction, notional, leverage).await;
            }
        }
    }

    async fn manual_trade(
        &self,
        symbol: &str,
        direction: Direction,
        notional: f64,
        leverage: Option<u32>,
    ) {
        let config = self.config.read().clone();
        let leverage = leverage.unwrap_or(config.risk.default_leverage).max(1);

        let price = match self.client.get_book_ticker(symbol).await {
            Ok(quote) => quote.mid(),
            Err(e) => {
                error!(symbol, error = %e, "manual trade: quote failed");
                return;
            }
        };

        let stop_distance = price * config.risk.stop_max_pct / 100.0;
        let stop = price - direction.sign() * stop_distance;
        let signal = Signal::manual(symbol, direction, price, stop);

        let admission = Admission {
            quantity: notional / price,
            notional,
            margin_required: notional / leverage as f64,
            leverage,
            margin_mode: crate::types::MarginMode::Isolated,
        };

        self.risk.register_open(signal.signal_type);
        match self.executor.open_position(&signal, &admission).await {
            ExecutionOutcome::Filled(p) | ExecutionOutcome::Simulated(p) => {
                info!(symbol, qty = p.quantity, "manual trade opened");
            }
            ExecutionOutcome::Abandoned(reason) => {
                warn!(symbol, reason = %reason, "manual trade abandoned");
                self.risk.release_slot(signal.signal_type);
            }
            ExecutionOutcome::Failed(e) => {
                error!(symbol, error = %e, "manual trade failed");
                self.risk.release_slot(signal.signal_type);
            }
        }
    }

    // -------------------------------------------------------------------------
    // One cycle
    // -------------------------------------------------------------------------

    async fn run_cycle(&self, interval: Duration) -> CycleSummary {
        self.telemetry.counters.reset();
        // Overruns from the previous cycle shorten this one's deadline, with
        // half an interval as the floor.
        let debt = *self.deadline_debt.read();
        let deadline = (interval * 2).saturating_sub(debt).max(interval / 2);

        // Scan + signals + admissions under the cycle deadline. Executions
        // run outside it: an order placement is never aborted midway.
        let admitted = match tokio::time::timeout(deadline, self.plan_cycle()).await {
            Ok(planned) => planned,
            Err(_) => {
                warn!(deadline_secs = deadline.as_secs(), "cycle planning hit the deadline — dropping remainder");
                (CycleSummary::default(), Vec::new())
            }
        };
        let (mut summary, entries) = admitted;

        // Execution phase: parallel across symbols, serialized per symbol by
        // the executor's lock table.
        let mut join_set = JoinSet::new();
        for (signal, admission) in entries {
            let executor = self.executor.clone();
            let scanner = self.scanner.clone();
            let risk = self.risk.clone();
            join_set.spawn(async move {
                let score = signal.score;
                let symbol = signal.symbol.clone();
                let signal_type = signal.signal_type;
                match executor.open_position(&signal, &admission).await {
                    ExecutionOutcome::Filled(_) | ExecutionOutcome::Simulated(_) => {
                        if score >= 100.0 {
                            scanner.admit_dynamic(&symbol);
                        }
                        true
                    }
                    ExecutionOutcome::Abandoned(reason) => {
                        warn!(symbol = %symbol, reason = %reason, "entry abandoned");
                        risk.release_slot(signal_type);
                        false
                    }
                    ExecutionOutcome::Failed(e) => {
                        error!(symbol = %symbol, error = %e, "entry failed");
                        risk.release_slot(signal_type);
                        false
                    }
                }
            });
        }
        while let Some(result) = join_set.join_next().await {
            match result {
                Ok(true) => summary.executed += 1,
                Ok(false) => {}
                Err(e) => error!(error = %e, "execution task panicked"),
            }
        }

        self.telemetry
            .counters
            .executed
            .store(summary.executed as u64, Ordering::Relaxed);
        summary
    }

    /// Scan, fan out signal evaluation, and run admissions. Returns the
    /// summary so far plus the entries to execute.
    async fn plan_cycle(&self) -> (CycleSummary, Vec<(Signal, Admission)>) {
        let mut summary = CycleSummary::default();
        let config = self.config.read().clone();

        // Capital first: the exchange is the source of truth.
        match self.client.get_account().await {
            Ok(account) => self.risk.sync_capital(&account),
            Err(e) => {
                error!(error = %e, "account fetch failed — skipping cycle");
                return (summary, Vec::new());
            }
        }
        if self.risk.is_tripped() {
            // The breaker may have tripped on this very sync.
            return (summary, Vec::new());
        }

        // Scan.
        let candidates = match self.scanner.scan().await {
            Ok(c) => c,
            Err(e) => {
                error!(error = %e, "scan failed — skipping cycle");
                return (summary, Vec::new());
            }
        };
        summary.scanned = candidates.len();
        self.telemetry
            .counters
            .scanned
            .store(candidates.len() as u64, Ordering::Relaxed);

        // Signal fan-out: bounded concurrency, per-call deadline, results
        // re-ordered to scanner rank so admissions use it as the tiebreak.
        let semaphore = Arc::new(tokio::sync::Semaphore::new(config.scanner.max_symbols.max(1)));
        let signal_deadline = Duration::from_secs(config.signal.deadline_secs.max(1));

        let mut join_set = JoinSet::new();
        for (rank, candidate) in candidates.into_iter().enumerate() {
            let generator = self.generator.clone();
            let semaphore = semaphore.clone();
            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok()?;
                match tokio::time::timeout(signal_deadline, generator.evaluate(&candidate)).await {
                    Ok(Ok(verdict)) => Some((rank, verdict)),
                    Ok(Err(e)) => {
                        debug!(symbol = %candidate.symbol, error = %e, "signal evaluation failed");
                        None
                    }
                    Err(_) => {
                        debug!(symbol = %candidate.symbol, "signal evaluation timed out — candidate dropped");
                        None
                    }
                }
            });
        }

        let mut ranked: Vec<(usize, SignalVerdict)> = Vec::new();
        while let Some(result) = join_set.join_next().await {
            if let Ok(Some(entry)) = result {
                ranked.push(entry);
            }
        }
        ranked.sort_by_key(|(rank, _)| *rank);

        // Admissions, in scanner order.
        let mut entries: Vec<(Signal, Admission)> = Vec::new();
        let mut open_symbols = self.book.open_symbols();

        for (_, verdict) in ranked {
            let signal = match verdict {
                SignalVerdict::Emitted(signal) => *signal,
                SignalVerdict::BelowThreshold => continue,
                SignalVerdict::HardBlocked => {
                    summary.reject(RejectReason::MiHardBlock);
                    continue;
                }
            };
            summary.signals += 1;

            let filters = match self.client.symbol_filters(&signal.symbol).await {
                Ok(f) => f,
                Err(e) => {
                    debug!(symbol = %signal.symbol, error = %e, "filters unavailable");
                    summary.reject(RejectReason::MarketFilter);
                    continue;
                }
            };

            match self.risk.admit(&signal, &filters, &open_symbols) {
                Ok(admission) => {
                    self.risk.register_open(signal.signal_type);
                    open_symbols.push(signal.symbol.clone());
                    summary.admitted += 1;
                    entries.push((signal, admission));
                }
                Err(reason) => {
                    debug!(symbol = %signal.symbol, reason = %reason, "signal rejected");
                    summary.reject(reason);
                }
            }
        }

        self.telemetry
            .counters
            .signals
            .store(summary.signals as u64, Ordering::Relaxed);
        self.telemetry
            .counters
            .admitted
            .store(summary.admitted as u64, Ordering::Relaxed);

        (summary, entries)
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("state", &self.state())
            .finish()
    }
}
