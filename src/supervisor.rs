// =============================================================================
// Supervisor — heartbeat watchdog with a bounded restart budget
// =============================================================================
//
// Every long-lived loop (orchestrator, position monitor, user-data stream)
// publishes a heartbeat. The supervisor restarts a task whose heartbeat has
// gone stale, at most `max_restarts_per_window` times per rolling window.
// When the budget is exhausted the engine is circuit-broken into PAUSED and
// the condition is surfaced as a notification.
// =============================================================================

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::risk::RiskManager;
use crate::telemetry::{Notification, Telemetry};

/// Cadence of supervisor sweeps.
const SWEEP_INTERVAL: Duration = Duration::from_secs(15);

// ---------------------------------------------------------------------------
// Heartbeat
// ---------------------------------------------------------------------------

/// A timestamp a task refreshes to prove liveness.
pub struct Heartbeat {
    name: String,
    last: RwLock<Instant>,
}

impl Heartbeat {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            last: RwLock::new(Instant::now()),
        })
    }

    pub fn beat(&self) {
        *self.last.write() = Instant::now();
    }

    pub fn age(&self) -> Duration {
        self.last.read().elapsed()
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for Heartbeat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Heartbeat")
            .field("name", &self.name)
            .field("age_ms", &self.age().as_millis())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Restart budget
// ---------------------------------------------------------------------------

/// Decide whether another restart fits in the rolling window, recording it
/// when allowed. Pure bookkeeping, unit-testable.
pub fn try_consume_restart(
    restarts: &mut VecDeque<Instant>,
    now: Instant,
    window: Duration,
    budget: u32,
) -> bool {
    while let Some(front) = restarts.front() {
        if now.duration_since(*front) > window {
            restarts.pop_front();
        } else {
            break;
        }
    }
    if restarts.len() as u32 >= budget {
        return false;
    }
    restarts.push_back(now);
    true
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

type TaskFactory = Box<dyn Fn() -> JoinHandle<()> + Send + Sync>;

struct Supervised {
    heartbeat: Arc<Heartbeat>,
    factory: TaskFactory,
    handle: Option<JoinHandle<()>>,
    restarts: VecDeque<Instant>,
}

pub struct Supervisor {
    tasks: Mutex<Vec<Supervised>>,
    config: Arc<parking_lot::RwLock<EngineConfig>>,
    risk: Arc<RiskManager>,
    telemetry: Arc<Telemetry>,
}

impl Supervisor {
    pub fn new(
        config: Arc<parking_lot::RwLock<EngineConfig>>,
        risk: Arc<RiskManager>,
        telemetry: Arc<Telemetry>,
    ) -> Arc<Self> {
        Arc::new(Self {
            tasks: Mutex::new(Vec::new()),
            config,
            risk,
            telemetry,
        })
    }

    /// Put a task under supervision. `factory` must spawn a fresh instance of
    /// the task and return its handle.
    pub fn register(
        &self,
        heartbeat: Arc<Heartbeat>,
        initial_handle: JoinHandle<()>,
        factory: TaskFactory,
    ) {
        info!(task = heartbeat.name(), "task registered with supervisor");
        self.tasks.lock().push(Supervised {
            heartbeat,
            factory,
            handle: Some(initial_handle),
            restarts: VecDeque::new(),
        });
    }

    /// Watchdog loop. Spawn once at engine startup.
    pub async fn run(self: Arc<Self>) {
        info!("supervisor started");
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            self.sweep();
        }
    }

    fn sweep(&self) {
        let config = self.config.read().clone();
        let stale_after = Duration::from_secs(config.supervisor.heartbeat_stale_secs);
        let window = Duration::from_secs(config.supervisor.restart_window_min * 60);
        let budget = config.supervisor.max_restarts_per_window;
        let now = Instant::now();

        let mut tasks = self.tasks.lock();
        for task in tasks.iter_mut() {
            let age = task.heartbeat.age();
            let dead = task.handle.as_ref().map(|h| h.is_finished()).unwrap_or(true);

            if age < stale_after && !dead {
                debug!(task = task.heartbeat.name(), age_ms = age.as_millis() as u64, "heartbeat ok");
                continue;
            }

            if try_consume_restart(&mut task.restarts, now, window, budget) {
                warn!(
                    task = task.heartbeat.name(),
                    age_secs = age.as_secs(),
                    dead,
                    restarts_in_window = task.restarts.len(),
                    "stale task — restarting"
                );
                if let Some(handle) = task.handle.take() {
                    handle.abort();
                }
                task.heartbeat.beat();
                task.handle = Some((task.factory)());
                self.telemetry.notify(Notification::SupervisorIntervention {
                    task: task.heartbeat.name().to_string(),
                    restarts_in_window: task.restarts.len() as u32,
                });
            } else {
                warn!(
                    task = task.heartbeat.name(),
                    budget, "restart budget exhausted — pausing engine"
                );
                self.risk
                    .trip(format!("supervisor: {} restart budget exhausted", task.heartbeat.name()));
                self.telemetry.notify(Notification::SupervisorIntervention {
                    task: task.heartbeat.name().to_string(),
                    restarts_in_window: budget,
                });
                // Leave the heartbeat fresh so the pause isn't re-tripped
                // every sweep.
                task.heartbeat.beat();
            }
        }
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("tasks", &self.tasks.lock().len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_age_resets_on_beat() {
        let hb = Heartbeat::new("test");
        std::thread::sleep(Duration::from_millis(20));
        assert!(hb.age() >= Duration::from_millis(20));
        hb.beat();
        assert!(hb.age() < Duration::from_millis(20));
    }

    #[test]
    fn restart_budget_caps_within_window() {
        let mut restarts = VecDeque::new();
        let now = Instant::now();
        let window = Duration::from_secs(1800);

        assert!(try_consume_restart(&mut restarts, now, window, 3));
        assert!(try_consume_restart(&mut restarts, now, window, 3));
        assert!(try_consume_restart(&mut restarts, now, window, 3));
        // Fourth within the window is refused.
        assert!(!try_consume_restart(&mut restarts, now, window, 3));
    }

    #[test]
    fn restart_budget_recovers_after_window() {
        let mut restarts = VecDeque::new();
        let start = Instant::now();
        let window = Duration::from_secs(60);

        assert!(try_consume_restart(&mut restarts, start, window, 1));
        assert!(!try_consume_restart(&mut restarts, start, window, 1));

        // Past the window, the old entry is pruned.
        let later = start + Duration::from_secs(61);
        assert!(try_consume_restart(&mut restarts, later, window, 1));
    }

    #[test]
    fn zero_budget_never_restarts() {
        let mut restarts = VecDeque::new();
        assert!(!try_consume_restart(
            &mut restarts,
            Instant::now(),
            Duration::from_secs(60),
            0
        ));
    }

    #[tokio::test]
    async fn supervisor_restarts_dead_task_then_trips() {
        let config = Arc::new(parking_lot::RwLock::new({
            let mut c = EngineConfig::default();
            c.supervisor.heartbeat_stale_secs = 3600; // only react to dead handles
            c.supervisor.max_restarts_per_window = 1;
            c
        }));
        let risk = Arc::new(RiskManager::new(config.clone()));
        let telemetry = Arc::new(Telemetry::new());
        let supervisor = Supervisor::new(config, risk.clone(), telemetry);

        let hb = Heartbeat::new("worker");
        let dead = tokio::spawn(async {});
        let factory: TaskFactory = Box::new(|| tokio::spawn(async {}));
        supervisor.register(hb, dead, factory);

        tokio::time::sleep(Duration::from_millis(10)).await;

        // First sweep: handle finished → restart consumes the budget. The
        // replacement also finishes immediately, so the second sweep finds it
        // dead again and must trip the breaker.
        supervisor.sweep();
        assert!(!risk.is_tripped());

        tokio::time::sleep(Duration::from_millis(10)).await;
        supervisor.sweep();
        assert!(risk.is_tripped());
    }
}
