//! Scheduler & Trigger (C7, §4.7): a periodic background runner plus a
//! synchronous manual-trigger path, both funneled through the same
//! per-config advisory lock (`sync-storage::LockRepository`, grounded on
//! the teacher's `acquire_cycle_lock`/`verify_cycle_lock` pair) so a
//! scheduled tick and a manual call can never run the same config twice at
//! once. Subscription gating and usage accounting (§4.7, §6) sit in front
//! of every dispatch; billing itself stays an external collaborator
//! (§1's "billing/subscription data storage" is out of scope) reached
//! only through the `SubscriptionGate` trait below.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{watch, RwLock};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::Instrument;

use sync_core::config::PlanTier;
use sync_core::model::{SyncConfig, SyncLog, SyncLogOutcome, SyncTrigger};

use crate::context::RunContext;
use crate::error::{EngineError, Result};
use crate::executors::RunOutcome;
use crate::run_sync;

/// Per-config run state (§4.7's state machine). `Idle` before a config has
/// ever run in this process; a `Paused*` state latches until external
/// remediation (reauth, upgrade, month rollover) clears it — nothing in
/// this module clears one automatically except a plan/limit check that
/// passes on a later tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    CompletedOk,
    CompletedPartial,
    CompletedFailed,
    PausedReauth,
    PausedLimit,
    PausedSubscription,
}

/// Billing/subscription status for one user. The engine only consults
/// this gate; it never stores plan or trial data itself.
#[async_trait]
pub trait SubscriptionGate: Send + Sync {
    /// `None` means the trial has expired or the subscription is inactive
    /// — the run is refused before any external call is made.
    async fn plan_tier(&self, user_id: uuid::Uuid) -> Result<Option<PlanTier>>;
}

/// Permits every run at the unlimited `Business` tier. Used by tests and
/// by deployments that haven't wired a real billing collaborator.
pub struct AlwaysAllow;

#[async_trait]
impl SubscriptionGate for AlwaysAllow {
    async fn plan_tier(&self, _user_id: uuid::Uuid) -> Result<Option<PlanTier>> {
        Ok(Some(PlanTier::Business))
    }
}

/// §4.7 manual trigger: "rejects ... if a run for the same config started
/// within the last 5 minutes and has not recorded a completion."
const MANUAL_TRIGGER_DEBOUNCE: chrono::Duration = chrono::Duration::minutes(5);

/// Interprets the handful of `*/N * * * *` cron shapes the configuration
/// surface documents (§6 default `*/5 * * * *`); anything else falls back
/// to the 5-minute default rather than pulling in a cron-parsing crate the
/// teacher's stack never reaches for.
fn tick_period(cron_expr: &str) -> std::time::Duration {
    let minute_field = cron_expr.split_whitespace().next().unwrap_or("*/5");
    let minutes = minute_field
        .strip_prefix("*/")
        .and_then(|n| n.parse::<u64>().ok())
        .filter(|&n| n > 0)
        .unwrap_or(5);
    std::time::Duration::from_secs(minutes * 60)
}

pub struct Scheduler {
    ctx: RunContext,
    subscription_gate: Arc<dyn SubscriptionGate>,
    states: RwLock<HashMap<uuid::Uuid, RunState>>,
}

/// Handle to a spawned scheduler's background tick task. Dropping it does
/// not stop the task; call `shutdown` for a clean stop.
pub struct SchedulerHandle {
    shutdown_tx: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

impl SchedulerHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.task.await;
    }
}

impl Scheduler {
    pub fn new(ctx: RunContext, subscription_gate: Arc<dyn SubscriptionGate>) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            subscription_gate,
            states: RwLock::new(HashMap::new()),
        })
    }

    pub async fn state_of(&self, config_id: uuid::Uuid) -> RunState {
        self.states.read().await.get(&config_id).copied().unwrap_or(RunState::Idle)
    }

    async fn set_state(&self, config_id: uuid::Uuid, state: RunState) {
        self.states.write().await.insert(config_id, state);
    }

    /// Starts the periodic tick loop on its own task (§4.7 "Scheduled
    /// runner fires on a wall-clock cron"). Runs for distinct configs
    /// proceed in parallel; each is individually subject to the
    /// per-config lock so overlapping ticks never double-dispatch one.
    pub fn spawn(self: Arc<Self>) -> SchedulerHandle {
        let period = tick_period(&self.ctx.config.scheduler_cron);
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.run_tick().await;
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        SchedulerHandle { shutdown_tx, task }
    }

    /// One scheduler tick: enumerate active configs and dispatch each
    /// concurrently (§5: "distinct configs run in parallel"). Errors
    /// dispatching one config never stop the others.
    async fn run_tick(self: &Arc<Self>) {
        let configs = match self.ctx.storage.sync_configs.list_active() {
            Ok(c) => c,
            Err(err) => {
                tracing::error!(error = %err, "scheduler tick: failed to list active sync configs");
                return;
            }
        };

        let stale_after = self_stale_after(self);
        let mut handles = Vec::with_capacity(configs.len());
        for config in configs {
            let this = Arc::clone(self);
            handles.push(tokio::spawn(async move {
                this.dispatch(&config, SyncTrigger::Scheduled, stale_after, false).await
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
    }

    /// §4.7 manual trigger: synchronous, immediate, same-config debounce.
    pub async fn trigger_manual(self: &Arc<Self>, config_id: uuid::Uuid) -> Result<RunOutcome> {
        let config = self.load_config(config_id)?;
        self.dispatch(&config, SyncTrigger::Manual, MANUAL_TRIGGER_DEBOUNCE, false).await
    }

    /// §4.7 initial sync: same executor, `deleteExtraRows`/
    /// `deleteExtraRecords` defaulted true for this run only (the
    /// persisted `SyncConfig` is not mutated — an explicit Open Question
    /// resolution recorded in DESIGN.md), optionally a dry run that
    /// produces a change report without writing anything upstream.
    pub async fn trigger_initial(self: &Arc<Self>, config_id: uuid::Uuid, dry_run: bool) -> Result<RunOutcome> {
        let mut config = self.load_config(config_id)?;
        config.delete_extra_records = true;
        config.delete_extra_rows = true;
        self.dispatch(&config, SyncTrigger::Initial, MANUAL_TRIGGER_DEBOUNCE, dry_run).await
    }

    fn load_config(&self, config_id: uuid::Uuid) -> Result<SyncConfig> {
        self.ctx
            .storage
            .sync_configs
            .get(config_id)?
            .ok_or_else(|| EngineError::Internal(format!("sync config {config_id} not found")))
    }

    /// The common gate-then-run path every trigger source funnels through:
    /// subscription gate, usage gate, per-config lock, run with a
    /// deadline, and — per §7's "the engine always writes a SyncLog, even
    /// when setup fails" — a SyncLog is recorded on every outcome,
    /// including ones that never reached the executor's own
    /// `persist_run`.
    async fn dispatch(
        self: &Arc<Self>,
        config: &SyncConfig,
        trigger: SyncTrigger,
        lock_stale_after: chrono::Duration,
        dry_run: bool,
    ) -> Result<RunOutcome> {
        match self.subscription_gate.plan_tier(config.owner_user_id).await? {
            None => {
                self.set_state(config.id, RunState::PausedSubscription).await;
                return Err(EngineError::SubscriptionRequired);
            }
            Some(tier) => {
                let limits = tier.limits();
                let year_month = chrono::Utc::now().format("%Y-%m").to_string();
                let usage = self.ctx.storage.usage_stats.get(config.owner_user_id, &year_month)?;
                let fraction = usage.usage_fraction(limits.max_records_per_month);
                if fraction >= 1.0 {
                    self.set_state(config.id, RunState::PausedLimit).await;
                    return Err(EngineError::LimitReached);
                }
                if fraction >= 0.8 {
                    tracing::warn!(
                        sync_config_id = %config.id,
                        user_id = %config.owner_user_id,
                        usage_fraction = fraction,
                        "sync config at >=80% of its monthly record limit"
                    );
                }
            }
        }

        let guard = self.ctx.storage.locks.acquire(config.id, lock_stale_after).await?;
        let Some(guard) = guard else {
            return Err(EngineError::ConcurrencyConflict);
        };

        self.set_state(config.id, RunState::Running).await;
        let span = tracing::info_span!("sync_run", sync_config_id = %config.id, direction = ?config.direction, trigger = ?trigger);

        let result = tokio::time::timeout(self.ctx.config.run_deadline, run_sync(&self.ctx, config, trigger, dry_run))
            .instrument(span)
            .await;

        self.ctx.storage.locks.release(guard).await?;

        let outcome = match result {
            Ok(Ok(outcome)) => {
                let state = match outcome.outcome {
                    SyncLogOutcome::Success => RunState::CompletedOk,
                    SyncLogOutcome::Partial => RunState::CompletedPartial,
                    SyncLogOutcome::Failed => RunState::CompletedFailed,
                };
                self.set_state(config.id, state).await;
                Ok(outcome)
            }
            Ok(Err(err)) => {
                if matches!(err, EngineError::Credential(ref e) if matches!(e.retry_class(), sync_credentials::RetryClass::ReauthRequired))
                    || matches!(err, EngineError::Client(ref e) if matches!(e.retry_class(), sync_clients::RetryClass::ReauthRequired))
                {
                    self.set_state(config.id, RunState::PausedReauth).await;
                    self.mark_both_reauth(config, &err.user_message()).await;
                } else {
                    self.set_state(config.id, RunState::CompletedFailed).await;
                }
                self.record_abort(config, trigger, &err.user_message(), dry_run).await;
                Err(err)
            }
            Err(_elapsed) => {
                self.set_state(config.id, RunState::CompletedPartial).await;
                self.record_abort(config, trigger, "The sync took too long and was stopped partway through.", dry_run)
                    .await;
                Err(EngineError::Timeout)
            }
        };

        outcome
    }

    /// §4.1 "Mark needs reauth", invoked on an observed OAuth failure
    /// (§4.6 / scenario S6): a run-aborting `ReauthRequired`-class error
    /// doesn't identify which of the two services issued the 401 by the
    /// time it reaches the scheduler, so both of this config's
    /// credentials are flagged — matching §4.6's "aborts the run and
    /// marks both involved credentials for reauth" literally.
    async fn mark_both_reauth(&self, config: &SyncConfig, reason: &str) {
        for service in [sync_core::model::CredentialService::Airtable, sync_core::model::CredentialService::Sheets] {
            if let Err(err) = self.ctx.credentials.mark_needs_reauth(config.owner_user_id, service, reason).await {
                tracing::error!(
                    sync_config_id = %config.id,
                    ?service,
                    error = %err,
                    "failed to persist needs-reauth flag"
                );
            }
        }
    }

    /// Writes the SyncLog and SyncConfig outcome for a run that aborted
    /// before the executor reached its own `persist_run` tail (§7:
    /// "the engine always writes a SyncLog, even when setup fails").
    async fn record_abort(&self, config: &SyncConfig, trigger: SyncTrigger, message: &str, dry_run: bool) {
        if dry_run {
            return;
        }
        let now = chrono::Utc::now();
        let log = SyncLog {
            id: uuid::Uuid::new_v4(),
            sync_config_id: config.id,
            outcome: SyncLogOutcome::Failed,
            direction: config.direction,
            trigger,
            records_synced: 0,
            records_failed: 1,
            errors: vec![message.to_string()],
            warnings: Vec::new(),
            started_at: now,
            completed_at: now,
        };
        if let Err(err) = self.ctx.storage.sync_logs.append(log).await {
            tracing::error!(sync_config_id = %config.id, error = %err, "failed to persist abort SyncLog");
        }
        if let Err(err) = self
            .ctx
            .storage
            .sync_configs
            .record_run_outcome(config.id, sync_core::model::SyncConfigOutcome::Failed, Some(message.to_string()))
            .await
        {
            tracing::error!(sync_config_id = %config.id, error = %err, "failed to record aborted run outcome");
        }
    }
}

/// Scheduled ticks use the run deadline as the lock's crash-recovery
/// window (a stuck worker releases its hold once the deadline it was
/// bound by has clearly passed); manual/initial triggers use the
/// spec-literal 5-minute debounce instead (see `trigger_manual`).
fn self_stale_after(scheduler: &Scheduler) -> chrono::Duration {
    chrono::Duration::from_std(scheduler.ctx.config.run_deadline).unwrap_or(chrono::Duration::minutes(10))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_period_parses_star_slash_n() {
        assert_eq!(tick_period("*/5 * * * *"), std::time::Duration::from_secs(300));
        assert_eq!(tick_period("*/15 * * * *"), std::time::Duration::from_secs(900));
    }

    #[test]
    fn tick_period_falls_back_on_unrecognized_expression() {
        assert_eq!(tick_period("0 9 * * 1-5"), std::time::Duration::from_secs(300));
    }
}
