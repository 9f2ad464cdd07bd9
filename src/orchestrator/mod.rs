//! Orchestrator: discovers campaigns with ready work and drives them.
//!
//! Runs as a Tokio task ticking at a configurable interval. Each tick
//! revives stuck items, lists campaigns that have ready items, and starts a
//! campaign loop for every campaign not already running, up to the
//! concurrency ceiling. The running-set is owned by the orchestrator task
//! alone; loops report their exit through a [`JoinSet`].

pub mod campaign;
pub mod claim;
pub mod revival;
pub mod sequencer;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::channel::ChannelAdapter;
use crate::config::DispatchConfig;
use crate::store::DispatchStore;

/// Shared collaborators handed to every campaign loop.
#[derive(Clone)]
pub struct DispatchDeps {
    /// Persistent queue.
    pub store: Arc<dyn DispatchStore>,
    /// Outbound delivery.
    pub channel: Arc<dyn ChannelAdapter>,
}

/// Delays used inside a campaign loop.
#[derive(Debug, Clone)]
pub struct LoopSettings {
    /// Per-message delay for campaigns without their own.
    pub default_message_delay: Duration,
    /// Wait before re-checking a paused campaign.
    pub paused_backoff: Duration,
    /// Wait after a failed iteration.
    pub error_cooldown: Duration,
}

impl From<&DispatchConfig> for LoopSettings {
    fn from(config: &DispatchConfig) -> Self {
        Self {
            default_message_delay: config.pacing.default_message_delay(),
            paused_backoff: config.pacing.paused_backoff(),
            error_cooldown: config.pacing.error_cooldown(),
        }
    }
}

/// Orchestrator tick settings.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Time between ticks.
    pub tick_interval: Duration,
    /// Maximum simultaneous campaign loops; `None` means unbounded.
    pub concurrency_limit: Option<usize>,
    /// Age after which a processing item is reverted to pending.
    pub stuck_ttl: Duration,
    /// Settings passed to each campaign loop.
    pub loops: LoopSettings,
}

impl From<&DispatchConfig> for OrchestratorSettings {
    fn from(config: &DispatchConfig) -> Self {
        Self {
            tick_interval: config.orchestrator.tick_interval(),
            concurrency_limit: config.orchestrator.concurrency_limit(),
            stuck_ttl: config.orchestrator.stuck_ttl(),
            loops: LoopSettings::from(config),
        }
    }
}

/// What a single tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Items returned from processing to pending.
    pub revived: u64,
    /// Campaigns whose loop was started this tick.
    pub launched: Vec<String>,
}

/// Owner of the running-set and the campaign loop tasks.
pub struct Orchestrator {
    deps: DispatchDeps,
    settings: OrchestratorSettings,
    running: HashSet<String>,
    loops: JoinSet<String>,
}

impl Orchestrator {
    /// Create an orchestrator with nothing running.
    pub fn new(deps: DispatchDeps, settings: OrchestratorSettings) -> Self {
        Self {
            deps,
            settings,
            running: HashSet::new(),
            loops: JoinSet::new(),
        }
    }

    /// Number of campaign loops currently tracked as running.
    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    /// Whether a loop for `campaign_id` is tracked as running.
    pub fn is_running(&self, campaign_id: &str) -> bool {
        self.running.contains(campaign_id)
    }

    /// Run until the stop signal flips to `true` or its sender is dropped.
    ///
    /// On stop, no new loops are started and running loops are awaited; they
    /// exit at their next sleep point.
    pub async fn run(mut self, mut stop: watch::Receiver<bool>) {
        info!(
            tick_ms = u64::try_from(self.settings.tick_interval.as_millis()).unwrap_or(u64::MAX),
            ceiling = self.settings.concurrency_limit.unwrap_or(0),
            stuck_ttl_secs = self.settings.stuck_ttl.as_secs(),
            "orchestrator started"
        );

        let mut interval = tokio::time::interval(self.settings.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if stop_requested(&stop) {
                        break;
                    }
                    let report = self.tick(&stop).await;
                    if report.revived > 0 || !report.launched.is_empty() {
                        debug!(
                            revived = report.revived,
                            launched = report.launched.len(),
                            running = self.running.len(),
                            "tick complete"
                        );
                    }
                }
                Some(joined) = self.loops.join_next(), if !self.loops.is_empty() => {
                    self.on_loop_exit(joined);
                }
                result = stop.changed() => {
                    if result.is_err() || *stop.borrow() {
                        info!("orchestrator shutting down");
                        break;
                    }
                }
            }
        }

        while let Some(joined) = self.loops.join_next().await {
            self.on_loop_exit(joined);
        }

        info!("orchestrator stopped");
    }

    /// Execute a single tick: revival, discovery, launch.
    pub async fn tick(&mut self, stop: &watch::Receiver<bool>) -> TickReport {
        let now = Utc::now();
        let store = self.deps.store.as_ref();

        let revived = match revival::revive_stale_items(store, self.settings.stuck_ttl, now).await
        {
            Ok(count) => count,
            Err(e) => {
                error!(error = %e, "stuck-item revival failed");
                0
            }
        };

        let ready = match store.find_distinct_ready_campaigns(now).await {
            Ok(ids) => ids,
            Err(e) => {
                error!(error = %e, "campaign discovery failed");
                return TickReport {
                    revived,
                    launched: Vec::new(),
                };
            }
        };

        let mut launched = Vec::new();
        for campaign_id in ready {
            if self.running.contains(&campaign_id) {
                continue;
            }
            if let Some(limit) = self.settings.concurrency_limit {
                if self.running.len() >= limit {
                    debug!(limit, "concurrency ceiling reached, deferring remaining campaigns");
                    break;
                }
            }
            self.launch(campaign_id.clone(), stop.clone());
            launched.push(campaign_id);
        }

        TickReport { revived, launched }
    }

    fn launch(&mut self, campaign_id: String, stop: watch::Receiver<bool>) {
        info!(campaign_id = %campaign_id, "starting campaign loop");
        self.running.insert(campaign_id.clone());

        let deps = self.deps.clone();
        let settings = self.settings.loops.clone();
        self.loops.spawn(async move {
            // The inner task isolates panics so the campaign id always comes back.
            let inner = tokio::spawn(campaign::run_campaign(
                campaign_id.clone(),
                deps,
                settings,
                stop,
            ));
            match inner.await {
                Ok(run) => info!(
                    campaign_id = %run.campaign_id,
                    batches = run.batches,
                    exit = ?run.exit,
                    "campaign loop exited"
                ),
                Err(e) => error!(campaign_id = %campaign_id, error = %e, "campaign loop aborted"),
            }
            campaign_id
        });
    }

    fn on_loop_exit(&mut self, joined: Result<String, tokio::task::JoinError>) {
        match joined {
            Ok(campaign_id) => {
                self.running.remove(&campaign_id);
            }
            Err(e) => warn!(error = %e, "campaign supervisor task failed"),
        }
    }
}

/// Sleep for `duration` unless the stop signal fires first.
///
/// Returns `false` when stopping was requested before or during the sleep.
/// A dropped sender counts as a stop request.
pub async fn pause(duration: Duration, stop: &mut watch::Receiver<bool>) -> bool {
    if stop_requested(stop) {
        return false;
    }
    if duration.is_zero() {
        return true;
    }

    let sleep = tokio::time::sleep(duration);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            () = &mut sleep => return true,
            result = stop.changed() => match result {
                Ok(()) => {
                    if *stop.borrow() {
                        return false;
                    }
                }
                Err(_) => return false,
            },
        }
    }
}

/// Whether the stop signal has been raised or its sender is gone.
pub fn stop_requested(stop: &watch::Receiver<bool>) -> bool {
    *stop.borrow() || stop.has_changed().is_err()
}
