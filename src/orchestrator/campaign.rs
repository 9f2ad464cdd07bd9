//! Campaign loop: claims and runs contact batches for one campaign until no
//! ready work remains.

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::{claim, pause, sequencer, stop_requested, DispatchDeps, LoopSettings};
use crate::error::DispatchError;
use crate::model::Campaign;

/// Why a campaign loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CampaignExit {
    /// No ready work was left to claim.
    Drained,
    /// The campaign row does not exist.
    Missing,
    /// The stop signal was raised.
    Stopped,
}

/// Summary of one campaign loop run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CampaignRun {
    /// Campaign the loop drove.
    pub campaign_id: String,
    /// Contact batches processed.
    pub batches: u64,
    /// Exit reason.
    pub exit: CampaignExit,
}

/// Result of one loop iteration.
enum Step {
    Paused,
    Drained,
    Missing,
    Ran(Campaign),
}

/// Drive `campaign_id` until it has no ready work, is missing, or a stop is
/// requested.
///
/// An iteration that fails is logged and followed by a cooldown; the loop
/// then continues with a fresh iteration.
pub async fn run_campaign(
    campaign_id: String,
    deps: DispatchDeps,
    settings: LoopSettings,
    mut stop: watch::Receiver<bool>,
) -> CampaignRun {
    let mut batches: u64 = 0;

    let exit = loop {
        if stop_requested(&stop) {
            break CampaignExit::Stopped;
        }

        match iteration(&campaign_id, &deps, &settings, &mut stop).await {
            Ok(Step::Paused) => {
                debug!(campaign_id = %campaign_id, "campaign paused, backing off");
                if !pause(settings.paused_backoff, &mut stop).await {
                    break CampaignExit::Stopped;
                }
            }
            Ok(Step::Drained) => break CampaignExit::Drained,
            Ok(Step::Missing) => {
                warn!(campaign_id = %campaign_id, "campaign has queued items but no configuration");
                break CampaignExit::Missing;
            }
            Ok(Step::Ran(campaign)) => {
                batches = batches.saturating_add(1);
                if !pause(campaign.contact_delay(), &mut stop).await {
                    break CampaignExit::Stopped;
                }
            }
            Err(e) => {
                error!(
                    campaign_id = %campaign_id,
                    kind = %e.kind(),
                    error = %e,
                    "campaign iteration failed, cooling down"
                );
                if !pause(settings.error_cooldown, &mut stop).await {
                    break CampaignExit::Stopped;
                }
            }
        }
    };

    info!(campaign_id = %campaign_id, batches, exit = ?exit, "campaign loop finished");
    CampaignRun {
        campaign_id,
        batches,
        exit,
    }
}

async fn iteration(
    campaign_id: &str,
    deps: &DispatchDeps,
    settings: &LoopSettings,
    stop: &mut watch::Receiver<bool>,
) -> Result<Step, DispatchError> {
    let Some(campaign) = deps.store.find_campaign_config(campaign_id).await? else {
        return Ok(Step::Missing);
    };
    if campaign.is_paused() {
        return Ok(Step::Paused);
    }

    let Some(batch) = claim::claim_next_contact_batch(deps.store.as_ref(), campaign_id).await?
    else {
        return Ok(Step::Drained);
    };

    let report = sequencer::run_batch(
        &batch,
        &campaign,
        deps,
        settings.default_message_delay,
        stop,
    )
    .await?;

    debug!(
        campaign_id,
        contact = %batch.contact,
        sent = report.sent,
        failed = report.failed,
        interrupted = report.interrupted,
        "contact batch finished"
    );

    Ok(Step::Ran(campaign))
}
