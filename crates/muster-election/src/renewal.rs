//! Background lease renewal.
//!
//! Started once the lease is first acquired. Ticks every half lease, renews,
//! and keeps going through errors until told to stop. The stop signal is only
//! observed between ticks, so a renewal in flight always runs to completion.

use crate::config::LeaseLossPolicy;
use crate::coordinator::LeaderElection;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Why the renewal loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewalExit {
    /// The stop signal was received.
    Stopped,
    /// A renewal found the lease owned by someone else and the policy is to step down.
    LeaseLost,
}

/// Handle to a running renewal loop.
pub struct RenewalHandle {
    stop_tx: watch::Sender<bool>,
    lost_rx: watch::Receiver<bool>,
    task: JoinHandle<RenewalExit>,
}

impl RenewalHandle {
    /// Start renewing on behalf of `election`.
    pub fn spawn(election: Arc<LeaderElection>) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        let (lost_tx, lost_rx) = watch::channel(false);
        let task = tokio::spawn(run(election, stop_rx, lost_tx));
        Self {
            stop_tx,
            lost_rx,
            task,
        }
    }

    /// Resolves once the loop has stepped down after losing the lease.
    /// Never resolves if the lease is not lost.
    pub async fn lease_lost(&mut self) {
        let lost = self.lost_rx.wait_for(|lost| *lost).await.is_ok();
        if !lost {
            std::future::pending::<()>().await;
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signal the loop to stop and wait for it to exit.
    pub async fn stop(self) -> RenewalExit {
        let _ = self.stop_tx.send(true);
        match self.task.await {
            Ok(exit) => exit,
            Err(e) => {
                warn!("Renewal task ended abnormally: {}", e);
                RenewalExit::Stopped
            }
        }
    }
}

async fn run(
    election: Arc<LeaderElection>,
    mut stop_rx: watch::Receiver<bool>,
    lost_tx: watch::Sender<bool>,
) -> RenewalExit {
    let period = election.config().renew_interval();
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick fires immediately; the lease was just written.
    ticker.tick().await;

    debug!("Renewal loop started, interval {:?}", period);
    loop {
        tokio::select! {
            biased;
            _ = stop_rx.changed() => {
                debug!("Renewal loop stopping");
                return RenewalExit::Stopped;
            }
            _ = ticker.tick() => {}
        }

        match election.renew().await {
            Ok(true) => debug!("Lease renewed by {}", election.instance_id()),
            Ok(false) => match election.config().on_lease_lost {
                LeaseLossPolicy::StepDown => {
                    warn!(
                        "Lease no longer held by {}; stepping down",
                        election.instance_id()
                    );
                    election.step_down();
                    let _ = lost_tx.send(true);
                    return RenewalExit::LeaseLost;
                }
                LeaseLossPolicy::KeepRenewing => {
                    warn!(
                        "Lease renewal by {} matched no row; will retry",
                        election.instance_id()
                    );
                }
            },
            Err(e) => warn!("Leader renew error: {}", e),
        }
    }
}
