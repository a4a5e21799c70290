use crate::{
    cluster::Cluster,
    reconcile::{Pass, Reconciler},
};
use futures::prelude::*;
use parking_lot::Mutex;
use ratelimit_controller_k8s_index::ResourceId;
use std::collections::HashSet;
use tokio::{
    sync::mpsc::{UnboundedReceiver, UnboundedSender},
    time::{self, Duration},
};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};

/// Drains reconciliation triggers, running up to `concurrency` passes at once.
///
/// Passes for the same policy never overlap. A trigger that arrives while its
/// policy is being reconciled is coalesced into one rerun that starts when the
/// running pass finishes.
pub struct Controller<C> {
    reconciler: Reconciler<C>,
    triggers_tx: UnboundedSender<ResourceId>,
    triggers_rx: UnboundedReceiver<ResourceId>,
    concurrency: usize,
    retry_delay: Duration,
}

/// Tracks which policies have a pass running and which were triggered again
/// in the meantime.
#[derive(Debug, Default)]
struct InFlight {
    active: HashSet<ResourceId>,
    rerun: HashSet<ResourceId>,
}

// === impl Controller ===

impl<C: Cluster> Controller<C> {
    pub fn new(
        reconciler: Reconciler<C>,
        triggers_tx: UnboundedSender<ResourceId>,
        triggers_rx: UnboundedReceiver<ResourceId>,
        concurrency: usize,
        retry_delay: Duration,
    ) -> Self {
        Self {
            reconciler,
            triggers_tx,
            triggers_rx,
            concurrency,
            retry_delay,
        }
    }

    /// Processes triggers until the shutdown signal fires or every sender
    /// has been dropped.
    pub async fn run(self, drain: drain::Watch) {
        let Self {
            reconciler,
            triggers_tx,
            triggers_rx,
            concurrency,
            retry_delay,
        } = self;

        let reconciler = &reconciler;
        let triggers_tx = &triggers_tx;
        let in_flight = &Mutex::new(InFlight::default());
        let work = UnboundedReceiverStream::new(triggers_rx).for_each_concurrent(
            concurrency.max(1),
            move |id| async move {
                if !in_flight.lock().start(&id) {
                    debug!(%id, "Reconciliation already running; coalescing");
                    return;
                }

                loop {
                    let retry = match reconciler.reconcile(&id).await {
                        Ok(Pass::Complete) => false,
                        Ok(Pass::Incomplete) => true,
                        Err(error) => {
                            warn!(%id, %error, "Failed to reconcile RateLimits");
                            true
                        }
                    };

                    // A rerun observes everything the requeue would have.
                    if in_flight.lock().finish(&id) {
                        debug!(%id, "Triggered during reconciliation; running again");
                        continue;
                    }
                    if retry {
                        debug!(%id, ?retry_delay, "Requeueing reconciliation");
                        requeue(triggers_tx.clone(), id, retry_delay);
                    }
                    return;
                }
            },
        );

        tokio::select! {
            () = work => {}
            release = drain.signaled() => {
                info!("Shutting down");
                drop(release);
            }
        }
    }
}

fn requeue(triggers: UnboundedSender<ResourceId>, id: ResourceId, delay: Duration) {
    tokio::spawn(async move {
        time::sleep(delay).await;
        // The receiver is gone once the controller has shut down.
        let _ = triggers.send(id);
    });
}

// === impl InFlight ===

impl InFlight {
    /// Marks a pass as started, or records a rerun if one is already running.
    fn start(&mut self, id: &ResourceId) -> bool {
        if self.active.contains(id) {
            self.rerun.insert(id.clone());
            return false;
        }
        self.active.insert(id.clone());
        true
    }

    /// Ends a pass. Returns true, leaving the pass marked active, when the
    /// policy was triggered while the pass ran.
    fn finish(&mut self, id: &ResourceId) -> bool {
        if self.rerun.remove(id) {
            return true;
        }
        self.active.remove(id);
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> ResourceId {
        ResourceId::new("ns".to_string(), name.to_string())
    }

    #[test]
    fn coalesces_triggers_for_a_running_pass() {
        let mut in_flight = InFlight::default();
        assert!(in_flight.start(&id("a")));
        assert!(in_flight.start(&id("b")), "other policies run concurrently");

        assert!(!in_flight.start(&id("a")));
        assert!(!in_flight.start(&id("a")));

        assert!(in_flight.finish(&id("a")), "one rerun is owed");
        assert!(!in_flight.finish(&id("a")));
        assert!(in_flight.start(&id("a")), "a finished pass may start again");
    }
}
