//! The reconciliation loop.
//!
//! One synchronous priming pass (fatal on a cluster query failure), then a
//! fixed-interval loop forever: fetch, build, compare, and apply only when
//! the candidate set changed. The last applied set is plain state owned by
//! the loop; there is no shared mutable state and no cycle overlap.

use std::time::Duration;

use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::apply::{ConfigApplier, ReloadHook, Renderer};
use crate::candidate::{self, ExposureRecord, changed};
use crate::error::QueryError;
use crate::k8s::ClusterView;

/// Drives fetch/build/compare/apply cycles on a fixed interval.
pub struct Reconciler<V, R, H> {
    view: V,
    applier: ConfigApplier<R, H>,
    period: Duration,
}

impl<V, R, H> Reconciler<V, R, H>
where
    V: ClusterView,
    R: Renderer,
    H: ReloadHook,
{
    /// Assembles the loop from its collaborators and poll period.
    #[must_use]
    pub fn new(view: V, applier: ConfigApplier<R, H>, period: Duration) -> Self {
        Self {
            view,
            applier,
            period,
        }
    }

    /// Runs the loop until the process is killed.
    ///
    /// The priming pass applies unconditionally; an apply failure there is
    /// logged but does not stop the loop, leaving any previously written
    /// configuration in place. Steady-state query failures skip the tick and
    /// retain the last applied set.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError`] only if the priming fetch fails; after that the
    /// function never returns.
    pub async fn run(self) -> Result<(), QueryError> {
        info!("running initial reconciliation");
        let mut current = self.fetch().await?;
        if let Err(e) = self.applier.apply(&current).await {
            error!(error = %e, "initial apply failed");
        }

        let mut ticker = time::interval(self.period);
        // An overlong cycle delays the next tick instead of piling up work.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately; the priming pass covered it.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            self.cycle(&mut current).await;
        }
    }

    /// One steady-state cycle; returns whether an apply was attempted.
    async fn cycle(&self, current: &mut Vec<ExposureRecord>) -> bool {
        let next = match self.fetch().await {
            Ok(next) => next,
            Err(e) => {
                warn!(error = %e, "cluster query failed, skipping this cycle");
                return false;
            }
        };

        if !changed(current, &next) {
            debug!(records = current.len(), "no change in exposure set");
            return false;
        }

        info!(
            previous = current.len(),
            current = next.len(),
            "exposure set changed, rewriting configuration"
        );
        *current = next;
        if let Err(e) = self.applier.apply(current).await {
            error!(error = %e, "apply failed, previous configuration retained");
        }
        true
    }

    async fn fetch(&self) -> Result<Vec<ExposureRecord>, QueryError> {
        let services = self.view.services().await?;
        candidate::build(&self.view, &services).await
    }
}
