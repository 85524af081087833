use crate::counter::RequestIds;
use crate::identity::NodeIdentity;
use crate::pacing::BatchPacer;
use crate::sender::{OutboundRequest, RequestSender, SendOutcome};
use crate::topology::Topology;
use futures::future::join_all;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DispatcherState {
    #[default]
    Running,
    Cancelled,
}

/// Tallies of what the dispatcher sent before it was cancelled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub state: DispatcherState,
    pub batches: u64,
    pub requests: u64,
    pub succeeded: u64,
    pub application_errors: u64,
    pub failed: u64,
}

impl DispatchReport {
    fn record(&mut self, outcome: SendOutcome) {
        self.requests += 1;
        match outcome {
            SendOutcome::Success => self.succeeded += 1,
            SendOutcome::ApplicationError(_) => self.application_errors += 1,
            SendOutcome::Failure => self.failed += 1,
        }
    }
}

/// Main traffic loop: build a batch, send it concurrently, wait for every
/// member, pace, repeat until cancelled.
pub struct BatchDispatcher {
    identity: NodeIdentity,
    topology: Topology,
    sender: Arc<RequestSender>,
    pacer: BatchPacer,
    batch_size: u32,
    rng: StdRng,
    ids: RequestIds,
}

impl BatchDispatcher {
    pub fn new(
        identity: NodeIdentity,
        topology: Topology,
        sender: Arc<RequestSender>,
        pacer: BatchPacer,
        batch_size: u32,
    ) -> Self {
        Self {
            identity,
            topology,
            sender,
            pacer,
            batch_size: batch_size.max(1),
            rng: StdRng::from_entropy(),
            ids: RequestIds::new(),
        }
    }

    /// Seed the routing RNG for a reproducible sequence of targets.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    fn build_batch(&mut self) -> Vec<OutboundRequest> {
        let current = self.identity.coord();
        (0..self.batch_size)
            .map(|_| OutboundRequest {
                target: self.topology.next_target(current, &mut self.rng),
                caller: self.identity.display_name().to_string(),
                request_id: self.ids.next_id(),
            })
            .collect()
    }

    /// Run until `cancel` fires. A batch already in flight always completes.
    pub async fn run(mut self, cancel: CancellationToken) -> DispatchReport {
        let mut report = DispatchReport::default();
        info!(
            "Dispatching from {} ({}) in batches of {} every {:?} via {}",
            self.identity,
            self.identity.coord(),
            self.batch_size,
            self.pacer.target_batch_time(),
            self.sender.transport_name()
        );

        while !cancel.is_cancelled() {
            let batch = self.build_batch();

            let start = Instant::now();
            let outcomes = join_all(batch.iter().map(|request| self.sender.send(request))).await;
            let elapsed = start.elapsed();

            report.batches += 1;
            for outcome in outcomes {
                report.record(outcome);
            }

            let pause = self.pacer.pause_after(elapsed);
            debug!("Batch {} took {:?}, pausing {:?}", report.batches, elapsed, pause);
            if pause.is_zero() {
                continue;
            }
            tokio::select! {
                _ = sleep(pause) => {}
                _ = cancel.cancelled() => {}
            }
        }

        report.state = DispatcherState::Cancelled;
        info!(
            "Dispatcher cancelled after {} batches ({} requests, last id {})",
            report.batches,
            report.requests,
            self.ids.issued()
        );
        report
    }
}
