//! Process lifecycle: the responder and the traffic engine run side by side,
//! and shut down in a fixed order.
//!
//! 1. Shutdown requested: the dispatcher stops taking new batches.
//! 2. The batch in flight finishes and the dispatcher reports `Cancelled`.
//! 3. The aggregator emits its final reading.
//! 4. Only then does the responder stop accepting connections.

use crate::config::{Config, RateConfig};
use crate::counter::RequestCounter;
use crate::dispatcher::{BatchDispatcher, DispatchReport};
use crate::identity::NodeIdentity;
use crate::pacing::BatchPacer;
use crate::responder::Responder;
use crate::sender::{RequestSender, RetryPolicy, Transport};
use crate::stats::{StatsAggregator, StatsReading, StatsSummary};
use crate::topology::Topology;
use anyhow::{Context, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// What the traffic engine did over the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeReport {
    pub dispatch: DispatchReport,
    pub stats: StatsSummary,
}

/// Dispatcher paired with its statistics aggregator.
pub struct TrafficEngine {
    dispatcher: BatchDispatcher,
    aggregator: StatsAggregator,
}

impl TrafficEngine {
    pub fn new(dispatcher: BatchDispatcher, aggregator: StatsAggregator) -> Self {
        Self {
            dispatcher,
            aggregator,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<StatsReading> {
        self.aggregator.subscribe()
    }

    /// Run until `cancel` fires. The aggregator's final reading is taken
    /// only after the dispatcher has drained its last batch.
    pub async fn run(self, cancel: CancellationToken) -> Result<NodeReport> {
        let stats_stop = CancellationToken::new();
        let stats_handle = tokio::spawn(self.aggregator.run(stats_stop.clone()));

        let dispatch = self.dispatcher.run(cancel).await;

        stats_stop.cancel();
        let stats = stats_handle
            .await
            .context("statistics aggregator task failed")?;

        Ok(NodeReport { dispatch, stats })
    }
}

/// A fully wired simulated instance.
pub struct Node {
    identity: NodeIdentity,
    engine: TrafficEngine,
}

impl Node {
    pub fn new(identity: NodeIdentity, engine: TrafficEngine) -> Self {
        Self { identity, engine }
    }

    /// Wire every unit from the loaded configuration.
    pub fn from_config(
        identity: NodeIdentity,
        config: &Config,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let rate: RateConfig = config.rate_config()?;
        let counter = RequestCounter::new();
        let sender = Arc::new(RequestSender::new(
            transport,
            counter.clone(),
            RetryPolicy::from_config(&config.retry),
        ));

        let mut dispatcher = BatchDispatcher::new(
            identity.clone(),
            Topology::from_config(&config.topology),
            sender,
            BatchPacer::new(&rate),
            rate.batch_size,
        );
        if let Some(seed) = config.scenario.seed {
            dispatcher = dispatcher.with_seed(seed);
        }
        let aggregator = StatsAggregator::new(counter, rate.stats_interval);

        Ok(Self::new(identity, TrafficEngine::new(dispatcher, aggregator)))
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    pub fn subscribe(&self) -> watch::Receiver<StatsReading> {
        self.engine.subscribe()
    }

    /// Serve and generate traffic until `shutdown` resolves.
    pub async fn run_until<F>(self, listener: TcpListener, shutdown: F) -> Result<NodeReport>
    where
        F: Future<Output = ()>,
    {
        let responder_stop = CancellationToken::new();
        let traffic_stop = CancellationToken::new();

        let responder = Responder::new(self.identity.display_name());
        let responder_handle = tokio::spawn(
            responder.serve(listener, responder_stop.clone().cancelled_owned()),
        );
        let engine_handle = tokio::spawn(self.engine.run(traffic_stop.clone()));

        shutdown.await;
        info!("Shutdown requested, draining traffic");

        traffic_stop.cancel();
        let engine_result = engine_handle
            .await
            .context("traffic engine task failed")
            .and_then(|result| result);
        match &engine_result {
            Ok(report) => info!(
                "Traffic stopped: {} batches, {} successful requests",
                report.dispatch.batches, report.stats.total_sent
            ),
            Err(e) => error!("Traffic engine failed: {:#}", e),
        }

        // The responder stops last, whether or not the engine succeeded
        responder_stop.cancel();
        let responder_result = responder_handle
            .await
            .context("responder task failed")
            .and_then(|result| result);

        let report = engine_result?;
        responder_result?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::DispatcherState;
    use crate::sender::MockTransport;
    use std::time::Duration;
    use tokio::time::sleep;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.topology.namespaces = 3;
        config.topology.deployments = 3;
        config.rate.stats_interval_secs = 0.2;
        config.rate.connections_per_interval = Some(20);
        config.rate.batch_size = 2;
        config.scenario.seed = Some(5);
        config
    }

    #[tokio::test]
    async fn test_node_serves_and_flushes_final_stats() {
        let identity = NodeIdentity::resolve("gc-ns-1-rs-1-test").unwrap();
        let node =
            Node::from_config(identity, &test_config(), Arc::new(MockTransport::new(1))).unwrap();
        let mut readings = node.subscribe();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(node.run_until(listener, async move {
            let _ = stop_rx.await;
        }));

        // Responder answers while traffic is flowing
        let body = reqwest::Client::new()
            .post(format!("http://{}/echo/gc-ns-2-rs-1-peer/9", addr))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(body, "HOSTNAME='gc-ns-1-rs-1-test', req_id=9");

        sleep(Duration::from_millis(500)).await;
        stop_tx.send(()).unwrap();
        let report = handle.await.unwrap().unwrap();

        assert_eq!(report.dispatch.state, DispatcherState::Cancelled);
        assert!(report.dispatch.batches >= 2);
        assert_eq!(report.dispatch.succeeded, report.stats.total_sent);
        assert!(report.stats.intervals >= 1);

        let last = *readings.borrow_and_update();
        assert!(last.is_final);
        assert_eq!(last.total, report.stats.total_sent);

        // Responder is gone once the node has returned
        assert!(reqwest::Client::new()
            .post(format!("http://{}/echo/gc-ns-2-rs-1-peer/10", addr))
            .send()
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_engine_failure_still_stops_responder() {
        let identity = NodeIdentity::resolve("gc-ns-1-rs-2-test").unwrap();
        let counter = RequestCounter::new();
        let sender = Arc::new(RequestSender::new(
            Arc::new(MockTransport::new(1)),
            counter.clone(),
            RetryPolicy::default(),
        ));
        let dispatcher = BatchDispatcher::new(
            identity.clone(),
            Topology::new(2, 2, 50.0),
            sender,
            BatchPacer::with_cycle_time(Duration::from_millis(10), 2),
            2,
        );
        // A zero period makes the aggregator task panic on its first poll
        let aggregator = StatsAggregator::new(counter, Duration::ZERO);
        let node = Node::new(identity, TrafficEngine::new(dispatcher, aggregator));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let result = node
            .run_until(listener, sleep(Duration::from_millis(200)))
            .await;

        let err = result.unwrap_err();
        assert!(format!("{err:#}").contains("statistics aggregator task failed"));

        assert!(reqwest::Client::new()
            .post(format!("http://{}/echo/gc-ns-2-rs-1-peer/1", addr))
            .send()
            .await
            .is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_final_reading_counts_the_draining_batch() {
        let identity = NodeIdentity::resolve("gc-ns-2-rs-2-test").unwrap();
        let counter = RequestCounter::new();
        let sender = Arc::new(RequestSender::new(
            Arc::new(MockTransport::new(400)),
            counter.clone(),
            RetryPolicy::default(),
        ));
        let dispatcher = BatchDispatcher::new(
            identity,
            Topology::new(3, 3, 50.0),
            sender,
            BatchPacer::with_cycle_time(Duration::from_millis(100), 3),
            3,
        );
        let aggregator = StatsAggregator::new(counter.clone(), Duration::from_secs(10));
        let engine = TrafficEngine::new(dispatcher, aggregator);

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(engine.run(cancel.clone()));

        // Cancel while the second batch (0.4s..0.8s) is in flight
        sleep(Duration::from_millis(600)).await;
        assert_eq!(counter.get(), 3);
        cancel.cancel();

        let report = handle.await.unwrap().unwrap();
        assert_eq!(report.dispatch.batches, 2);
        assert_eq!(report.stats.intervals, 0);
        assert_eq!(report.stats.final_delta, 6);
        assert_eq!(report.stats.total_sent, 6);
    }
}
