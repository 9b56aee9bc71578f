//! Process lifecycle: startup connects, run-until-signal, graceful shutdown.

use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::config::BridgeConfig;
use crate::cycle::CycleExecutor;
use crate::error::ConnectionError;
use crate::mapping::TopicMappingTable;
use crate::scheduler::BridgeScheduler;
use crate::sink::{MessageSink, MqttSink};
use crate::source::{ModbusTagSource, TagSource};

/// The two long-lived capabilities, owned for the lifetime of the process.
///
/// Constructed once at startup and handed to the scheduler; there is no
/// other holder of either session, so teardown order is fully under this
/// type's control.
pub struct BridgeContext<S, K> {
    pub source: S,
    pub sink: K,
}

impl<S: TagSource, K: MessageSink> BridgeContext<S, K> {
    pub fn new(source: S, sink: K) -> Self {
        Self { source, sink }
    }

    /// Connect both capabilities. The two connects share no state and run
    /// concurrently; either failure aborts startup.
    pub async fn connect(&mut self) -> Result<(), ConnectionError> {
        tokio::try_join!(self.source.connect(), self.sink.connect())?;
        Ok(())
    }

    /// Disconnect both capabilities, sink first. No cycle is in flight when
    /// this runs, so nothing can race a capability mid-disconnect. Each
    /// disconnect logs its own failures and never raises.
    pub async fn shutdown(&mut self) {
        self.sink.disconnect().await;
        self.source.disconnect().await;
    }
}

/// Run the bridge until an external termination signal.
///
/// Startup connection failures return an error (the process exits
/// non-zero); a graceful shutdown returns `Ok`.
pub async fn run(config: BridgeConfig) -> anyhow::Result<()> {
    let table = TopicMappingTable::new(&config.namespace, config.mappings.clone())?;
    let scheduler = BridgeScheduler::new(
        Duration::from_secs(config.publish_period_secs),
        CycleExecutor::new(table),
    );
    let grace = Duration::from_secs(config.shutdown_grace_secs);

    let mut ctx = BridgeContext::new(
        ModbusTagSource::new(config.source),
        MqttSink::new(config.sink),
    );

    info!("Connecting to tag source and message sink");
    ctx.connect().await?;

    let (stop_tx, stop_rx) = watch::channel(false);
    let mut worker = tokio::spawn(async move {
        scheduler.run(&mut ctx.source, &ctx.sink, stop_rx).await;
        ctx
    });

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal; stopping scheduler");
    let _ = stop_tx.send(true);

    match timeout(grace, &mut worker).await {
        Ok(Ok(mut ctx)) => {
            ctx.shutdown().await;
            info!("Bridge stopped");
        }
        Ok(Err(e)) => {
            error!(error = %e, "Scheduler task failed during shutdown");
        }
        Err(_) => {
            warn!(
                grace_secs = grace.as_secs(),
                "In-flight cycle did not finish within the grace period; abandoning teardown"
            );
            worker.abort();
        }
    }

    Ok(())
}
