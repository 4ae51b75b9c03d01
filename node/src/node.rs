//! Node core assembly.
//!
//! Wires the election engine and the syncer onto the collaborator seams the
//! embedding node provides: the ledger read view, the block processor, the
//! peer query transport and the confirm network.

use std::sync::Arc;

use strand_consensus::{ElectionNetwork, ElectionStatus, Elections, StatusObserver};
use strand_ledger::Ledger;
use strand_types::Account;

use crate::block_processor::BlockProcessor;
use crate::block_queries::BlockQueries;
use crate::config::NodeConfig;
use crate::shutdown::ShutdownController;
use crate::syncer::Syncer;

/// The assembled node core.
pub struct Node {
    config: NodeConfig,
    elections: Elections,
    syncer: Arc<Syncer>,
}

impl Node {
    /// Assemble the core over the embedding node's collaborators.
    pub fn new(
        config: NodeConfig,
        ledger: Arc<dyn Ledger>,
        processor: Arc<dyn BlockProcessor>,
        block_queries: Arc<dyn BlockQueries>,
        network: Arc<dyn ElectionNetwork>,
    ) -> Self {
        let syncer = Syncer::new(ledger.clone(), processor, block_queries);

        let observer: StatusObserver = Box::new(log_election_status);
        let elections = Elections::new(config.elections_config(), ledger, network, observer);

        Self {
            config,
            elections,
            syncer,
        }
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn elections(&self) -> &Elections {
        &self.elections
    }

    pub fn syncer(&self) -> &Arc<Syncer> {
        &self.syncer
    }

    /// Start pulling an account from its local head.
    pub fn start_sync(&self, account: Account, batch_id: u32) {
        self.syncer.sync_account(account, batch_id);
    }

    /// Stop the election worker. The syncer needs no explicit stop: its
    /// callbacks hold weak back-references and outstanding queries are
    /// simply abandoned.
    pub fn stop(&self) {
        self.elections.stop();
        tracing::info!("node core stopped");
    }

    /// Run until the shutdown controller fires, then stop.
    pub async fn run_until_shutdown(&self, shutdown: &ShutdownController) {
        let mut rx = shutdown.subscribe();
        let _ = rx.recv().await;
        self.stop();
    }
}

fn log_election_status(status: &ElectionStatus) {
    if status.error {
        tracing::warn!(
            account = %status.account,
            height = status.height,
            "election expired unresolved"
        );
    } else if let Some(block) = &status.block {
        tracing::info!(
            account = %status.account,
            height = status.height,
            winner = %block.hash,
            "election confirmed"
        );
    } else {
        tracing::info!(
            account = %status.account,
            height = status.height,
            "election confirmed"
        );
    }
}
