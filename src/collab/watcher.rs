use crate::collab::coordination::{Coordinator, NodeAddress};
use crate::collab::state::StateManager;
use crate::topology::{ProjectTopology, TopologySource, make_project_model_chunk_lookup};
use anyhow::Result;
use log::{error, info};
use std::{sync::Arc, time::Duration};
use tokio::sync::watch::{self, Receiver, Sender};
use tokio::time;

/// What the coordination service currently reports.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterView {
    pub nodes: Vec<NodeAddress>,
    pub version: Option<String>,
}

/// Polls the coordination service and keeps the published state in sync with it.
///
/// A node list change recomputes ownership with the current topology, a version change reloads
/// the topology first. Every published change is also sent on the returned channel.
pub struct ClusterWatcher<C, T> {
    coordinator: Arc<C>,
    topology: Arc<T>,
    state: Arc<StateManager>,
}

impl<C, T> ClusterWatcher<C, T>
where
    C: Coordinator + Send + Sync + 'static,
    T: TopologySource + Send + Sync + 'static,
{
    pub fn new(coordinator: Arc<C>, topology: Arc<T>, state: Arc<StateManager>) -> Self {
        Self {
            coordinator,
            topology,
            state,
        }
    }

    async fn load_topology(&self) -> Result<ProjectTopology> {
        let metadata = self.topology.project_model_metadata().await?;
        Ok(make_project_model_chunk_lookup(&metadata))
    }

    /// Reads the cluster once and publishes a new state if anything changed.
    pub async fn refresh(&self, tx: &Sender<ClusterView>) -> Result<()> {
        let view = ClusterView {
            nodes: self.coordinator.registered_nodes().await?,
            version: self.coordinator.project_data_version().await?,
        };
        let old_view = tx.borrow().clone();

        if old_view == view {
            return Ok(());
        }

        let topology = if old_view.version != view.version {
            info!(
                "Detected projects version change: old='{}', new='{}'",
                old_view.version.as_deref().unwrap_or("none"),
                view.version.as_deref().unwrap_or("none")
            );
            Arc::new(self.load_topology().await?)
        } else {
            self.state.snapshot().topology.clone()
        };

        if old_view.nodes != view.nodes {
            info!(
                "Detected node list change: old={:?}, new={:?}",
                old_view.nodes, view.nodes
            );
        }

        self.state.set_state(
            view.nodes.clone(),
            view.version.clone().unwrap_or_default(),
            topology,
        );

        // Stored even when every receiver is gone, it is the baseline of the next refresh
        tx.send_replace(view);

        Ok(())
    }

    pub async fn start(self, interval: Duration) -> (impl FnOnce(), Receiver<ClusterView>) {
        let (tx, rx) = watch::channel(ClusterView::default());

        let task = tokio::spawn(async move {
            let mut ticker = time::interval(interval);

            loop {
                ticker.tick().await;

                if let Err(e) = self.refresh(&tx).await {
                    error!("error refreshing cluster state: {e}");
                }
            }
        });

        let close_function = move || {
            task.abort();
            info!("ClusterWatcher stopped");
        };

        info!("ClusterWatcher started");

        (close_function, rx)
    }
}
