use super::types::{GossipMessage, MemberRecord, MemberStatus, MembershipView, NodeId};
use crate::config::ClusterConfig;
use crate::handoff::store::HintTable;
use crate::storage::protocol::{now_ms, ReplicaClient};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

const MAILBOX_CAPACITY: usize = 64;

/// Lookup table from node id to that node's gossip mailbox. Plays the role
/// of a process registry: tasks address each other by node id, never by
/// generated names.
#[derive(Default)]
pub struct GossipRegistry {
    senders: DashMap<NodeId, mpsc::Sender<GossipMessage>>,
}

impl GossipRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, node: NodeId, sender: mpsc::Sender<GossipMessage>) {
        self.senders.insert(node, sender);
    }

    pub fn sender(&self, node: &NodeId) -> Option<mpsc::Sender<GossipMessage>> {
        self.senders.get(node).map(|entry| entry.value().clone())
    }

    /// Ask one gossip task for its current view. Answered during the task's
    /// next receive window.
    pub async fn view_of(&self, node: &NodeId) -> Option<MembershipView> {
        let sender = self.sender(node)?;
        let (reply, response) = oneshot::channel();
        sender.send(GossipMessage::GetView(reply)).await.ok()?;
        response.await.ok()
    }
}

/// Per-node gossip task: owns this node's membership view, spreads it to
/// random peers, and marks silent peers as failed. No other task ever
/// touches the view directly.
pub struct GossipService<C> {
    local: NodeId,
    view: MembershipView,
    mailbox: mpsc::Receiver<GossipMessage>,
    registry: Arc<GossipRegistry>,
    hints: Arc<HintTable>,
    replicas: Arc<C>,
    config: ClusterConfig,
}

impl<C: ReplicaClient> GossipService<C> {
    /// Register a mailbox for `local` and detach the gossip loop.
    pub fn spawn(
        local: NodeId,
        seed_view: MembershipView,
        registry: Arc<GossipRegistry>,
        hints: Arc<HintTable>,
        replicas: Arc<C>,
        config: ClusterConfig,
    ) -> JoinHandle<()> {
        let (sender, mailbox) = mpsc::channel(MAILBOX_CAPACITY);
        registry.register(local.clone(), sender);
        let service = GossipService {
            local,
            view: seed_view,
            mailbox,
            registry,
            hints,
            replicas,
            config,
        };
        tokio::spawn(service.run())
    }

    async fn run(mut self) {
        tracing::debug!("gossip task for {} started", self.local);
        let mut ticker = tokio::time::interval(self.config.gossip_interval);
        loop {
            ticker.tick().await;
            self.round().await;
        }
    }

    /// One gossip round: refresh self, push the view to one random peer,
    /// drain the mailbox for a bounded window, sweep for failures, and
    /// replay hints if anyone came back from the dead.
    async fn round(&mut self) {
        let statuses_before: HashMap<NodeId, MemberStatus> = self
            .view
            .iter()
            .map(|(node, record)| (node.clone(), record.status))
            .collect();

        self.view
            .insert(self.local.clone(), MemberRecord::alive(now_ms()));

        self.push_to_random_peer();

        let window = tokio::time::Instant::now() + self.config.gossip_receive_window;
        loop {
            match tokio::time::timeout_at(window, self.mailbox.recv()).await {
                Ok(Some(GossipMessage::View(incoming))) => merge_views(&mut self.view, incoming),
                Ok(Some(GossipMessage::GetView(reply))) => {
                    let _ = reply.send(self.view.clone());
                }
                Ok(None) | Err(_) => break,
            }
        }

        sweep_failures(
            &mut self.view,
            &self.local,
            now_ms(),
            self.config.failure_threshold.as_millis() as u64,
        );

        let recovered: Vec<NodeId> = self
            .view
            .iter()
            .filter(|(node, record)| {
                record.status == MemberStatus::Alive
                    && statuses_before.get(*node) == Some(&MemberStatus::Failed)
            })
            .map(|(node, _)| node.clone())
            .collect();

        if !recovered.is_empty() {
            tracing::info!(
                "{}: peer(s) {:?} recovered, replaying parked writes",
                self.local,
                recovered
            );
            let hints = self.hints.clone();
            let replicas = self.replicas.clone();
            tokio::spawn(async move {
                hints.retry_all(replicas.as_ref()).await;
            });
        }
    }

    fn push_to_random_peer(&self) {
        let peers: Vec<&NodeId> = self.view.keys().filter(|node| **node != self.local).collect();
        if peers.is_empty() {
            return;
        }

        use rand::Rng;
        let target = peers[rand::thread_rng().gen_range(0..peers.len())];
        if let Some(sender) = self.registry.sender(target) {
            if sender
                .try_send(GossipMessage::View(self.view.clone()))
                .is_err()
            {
                tracing::debug!("{}: gossip mailbox of {} full or gone", self.local, target);
            }
        } else {
            tracing::debug!("{}: peer {} has no registered mailbox", self.local, target);
        }
    }
}

/// Merge an incoming view: per node, the record with the larger `last_heard`
/// wins. Commutative, associative, and idempotent, so duplicated or
/// reordered gossip converges.
pub fn merge_views(view: &mut MembershipView, incoming: MembershipView) {
    for (node, record) in incoming {
        match view.get(&node) {
            Some(existing) if existing.last_heard >= record.last_heard => {}
            _ => {
                view.insert(node, record);
            }
        }
    }
}

/// Mark every peer silent for longer than `threshold_ms` as failed. The
/// local node is exempt; its record is refreshed at the top of each round.
pub fn sweep_failures(view: &mut MembershipView, local: &NodeId, now: u64, threshold_ms: u64) {
    for (node, record) in view.iter_mut() {
        if node == local || record.status == MemberStatus::Failed {
            continue;
        }
        if now.saturating_sub(record.last_heard) > threshold_ms {
            tracing::warn!(
                "{}: no contact from {} for over {}ms, marking failed",
                local,
                node,
                threshold_ms
            );
            record.status = MemberStatus::Failed;
        }
    }
}
