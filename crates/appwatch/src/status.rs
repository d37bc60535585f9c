//! Published per-topic status, read by the status endpoint.

use appwatch_common::{LoopPhase, Topic, TopicStatus, WatchTarget};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Snapshot registry shared between watch tasks and the status routes
#[derive(Clone, Default)]
pub struct StatusBoard {
    topics: Arc<RwLock<BTreeMap<Topic, TopicStatus>>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or reset) the entry for `target` and hand out its writer
    pub async fn register(&self, target: &WatchTarget) -> StatusHandle {
        self.topics
            .write()
            .await
            .insert(target.topic, TopicStatus::new(target));

        StatusHandle {
            topic: target.topic,
            board: self.clone(),
        }
    }

    #[cfg(test)]
    pub async fn get(&self, topic: Topic) -> Option<TopicStatus> {
        self.topics.read().await.get(&topic).cloned()
    }

    pub async fn snapshot(&self) -> Vec<TopicStatus> {
        self.topics.read().await.values().cloned().collect()
    }
}

/// Writer for a single topic's entry; owned by that topic's task
pub struct StatusHandle {
    topic: Topic,
    board: StatusBoard,
}

impl StatusHandle {
    pub async fn update(&self, f: impl FnOnce(&mut TopicStatus)) {
        if let Some(status) = self.board.topics.write().await.get_mut(&self.topic) {
            f(status);
        }
    }

    pub async fn set_phase(&self, phase: LoopPhase) {
        self.update(|s| s.phase = phase).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_handle_only_touches_own_topic() {
        let board = StatusBoard::new();
        let topology = board.register(&WatchTarget::topology("host1")).await;
        let _security = board.register(&WatchTarget::security()).await;

        topology
            .update(|s| {
                s.last_index = 7;
                s.phase = LoopPhase::Polling;
            })
            .await;

        let topo = board.get(Topic::Topology).await.unwrap();
        assert_eq!(topo.last_index, 7);
        assert_eq!(topo.phase, LoopPhase::Polling);

        let sec = board.get(Topic::Security).await.unwrap();
        assert_eq!(sec.last_index, 0);
        assert_eq!(sec.phase, LoopPhase::Starting);

        assert_eq!(board.snapshot().await.len(), 2);
    }
}
