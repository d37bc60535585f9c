//! Orchestrator: one task per topic, explicit shutdown policy.
//!
//! Every task reports a `TaskExit` over a channel. Under `crash-together`
//! the first exit stops everything; under `restart-one` the exited topic is
//! respawned after a delay and only an external shutdown ends the run.

use appwatch_common::{AppWatchError, LoopPhase, Topic, WatchTarget};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

use crate::notify::ChangeNotifier;
use crate::status::{StatusBoard, StatusHandle};
use crate::store::KvStore;
use crate::watch::{WatchLoop, WatchSettings};

/// What to do when a watch task stops
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    /// Stop all tasks and exit on the first task exit
    #[default]
    CrashTogether,
    /// Respawn only the task that stopped
    RestartOne,
}

/// Structured completion report from a watch task
#[derive(Debug)]
pub struct TaskExit {
    pub topic: Topic,
    pub result: Result<(), AppWatchError>,
}

/// Why `Supervisor::run` returned
#[derive(Debug)]
pub enum SupervisorExit {
    /// Shutdown was broadcast from outside
    Shutdown,
    /// A task stopped under `crash-together`
    TaskCompleted(TaskExit),
}

/// Spawns and supervises the per-topic tasks
pub struct Supervisor {
    targets: Vec<WatchTarget>,
    store: Arc<dyn KvStore>,
    notifier: Arc<dyn ChangeNotifier>,
    settings: WatchSettings,
    policy: RestartPolicy,
    restart_delay: Duration,
    status: StatusBoard,
    shutdown: broadcast::Sender<()>,
}

impl Supervisor {
    pub fn new(
        targets: Vec<WatchTarget>,
        store: Arc<dyn KvStore>,
        notifier: Arc<dyn ChangeNotifier>,
        settings: WatchSettings,
        status: StatusBoard,
        shutdown: broadcast::Sender<()>,
    ) -> Self {
        Self {
            targets,
            store,
            notifier,
            settings,
            policy: RestartPolicy::default(),
            restart_delay: settings.backoff,
            status,
            shutdown,
        }
    }

    pub fn with_policy(mut self, policy: RestartPolicy, restart_delay: Duration) -> Self {
        self.policy = policy;
        self.restart_delay = restart_delay;
        self
    }

    /// Spawn every topic and block until the policy says stop
    pub async fn run(self) -> SupervisorExit {
        let (exit_tx, mut exit_rx) = mpsc::channel::<TaskExit>(self.targets.len().max(1));
        let mut shutdown_rx = self.shutdown.subscribe();

        for target in &self.targets {
            self.spawn_task(target.clone(), exit_tx.clone()).await;
        }

        tracing::info!(
            topics = self.targets.len(),
            policy = ?self.policy,
            "🧭 Supervisor started"
        );

        loop {
            // Shutdown wins when it races a task exit
            tokio::select! {
                biased;

                _ = shutdown_rx.recv() => {
                    tracing::info!("🧭 Supervisor shutting down");
                    return SupervisorExit::Shutdown;
                }
                Some(exit) = exit_rx.recv() => {
                    match &exit.result {
                        Ok(()) => tracing::warn!(topic = %exit.topic, "Watch task stopped"),
                        Err(e) => tracing::error!(topic = %exit.topic, error = %e, "Watch task failed"),
                    }

                    match self.policy {
                        RestartPolicy::CrashTogether => {
                            tracing::warn!("Stopping remaining watch tasks");
                            let _ = self.shutdown.send(());
                            return SupervisorExit::TaskCompleted(exit);
                        }
                        RestartPolicy::RestartOne => {
                            let Some(target) = self.target(exit.topic) else {
                                continue;
                            };

                            tokio::select! {
                                _ = tokio::time::sleep(self.restart_delay) => {}
                                _ = shutdown_rx.recv() => return SupervisorExit::Shutdown,
                            }

                            tracing::info!(topic = %target.topic, "Restarting watch task");
                            self.spawn_task(target, exit_tx.clone()).await;
                        }
                    }
                }
            }
        }
    }

    fn target(&self, topic: Topic) -> Option<WatchTarget> {
        self.targets.iter().find(|t| t.topic == topic).cloned()
    }

    async fn spawn_task(&self, target: WatchTarget, exits: mpsc::Sender<TaskExit>) {
        let topic = target.topic;
        let status = self.status.register(&target).await;
        let shutdown = self.shutdown.subscribe();

        let handle = match topic {
            Topic::Topology => {
                let watch = WatchLoop::new(
                    target,
                    self.store.clone(),
                    self.notifier.clone(),
                    self.settings,
                    status,
                );
                tokio::spawn(watch.run(shutdown))
            }
            Topic::Security => tokio::spawn(idle_until_shutdown(target, status, shutdown)),
        };

        // Panics surface as JoinErrors and are reported like any other exit
        tokio::spawn(async move {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(AppWatchError::Internal(format!(
                    "watch task for {topic} aborted: {e}"
                ))),
            };
            let _ = exits.send(TaskExit { topic, result }).await;
        });
    }
}

/// Security watching is not implemented; the topic stays registered but idle
async fn idle_until_shutdown(
    target: WatchTarget,
    status: StatusHandle,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), AppWatchError> {
    status.set_phase(LoopPhase::Idle).await;
    tracing::info!(key = %target.key, "Security watch disabled, topic idle");

    let _ = shutdown.recv().await;

    status.set_phase(LoopPhase::Stopped).await;
    Ok(())
}
