//! Watch Loop
//!
//! One loop per topic. Seeds the index with a plain read, then long-polls
//! with `wait_index = last_index`. An index advance triggers exactly one
//! notification; a failed read sleeps the fixed backoff and re-seeds.
//!
//! ```text
//! Seed ──► BlockingQuery ──┬─ same index ──► BlockingQuery
//!  ▲                       ├─ higher ──────► Notify ──► BlockingQuery
//!  │                       ├─ lower ───────► (ignored) ─► BlockingQuery
//!  └──── backoff ◄─────────┴─ error
//! ```

use appwatch_common::{AppWatchError, ChangeEvent, LoopPhase, WatchTarget};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use super::state::{Observation, WatchState};
use crate::notify::ChangeNotifier;
use crate::status::StatusHandle;
use crate::store::{KvResponse, KvStore, QueryOptions};

/// Timing knobs for a watch loop
#[derive(Debug, Clone, Copy)]
pub struct WatchSettings {
    /// Long-poll duration of each blocking query
    pub wait_time: Duration,
    /// Sleep after a failed store read
    pub backoff: Duration,
}

/// Long-poll loop for a single watch target
pub struct WatchLoop {
    target: WatchTarget,
    store: Arc<dyn KvStore>,
    notifier: Arc<dyn ChangeNotifier>,
    settings: WatchSettings,
    status: StatusHandle,
}

impl WatchLoop {
    pub fn new(
        target: WatchTarget,
        store: Arc<dyn KvStore>,
        notifier: Arc<dyn ChangeNotifier>,
        settings: WatchSettings,
        status: StatusHandle,
    ) -> Self {
        Self {
            target,
            store,
            notifier,
            settings,
            status,
        }
    }

    /// Run until shutdown. State starts fresh on every call.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> Result<(), AppWatchError> {
        let mut state = WatchState::new();

        tracing::info!(
            topic = %self.target.topic,
            key = %self.target.key,
            wait = ?self.settings.wait_time,
            "👀 Watch loop started"
        );

        tokio::select! {
            _ = self.watch(&mut state) => {}
            _ = shutdown.recv() => {
                tracing::info!(topic = %self.target.topic, "👀 Watch loop shutting down");
            }
        }

        self.status.set_phase(LoopPhase::Stopped).await;
        Ok(())
    }

    async fn watch(&self, state: &mut WatchState) {
        loop {
            if let Err(e) = self.seed(state).await {
                self.back_off(&e).await;
                continue;
            }

            loop {
                if let Err(e) = self.poll_once(state).await {
                    self.back_off(&e).await;
                    break;
                }
            }
        }
    }

    /// Plain read that seeds `last_index` and checks the key exists
    pub async fn seed(&self, state: &mut WatchState) -> Result<Observation, AppWatchError> {
        self.status.set_phase(LoopPhase::Seeding).await;

        let response = self
            .store
            .get(&self.target.key, QueryOptions::default())
            .await?;

        if response.pair.is_none() {
            tracing::warn!(key = %self.target.key, "No value for key, waiting for it to be created");
        }
        if response.meta.last_index == 0 {
            tracing::warn!(key = %self.target.key, "Unexpected index 0 from store");
        }

        let observation = state.seed(response.meta.last_index, response.value());
        self.handle(state, observation, &response).await;
        Ok(observation)
    }

    /// One blocking query and its follow-up
    pub async fn poll_once(&self, state: &mut WatchState) -> Result<Observation, AppWatchError> {
        self.status.set_phase(LoopPhase::Polling).await;

        // Consul treats index 0 as a plain read, which would spin
        let options = QueryOptions::blocking(state.last_index().max(1), self.settings.wait_time);
        let response = self.store.get(&self.target.key, options).await?;

        if response.pair.is_none() {
            tracing::trace!(key = %self.target.key, "No value for key");
        }

        let observation = state.observe(response.meta.last_index, response.value());
        self.handle(state, observation, &response).await;
        Ok(observation)
    }

    async fn handle(&self, state: &WatchState, observation: Observation, response: &KvResponse) {
        let last_index = state.last_index();
        let key_present = response.pair.is_some();
        self.status
            .update(|s| {
                s.last_index = last_index;
                s.key_present = key_present;
            })
            .await;

        match observation {
            Observation::Seeded { index } => {
                tracing::info!(topic = %self.target.topic, index, "Seeded watch index");
            }
            Observation::Unchanged { index } => {
                tracing::trace!(topic = %self.target.topic, index, "Timeout, value is not changed");
            }
            Observation::Regressed { recorded, returned } => {
                tracing::warn!(
                    topic = %self.target.topic,
                    recorded,
                    returned,
                    "Unexpected index decrease, keeping recorded index"
                );
            }
            Observation::Changed { previous, current } => {
                tracing::info!(
                    topic = %self.target.topic,
                    previous,
                    current,
                    modify_index = ?response.pair.as_ref().map(|p| p.modify_index),
                    "Value changed"
                );
                let event = ChangeEvent {
                    topic: self.target.topic,
                    key: self.target.key.clone(),
                    previous_index: previous,
                    index: current,
                    value: state.last_value().map(<[u8]>::to_vec),
                };
                self.dispatch(&event).await;
            }
        }
    }

    /// Notification failures are logged and counted, never propagated
    async fn dispatch(&self, event: &ChangeEvent) {
        self.status.set_phase(LoopPhase::Notifying).await;

        match self.notifier.notify(event).await {
            Ok(()) => {
                self.status
                    .update(|s| {
                        s.notifications_sent += 1;
                        s.last_change_at = Some(Utc::now());
                    })
                    .await;
            }
            Err(e) => {
                tracing::warn!(
                    topic = %event.topic,
                    index = event.index,
                    error = %e,
                    "Notification failed, change will not be re-sent"
                );
                let message = e.to_string();
                self.status
                    .update(|s| {
                        s.notifications_failed += 1;
                        s.last_change_at = Some(Utc::now());
                        s.last_error = Some(message);
                    })
                    .await;
            }
        }
    }

    async fn back_off(&self, error: &AppWatchError) {
        tracing::warn!(
            topic = %self.target.topic,
            key = %self.target.key,
            error = %error,
            backoff = ?self.settings.backoff,
            "Connect to Consul failed"
        );

        let message = error.to_string();
        self.status
            .update(|s| {
                s.store_errors += 1;
                s.last_error = Some(message);
                s.phase = LoopPhase::BackingOff;
            })
            .await;

        tokio::time::sleep(self.settings.backoff).await;
    }
}
