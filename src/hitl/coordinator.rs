//! The suspend/deliver rendezvous (§4.3), grounded on the callback server's
//! `oneshot`-per-request pattern elsewhere in this codebase, generalized
//! from "CLI polls an HTTP callback server" into "a suspended async phase
//! awaits an in-process future completed by a separate HTTP request".

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, oneshot};
use uuid::Uuid;

use crate::errors::HitlError;

use super::store::HitlStore;
use super::types::{HitlAction, HitlInteraction, HitlPrompt, HitlResponse, HitlType, InteractionStatus};

/// One outstanding rendezvous: the sender half is held here; the matching
/// receiver is awaited by the suspended phase.
struct Waiter {
    round: u32,
    tx: oneshot::Sender<Result<HitlResponse, HitlError>>,
}

pub struct HitlCoordinator {
    store: HitlStore,
    waiters: Arc<Mutex<HashMap<Uuid, Waiter>>>,
    default_timeout: std::time::Duration,
}

impl HitlCoordinator {
    pub fn new(store: HitlStore, default_timeout: std::time::Duration) -> Self {
        Self {
            store,
            waiters: Arc::new(Mutex::new(HashMap::new())),
            default_timeout,
        }
    }

    /// Called by a suspending phase. Persists the interaction, registers a
    /// waiter, and returns a future that resolves when `deliver` is called
    /// (or fails on timeout/cancellation). Idempotent: if the job already
    /// has a pending interaction for the current round (because this is a
    /// post-crash re-entry), it reattaches to it instead of creating a new
    /// round; if that interaction was already answered while the process
    /// was down, it returns immediately with the stored response.
    pub async fn suspend(
        &self,
        job_id: Uuid,
        interaction_type: HitlType,
        payload: serde_json::Value,
    ) -> Result<HitlResponse, HitlError> {
        let interaction = self.register(job_id, interaction_type, payload).await?;
        self.wait(interaction).await
    }

    /// The non-blocking half of `suspend`: persists (or reattaches to) the
    /// pending interaction and returns it without waiting on a response.
    /// Callers that need to update other state (e.g. the job record) between
    /// registering the prompt and blocking on it should call this, then
    /// `wait`, instead of the combined `suspend`.
    pub async fn register(
        &self,
        job_id: Uuid,
        interaction_type: HitlType,
        payload: serde_json::Value,
    ) -> Result<HitlInteraction, HitlError> {
        if let Some(existing) = self.store.latest(job_id).map_err(|_| HitlError::NoPendingPrompt(job_id))?
            && existing.status == InteractionStatus::Pending
        {
            return Ok(existing);
        }

        let round = self
            .store
            .next_round(job_id)
            .map_err(|_| HitlError::NoPendingPrompt(job_id))?;
        let interaction = HitlInteraction {
            job_id,
            round,
            interaction_type,
            prompt: payload,
            response: None,
            response_payload: None,
            created_at: Utc::now(),
            responded_at: None,
            timeout_at: Utc::now()
                + chrono::Duration::from_std(self.default_timeout).unwrap_or(chrono::Duration::hours(1)),
            status: InteractionStatus::Pending,
        };
        self.store
            .insert(&interaction)
            .map_err(|_| HitlError::NoPendingPrompt(job_id))?;

        Ok(interaction)
    }

    /// The blocking half of `suspend`: awaits the response for an
    /// already-registered interaction (or returns the stored response
    /// immediately if it was answered while this process was down).
    pub async fn wait(&self, interaction: HitlInteraction) -> Result<HitlResponse, HitlError> {
        self.attach_waiter(interaction).await
    }

    async fn attach_waiter(&self, interaction: HitlInteraction) -> Result<HitlResponse, HitlError> {
        if interaction.status == InteractionStatus::Answered {
            return Ok(HitlResponse {
                action: interaction.response.unwrap_or(HitlAction::Proceed),
                response: interaction.response_payload,
            });
        }
        if interaction.status != InteractionStatus::Pending {
            return Err(HitlError::ConflictingState {
                job_id: interaction.job_id,
                round: interaction.round,
            });
        }

        let (tx, rx) = oneshot::channel();
        {
            let mut waiters = self.waiters.lock().await;
            waiters.insert(
                interaction.job_id,
                Waiter {
                    round: interaction.round,
                    tx,
                },
            );
        }

        rx.await.unwrap_or(Err(HitlError::Cancelled(interaction.job_id)))
    }

    /// Returns the most recent interaction for a job regardless of status,
    /// answered or not. Used by the engine to check whether a response
    /// already landed for a suspended job before re-registering a prompt for
    /// it, which would otherwise hand out a fresh, never-to-be-answered
    /// round (`register` only reattaches to a still-`Pending` interaction).
    pub fn latest(&self, job_id: Uuid) -> Option<HitlInteraction> {
        self.store.latest(job_id).ok().flatten()
    }

    /// Returns the currently pending prompt for a job, if any.
    pub fn get_prompt(&self, job_id: Uuid) -> Option<HitlPrompt> {
        let interaction = self.store.latest(job_id).ok().flatten()?;
        if interaction.status != InteractionStatus::Pending {
            return None;
        }
        Some(HitlPrompt {
            interaction_type: interaction.interaction_type,
            payload: interaction.prompt,
        })
    }

    /// Called by the external actor's HTTP request. Completes the waiting
    /// future and seals the interaction.
    pub async fn deliver(&self, job_id: Uuid, response: HitlResponse) -> Result<(), HitlError> {
        let mut interaction = self
            .store
            .latest(job_id)
            .ok()
            .flatten()
            .ok_or(HitlError::NoPendingPrompt(job_id))?;

        if interaction.status != InteractionStatus::Pending {
            return Err(HitlError::ConflictingState {
                job_id,
                round: interaction.round,
            });
        }

        interaction.status = InteractionStatus::Answered;
        interaction.response = Some(response.action);
        interaction.response_payload = response.response.clone();
        interaction.responded_at = Some(Utc::now());
        self.store
            .update(&interaction)
            .map_err(|_| HitlError::NoPendingPrompt(job_id))?;

        let mut waiters = self.waiters.lock().await;
        if let Some(waiter) = waiters.remove(&job_id)
            && waiter.round == interaction.round
        {
            let _ = waiter.tx.send(Ok(response));
        }
        Ok(())
    }

    /// Cancels any outstanding interaction for a job.
    pub async fn cancel(&self, job_id: Uuid) {
        if let Ok(Some(mut interaction)) = self.store.latest(job_id)
            && interaction.status == InteractionStatus::Pending
        {
            interaction.status = InteractionStatus::Cancelled;
            let _ = self.store.update(&interaction);
        }
        let mut waiters = self.waiters.lock().await;
        if let Some(waiter) = waiters.remove(&job_id) {
            let _ = waiter.tx.send(Err(HitlError::Cancelled(job_id)));
        }
    }

    /// Marks a timed-out interaction and fails its waiter. Call from a
    /// periodic sweep driven by the workflow engine.
    pub async fn expire_if_overdue(&self, job_id: Uuid) {
        if let Ok(Some(mut interaction)) = self.store.latest(job_id)
            && interaction.status == InteractionStatus::Pending
            && interaction.timeout_at < Utc::now()
        {
            let round = interaction.round;
            interaction.status = InteractionStatus::TimedOut;
            let _ = self.store.update(&interaction);
            let mut waiters = self.waiters.lock().await;
            if let Some(waiter) = waiters.remove(&job_id) {
                let _ = waiter.tx.send(Err(HitlError::TimedOut { job_id, round }));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coordinator() -> HitlCoordinator {
        HitlCoordinator::new(HitlStore::open(":memory:").unwrap(), std::time::Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn suspend_then_deliver_resolves_the_future() {
        let coord = Arc::new(coordinator());
        let job_id = Uuid::new_v4();
        let coord2 = coord.clone();

        let handle = tokio::spawn(async move {
            coord2
                .suspend(job_id, HitlType::Clarify, serde_json::json!({"q": 1}))
                .await
        });

        // Give the suspend call a moment to register its waiter.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        coord
            .deliver(
                job_id,
                HitlResponse {
                    action: HitlAction::Proceed,
                    response: Some(serde_json::json!({"a": 1})),
                },
            )
            .await
            .unwrap();

        let response = handle.await.unwrap().unwrap();
        assert_eq!(response.action, HitlAction::Proceed);
    }

    #[tokio::test]
    async fn deliver_without_pending_prompt_errors() {
        let coord = coordinator();
        let job_id = Uuid::new_v4();
        let result = coord
            .deliver(job_id, HitlResponse { action: HitlAction::Proceed, response: None })
            .await;
        assert!(matches!(result, Err(HitlError::NoPendingPrompt(_))));
    }

    #[tokio::test]
    async fn deliver_twice_is_conflicting_state() {
        let coord = Arc::new(coordinator());
        let job_id = Uuid::new_v4();
        let coord2 = coord.clone();
        let handle = tokio::spawn(async move {
            coord2.suspend(job_id, HitlType::Preview, serde_json::json!({})).await
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        coord
            .deliver(job_id, HitlResponse { action: HitlAction::Proceed, response: None })
            .await
            .unwrap();
        handle.await.unwrap().unwrap();

        let second = coord
            .deliver(job_id, HitlResponse { action: HitlAction::Proceed, response: None })
            .await;
        assert!(matches!(second, Err(HitlError::ConflictingState { .. })));
    }

    #[tokio::test]
    async fn cancel_fails_the_waiting_future() {
        let coord = Arc::new(coordinator());
        let job_id = Uuid::new_v4();
        let coord2 = coord.clone();
        let handle = tokio::spawn(async move {
            coord2.suspend(job_id, HitlType::Confirm, serde_json::json!({})).await
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        coord.cancel(job_id).await;
        let result = handle.await.unwrap();
        assert!(matches!(result, Err(HitlError::Cancelled(_))));
    }
}
