//! Remote write boundary.

use async_trait::async_trait;
use intake_sync_protocol::{DeliveryOutcome, Mutation, MutationId, MutationKind};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// Delivers a mutation to the authoritative store.
///
/// Implementations must fold every transport error and server response
/// into a [`DeliveryOutcome`]; the engine's retry policy sees nothing
/// else.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Attempts one delivery.
    async fn send(&self, mutation: &Mutation) -> DeliveryOutcome;
}

#[async_trait]
impl<T: RemoteClient + ?Sized> RemoteClient for Arc<T> {
    async fn send(&self, mutation: &Mutation) -> DeliveryOutcome {
        (**self).send(mutation).await
    }
}

#[derive(Debug, Default)]
struct MockState {
    by_key: HashMap<String, VecDeque<DeliveryOutcome>>,
    queued: VecDeque<DeliveryOutcome>,
    calls: Vec<Mutation>,
    next_id: i64,
    delay: Option<Duration>,
}

/// A scripted remote client for testing.
///
/// Outcomes scripted for a natural key are consumed first, then the
/// shared script. With nothing scripted every call is delivered and
/// creates are assigned increasing ids.
#[derive(Debug, Default)]
pub struct MockRemote {
    state: Mutex<MockState>,
}

impl MockRemote {
    /// Creates a mock that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an outcome for the next call without a keyed script.
    pub fn push_outcome(&self, outcome: DeliveryOutcome) {
        self.state.lock().queued.push_back(outcome);
    }

    /// Scripts outcomes for mutations whose natural key matches.
    pub fn script_for(
        &self,
        natural_key: &str,
        outcomes: impl IntoIterator<Item = DeliveryOutcome>,
    ) {
        self.state
            .lock()
            .by_key
            .entry(natural_key.trim().to_lowercase())
            .or_default()
            .extend(outcomes);
    }

    /// Makes every call take `delay` before answering.
    pub fn set_delay(&self, delay: Duration) {
        self.state.lock().delay = Some(delay);
    }

    /// Returns every mutation sent, in call order.
    pub fn calls(&self) -> Vec<Mutation> {
        self.state.lock().calls.clone()
    }

    /// Number of calls made.
    pub fn call_count(&self) -> usize {
        self.state.lock().calls.len()
    }

    /// Number of calls made for one mutation.
    pub fn calls_for(&self, id: MutationId) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|m| m.id == id)
            .count()
    }

    fn next_outcome(&self, mutation: &Mutation) -> DeliveryOutcome {
        let mut state = self.state.lock();
        state.calls.push(mutation.clone());

        let keyed = match mutation.target.natural_key() {
            Some(key) => state
                .by_key
                .get_mut(&key.to_lowercase())
                .and_then(VecDeque::pop_front),
            None => None,
        };
        if let Some(outcome) = keyed.or_else(|| state.queued.pop_front()) {
            return outcome;
        }

        let remote_id = match mutation.kind {
            MutationKind::Create => {
                state.next_id += 1;
                Some(state.next_id)
            }
            _ => mutation.target.remote_id,
        };
        DeliveryOutcome::Delivered { remote_id }
    }
}

#[async_trait]
impl RemoteClient for MockRemote {
    async fn send(&self, mutation: &Mutation) -> DeliveryOutcome {
        let delay = self.state.lock().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.next_outcome(mutation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use intake_sync_protocol::{EntityTarget, NewMutation, Payload, Rejection};
    use serde_json::json;

    fn create(email: &str) -> Mutation {
        let payload = json!({"name": "Ada", "email": email});
        NewMutation::create("candidate", payload.as_object().cloned().unwrap())
            .into_mutation(MutationId::new(), 1)
    }

    #[tokio::test]
    async fn mock_assigns_ids_to_creates() {
        let remote = MockRemote::new();
        assert_eq!(
            remote.send(&create("a@x.com")).await,
            DeliveryOutcome::Delivered { remote_id: Some(1) }
        );
        assert_eq!(
            remote.send(&create("b@x.com")).await,
            DeliveryOutcome::Delivered { remote_id: Some(2) }
        );

        let delete = NewMutation::delete("candidate", EntityTarget::by_remote_id(2))
            .into_mutation(MutationId::new(), 3);
        assert_eq!(
            remote.send(&delete).await,
            DeliveryOutcome::Delivered { remote_id: Some(2) }
        );
        assert_eq!(remote.call_count(), 3);
    }

    #[tokio::test]
    async fn keyed_scripts_take_precedence() {
        let remote = MockRemote::new();
        remote.push_outcome(DeliveryOutcome::transient("shared"));
        remote.script_for(
            "A@x.com",
            [DeliveryOutcome::Rejected(Rejection::unique_violation(
                "email",
                "Email already registered",
            ))],
        );

        let a = create("a@x.com");
        assert!(matches!(remote.send(&a).await, DeliveryOutcome::Rejected(_)));
        assert!(matches!(remote.send(&a).await, DeliveryOutcome::Transient { .. }));
        assert!(matches!(remote.send(&a).await, DeliveryOutcome::Delivered { .. }));
        assert_eq!(remote.calls_for(a.id), 3);
    }

    #[tokio::test]
    async fn arc_forwards() {
        let remote = Arc::new(MockRemote::new());
        let shared: Arc<dyn RemoteClient> = Arc::new(Arc::clone(&remote));
        let update = NewMutation::update("candidate", EntityTarget::by_remote_id(5), Payload::new())
            .into_mutation(MutationId::new(), 1);
        shared.send(&update).await;
        assert_eq!(remote.call_count(), 1);
    }
}
