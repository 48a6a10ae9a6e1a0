use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::{BridgeError, Result};

/// "Thinking" broadcast payload. A missing or empty `id` addresses every
/// instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThinkingSignal {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub value: bool,
}

impl ThinkingSignal {
    /// A signal for the instance with the given id only.
    pub fn to(id: impl Into<String>, value: bool) -> Self {
        Self {
            id: Some(id.into()),
            value,
        }
    }

    /// A signal without an id, delivered to every subscriber.
    pub fn everyone(value: bool) -> Self {
        Self { id: None, value }
    }

    fn addresses(&self, instance_id: &str) -> bool {
        match self.id.as_deref() {
            None | Some("") => true,
            Some(id) => id == instance_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(bool) + Send + Sync>;

struct Subscriber {
    id: SubscriptionId,
    instance_id: String,
    handler: Handler,
}

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    entries: Vec<Subscriber>,
}

/// Page-scoped publish/subscribe channel for thinking signals, filtered per
/// instance identifier.
#[derive(Clone, Default)]
pub struct ThinkingChannel {
    subscribers: Arc<Mutex<Subscribers>>,
}

impl ThinkingChannel {
    /// A channel with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls `handler` with the value of every signal addressed to
    /// `instance_id`.
    pub fn subscribe<F>(&self, instance_id: impl Into<String>, handler: F) -> Result<SubscriptionId>
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let mut subscribers = self.lock()?;
        subscribers.next_id += 1;
        let id = SubscriptionId(subscribers.next_id);
        subscribers.entries.push(Subscriber {
            id,
            instance_id: instance_id.into(),
            handler: Arc::new(handler),
        });
        Ok(id)
    }

    /// Returns `false` when the subscription was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<bool> {
        let mut subscribers = self.lock()?;
        let before = subscribers.entries.len();
        subscribers.entries.retain(|s| s.id != id);
        Ok(subscribers.entries.len() != before)
    }

    /// Delivers `signal` to the subscribers it addresses and returns how many
    /// received it.
    pub fn publish(&self, signal: &ThinkingSignal) -> Result<usize> {
        let handlers: Vec<Handler> = self
            .lock()?
            .entries
            .iter()
            .filter(|s| signal.addresses(&s.instance_id))
            .map(|s| s.handler.clone())
            .collect();

        for handler in &handlers {
            handler(signal.value);
        }
        Ok(handlers.len())
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.lock().map(|s| s.entries.len()).unwrap_or(0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Subscribers>> {
        self.subscribers
            .lock()
            .map_err(|_| BridgeError::Poisoned("thinking channel"))
    }
}

impl std::fmt::Debug for ThinkingChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThinkingChannel")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder(channel: &ThinkingChannel, id: &str) -> (SubscriptionId, Arc<Mutex<Vec<bool>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let sub = channel
            .subscribe(id, move |value| sink.lock().unwrap().push(value))
            .unwrap();
        (sub, seen)
    }

    #[test]
    fn addressed_signals_skip_other_instances() {
        let channel = ThinkingChannel::new();
        let (_, a) = recorder(&channel, "a");
        let (_, b) = recorder(&channel, "b");

        assert_eq!(channel.publish(&ThinkingSignal::to("a", true)).unwrap(), 1);

        assert_eq!(*a.lock().unwrap(), vec![true]);
        assert!(b.lock().unwrap().is_empty());
    }

    #[test]
    fn unaddressed_signals_reach_everyone() {
        let channel = ThinkingChannel::new();
        let (_, a) = recorder(&channel, "a");
        let (_, b) = recorder(&channel, "b");

        channel.publish(&ThinkingSignal::everyone(true)).unwrap();
        channel
            .publish(&ThinkingSignal {
                id: Some(String::new()),
                value: false,
            })
            .unwrap();

        assert_eq!(*a.lock().unwrap(), vec![true, false]);
        assert_eq!(*b.lock().unwrap(), vec![true, false]);
    }

    #[test]
    fn unsubscribed_handlers_stop_receiving() {
        let channel = ThinkingChannel::new();
        let (sub, seen) = recorder(&channel, "a");
        assert!(channel.unsubscribe(sub).unwrap());
        assert!(!channel.unsubscribe(sub).unwrap());

        assert_eq!(channel.publish(&ThinkingSignal::to("a", true)).unwrap(), 0);
        assert!(seen.lock().unwrap().is_empty());
    }
}
