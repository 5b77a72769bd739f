use cloudinfo_common::bus::{CloudInfoEvent, EventEnvelope, CHANNEL_CLOUDINFO_EVENTS};
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

pub type EventHandler = Arc<dyn Fn(EventEnvelope) + Send + Sync>;

pub const EVENT_SOURCE: &str = "cloudinfo-scraper";

/// In-process publish/subscribe keyed by topic.
///
/// Each handler runs on its own task: delivery is asynchronous, at most once,
/// and a slow or panicking handler never reaches the publisher. When a Redis
/// client is attached, envelopes are mirrored to [`CHANNEL_CLOUDINFO_EVENTS`].
#[derive(Clone, Default)]
pub struct EventBus {
    handlers: Arc<RwLock<HashMap<String, Vec<EventHandler>>>>,
    redis_client: Option<redis::Client>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_redis_mirror(mut self, client: redis::Client) -> Self {
        self.redis_client = Some(client);
        self
    }

    pub fn subscribe<F>(&self, topic: &str, handler: F)
    where
        F: Fn(EventEnvelope) + Send + Sync + 'static,
    {
        match self.handlers.write() {
            Ok(mut handlers) => handlers
                .entry(topic.to_string())
                .or_default()
                .push(Arc::new(handler)),
            Err(_) => warn!(topic, "event bus registry poisoned; subscription dropped"),
        }
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.handlers
            .read()
            .map(|h| h.get(topic).map(Vec::len).unwrap_or(0))
            .unwrap_or(0)
    }

    /// Dispatches `event` to the subscribers of its topic; returns how many were notified.
    pub fn publish(&self, event: CloudInfoEvent) -> usize {
        let envelope = EventEnvelope::new(event, EVENT_SOURCE);
        let handlers: Vec<EventHandler> = self
            .handlers
            .read()
            .map(|h| h.get(&envelope.topic).cloned().unwrap_or_default())
            .unwrap_or_default();

        debug!(topic = %envelope.topic, event = envelope.event.as_str(), subscribers = handlers.len(), "publishing event");

        for handler in &handlers {
            let handler = Arc::clone(handler);
            let envelope = envelope.clone();
            tokio::spawn(async move {
                handler(envelope);
            });
        }

        if let Some(client) = self.redis_client.clone() {
            tokio::spawn(mirror_to_redis(client, envelope));
        }

        handlers.len()
    }
}

async fn mirror_to_redis(client: redis::Client, envelope: EventEnvelope) {
    let payload = match serde_json::to_string(&envelope) {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "failed to encode event envelope");
            return;
        }
    };
    match client.get_multiplexed_async_connection().await {
        Ok(mut conn) => {
            let result: redis::RedisResult<()> = conn.publish(CHANNEL_CLOUDINFO_EVENTS, payload).await;
            if let Err(e) = result {
                warn!(error = %e, topic = %envelope.topic, "failed to mirror event to redis");
            }
        }
        Err(e) => warn!(error = %e, "redis unavailable for event mirror"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudinfo_common::bus::scraping_complete_topic;
    use tokio::sync::mpsc;

    fn complete(provider: &str) -> CloudInfoEvent {
        CloudInfoEvent::ScrapingComplete {
            provider: provider.to_string(),
        }
    }

    #[tokio::test]
    async fn handlers_only_see_their_topic() {
        let bus = EventBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.subscribe(&scraping_complete_topic("amazon"), move |env| {
            let _ = tx.send(env);
        });

        assert_eq!(bus.publish(complete("google")), 0);
        assert_eq!(bus.publish(complete("amazon")), 1);

        let env = rx.recv().await.unwrap();
        assert_eq!(env.event, complete("amazon"));
        assert_eq!(env.source, EVENT_SOURCE);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn panicking_handler_does_not_reach_the_publisher() {
        let bus = EventBus::new();
        let topic = scraping_complete_topic("dummy");
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.subscribe(&topic, |_| panic!("handler failure"));
        bus.subscribe(&topic, move |env| {
            let _ = tx.send(env.topic);
        });

        assert_eq!(bus.subscriber_count(&topic), 2);
        assert_eq!(bus.publish(complete("dummy")), 2);
        assert_eq!(rx.recv().await.unwrap(), topic);
    }
}
