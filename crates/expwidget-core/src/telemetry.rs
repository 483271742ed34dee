//! Impression and click reporting.

use crate::creative::CreativeId;
use crate::tracker::ImpressionSink;
use crate::transport::{creative_payload, Endpoints, Transport};
use futures::task::{LocalSpawn, LocalSpawnExt};
use tracing::{debug, warn};

/// Posts qualified impressions to the hit endpoint in the background.
///
/// Failures are logged and never retried.
#[derive(Debug, Clone)]
pub struct ImpressionSender<T, Sp> {
    transport: T,
    spawner: Sp,
    endpoints: Endpoints,
}

impl<T, Sp> ImpressionSender<T, Sp> {
    /// Create a sender.
    pub const fn new(transport: T, spawner: Sp, endpoints: Endpoints) -> Self {
        Self {
            transport,
            spawner,
            endpoints,
        }
    }
}

impl<T, Sp> ImpressionSink for ImpressionSender<T, Sp>
where
    T: Transport + Clone + 'static,
    Sp: LocalSpawn,
{
    fn send_impression(&self, creative_id: &CreativeId) {
        let transport = self.transport.clone();
        let path = self.endpoints.hit();
        let body = creative_payload(creative_id);
        let creative_id = creative_id.clone();

        let spawned = self.spawner.spawn_local(async move {
            match transport.post(&path, &body).await {
                Ok(_) => debug!(creative_id = %creative_id, "impression recorded"),
                Err(err) => warn!(creative_id = %creative_id, error = %err, "impression request failed"),
            }
        });
        if let Err(err) = spawned {
            warn!(error = %err, "could not schedule impression request");
        }
    }
}

/// Fire-and-forget click reporting. Every click is sent; there is no dedup.
#[derive(Debug, Clone)]
pub struct ClickReporter<T> {
    transport: T,
    endpoints: Endpoints,
}

impl<T: Transport> ClickReporter<T> {
    /// Create a reporter.
    pub const fn new(transport: T, endpoints: Endpoints) -> Self {
        Self {
            transport,
            endpoints,
        }
    }

    /// Send a click for `creative_id`. Returns whether the request was queued.
    pub fn track(&self, creative_id: &CreativeId) -> bool {
        let queued = self
            .transport
            .send_fire_and_forget(&self.endpoints.click(), &creative_payload(creative_id));
        if queued {
            debug!(creative_id = %creative_id, "click queued");
        } else {
            warn!(creative_id = %creative_id, "click could not be queued");
        }
        queued
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportError;
    use crate::testing::ScriptedTransport;
    use futures::executor::LocalPool;
    use serde_json::json;

    #[test]
    fn test_impression_posts_canonical_id() {
        let mut pool = LocalPool::new();
        let transport = ScriptedTransport::new();
        let sender = ImpressionSender::new(transport.clone(), pool.spawner(), Endpoints::new("exp"));

        sender.send_impression(&CreativeId::parse("100"));
        assert!(transport.posts().is_empty());
        pool.run_until_stalled();

        assert_eq!(
            transport.posts(),
            vec![("/experiments/exp/hit".to_string(), json!({"creative_id": 100}))]
        );
    }

    #[test]
    fn test_impression_failure_is_swallowed() {
        let mut pool = LocalPool::new();
        let transport = ScriptedTransport::new();
        transport.fail_posts(TransportError::Network("offline".into()));
        let sender = ImpressionSender::new(transport.clone(), pool.spawner(), Endpoints::new("exp"));

        sender.send_impression(&CreativeId::from(1i64));
        pool.run_until_stalled();
        assert_eq!(transport.posts().len(), 1);
    }

    #[test]
    fn test_clicks_are_not_deduplicated() {
        let transport = ScriptedTransport::new();
        let clicks = ClickReporter::new(transport.clone(), Endpoints::new("exp"));

        assert!(clicks.track(&CreativeId::parse("b")));
        assert!(clicks.track(&CreativeId::parse("b")));
        assert_eq!(
            transport.beacons(),
            vec![
                ("/experiments/exp/click".to_string(), json!({"creative_id": "b"})),
                ("/experiments/exp/click".to_string(), json!({"creative_id": "b"})),
            ]
        );
    }

    #[test]
    fn test_rejected_beacon_reported() {
        let transport = ScriptedTransport::new();
        transport.reject_beacons();
        let clicks = ClickReporter::new(transport, Endpoints::new("exp"));
        assert!(!clicks.track(&CreativeId::from(3i64)));
    }
}
