//! Media filters attached to a publisher's output.

use super::MediaBinding;
use crate::errors::SfuError;
use crate::media::{ElementId, ErrorClassifier};
use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct Filter {
    pub id: String,
    pub filter_type: String,
    pub options: Value,
    element: ElementId,
}

impl Filter {
    pub fn element(&self) -> &ElementId {
        &self.element
    }
}

/// Filters of one publisher, keyed by filter id.
#[derive(Default)]
pub struct FilterSet {
    filters: DashMap<String, Filter>,
}

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<Filter> {
        self.filters.get(id).map(|f| f.value().clone())
    }

    /// Build a filter in the publisher's pipeline and feed it the publisher's
    /// output.
    ///
    /// # Errors
    ///
    /// `EndpointCreation` if the node cannot build the filter,
    /// `MediaNegotiation` if it cannot be connected.
    pub async fn attach(
        &self,
        publisher: &MediaBinding,
        filter_type: &str,
        options: Value,
    ) -> Result<String, SfuError> {
        let engine = publisher.engine();
        let element = engine
            .create_filter(&publisher.pipeline, filter_type, &options)
            .await
            .map_err(|e| SfuError::EndpointCreation(e.to_string()))?;

        if let Err(e) = engine.connect(&publisher.element, &element).await {
            if let Err(release_err) = engine.release(&element).await {
                debug!(target: "sfu.endpoint.filter", error = %release_err, "Failed to release unconnected filter");
            }
            return Err(SfuError::MediaNegotiation(e.to_string()));
        }

        let id = uuid::Uuid::new_v4().to_string();
        info!(
            target: "sfu.endpoint.filter",
            filter_id = %id,
            filter_type,
            publisher = %publisher.element,
            "Filter attached"
        );
        self.filters.insert(
            id.clone(),
            Filter {
                id: id.clone(),
                filter_type: filter_type.to_string(),
                options,
                element,
            },
        );
        Ok(id)
    }

    /// Remove a filter. Returns `false` if it was already gone.
    pub async fn detach(
        &self,
        publisher: &MediaBinding,
        id: &str,
        classifier: &ErrorClassifier,
    ) -> bool {
        let Some((_, filter)) = self.filters.remove(id) else {
            return false;
        };
        release_filter(publisher, &filter, classifier).await;
        true
    }

    /// Remove every filter. Used on publisher teardown.
    pub async fn detach_all(&self, publisher: &MediaBinding, classifier: &ErrorClassifier) {
        let ids: Vec<String> = self.filters.iter().map(|f| f.key().clone()).collect();
        for id in ids {
            self.detach(publisher, &id, classifier).await;
        }
    }
}

async fn release_filter(publisher: &MediaBinding, filter: &Filter, classifier: &ErrorClassifier) {
    let engine = publisher.engine();
    if let Err(e) = engine.disconnect(&publisher.element, &filter.element).await {
        if !classifier.is_benign(&e) {
            warn!(target: "sfu.endpoint.filter", filter_id = %filter.id, error = %e, "Failed to disconnect filter");
        }
    }
    match engine.release(&filter.element).await {
        Ok(()) => info!(target: "sfu.endpoint.filter", filter_id = %filter.id, "Filter detached"),
        Err(e) if classifier.is_benign(&e) => {
            debug!(target: "sfu.endpoint.filter", filter_id = %filter.id, "Filter element was already released");
        }
        Err(e) => {
            warn!(target: "sfu.endpoint.filter", filter_id = %filter.id, error = %e, "Failed to release filter");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::cluster::MediaNode;
    use crate::media::mock::{ElementKind, MockMediaEngine};
    use crate::media::{MediaEngine, MediaEngineError};
    use common::types::NodeId;
    use std::sync::Arc;

    async fn publisher(engine: &Arc<MockMediaEngine>) -> MediaBinding {
        let node = Arc::new(MediaNode::new(NodeId::new("kms_A"), "ws://a", engine.clone()));
        let pipeline = engine.create_pipeline().await.unwrap();
        let element = engine.create_webrtc_endpoint(&pipeline).await.unwrap();
        MediaBinding {
            epoch: node.epoch(),
            node,
            pipeline,
            element,
        }
    }

    #[tokio::test]
    async fn test_attach_connects_filter_to_publisher() {
        let engine = Arc::new(MockMediaEngine::new());
        let binding = publisher(&engine).await;
        let filters = FilterSet::new();

        let id = filters
            .attach(&binding, "GStreamerFilter", serde_json::json!({"command": "videoflip"}))
            .await
            .unwrap();

        let filter = filters.get(&id).unwrap();
        assert_eq!(filter.filter_type, "GStreamerFilter");
        assert!(engine.is_connected(&binding.element, filter.element()));
        assert_eq!(engine.live_count(ElementKind::Filter), 1);
    }

    #[tokio::test]
    async fn test_second_detach_is_noop() {
        let engine = Arc::new(MockMediaEngine::new());
        let binding = publisher(&engine).await;
        let filters = FilterSet::new();
        let classifier = ErrorClassifier::default();
        let id = filters
            .attach(&binding, "FaceOverlayFilter", Value::Null)
            .await
            .unwrap();

        assert!(filters.detach(&binding, &id, &classifier).await);
        assert!(!filters.detach(&binding, &id, &classifier).await);
        assert_eq!(engine.live_count(ElementKind::Filter), 0);
    }

    #[tokio::test]
    async fn test_connect_failure_releases_filter() {
        let engine = Arc::new(MockMediaEngine::new());
        let binding = publisher(&engine).await;
        engine.fail_connect(Some(MediaEngineError::Server {
            code: 40002,
            message: "incompatible".to_string(),
        }));
        let filters = FilterSet::new();

        let result = filters.attach(&binding, "ZBarFilter", Value::Null).await;
        assert!(matches!(result, Err(SfuError::MediaNegotiation(_))));
        assert!(filters.is_empty());
        assert_eq!(engine.live_count(ElementKind::Filter), 0);
    }

    #[tokio::test]
    async fn test_detach_all() {
        let engine = Arc::new(MockMediaEngine::new());
        let binding = publisher(&engine).await;
        let filters = FilterSet::new();
        filters.attach(&binding, "A", Value::Null).await.unwrap();
        filters.attach(&binding, "B", Value::Null).await.unwrap();

        filters.detach_all(&binding, &ErrorClassifier::default()).await;
        assert!(filters.is_empty());
        assert_eq!(engine.live_count(ElementKind::Filter), 0);
    }
}
