//! Request flow: resolve the requester's position, then classify the text.

use crate::intent::{ClassificationResult, IntentClassifier};
use crate::location::{Coordinate, LocationResolver};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize)]
pub struct AssistantReply {
    pub location: Coordinate,
    pub classification: ClassificationResult,
}

pub struct Assistant {
    resolver: Arc<LocationResolver>,
    classifier: IntentClassifier,
}

impl Assistant {
    pub fn new(resolver: Arc<LocationResolver>, classifier: IntentClassifier) -> Self {
        Self { resolver, classifier }
    }

    pub fn resolver(&self) -> &Arc<LocationResolver> {
        &self.resolver
    }

    /// Handle one message. The location is auxiliary context only; the
    /// classification does not depend on it.
    pub async fn handle(&self, text: &str) -> AssistantReply {
        let location = self.resolver.resolve_location().await;
        let classification = self.classifier.classify(text).await;
        AssistantReply { location, classification }
    }
}
