//! Seams over the network collaborators, so runs can be driven by fakes.

use async_trait::async_trait;
use pulse_classifier::{ClassificationRequest, ClassificationResult, Classifier, ClassifierError};
use pulse_core::TrackingTarget;
use pulse_scraper::{FetchError, RawContent, SourceFetcher};

#[async_trait]
pub trait ContentSource: Send + Sync {
    /// One fetch attempt; the orchestrator owns retrying.
    async fn fetch(&self, target: &TrackingTarget) -> Result<RawContent, FetchError>;
}

#[async_trait]
impl ContentSource for SourceFetcher {
    async fn fetch(&self, target: &TrackingTarget) -> Result<RawContent, FetchError> {
        SourceFetcher::fetch(self, target).await
    }
}

#[async_trait]
pub trait ChangeClassifier: Send + Sync {
    /// Classify a diff, retries included.
    async fn classify(
        &self,
        request: &ClassificationRequest,
    ) -> Result<ClassificationResult, ClassifierError>;
}

#[async_trait]
impl ChangeClassifier for Classifier {
    async fn classify(
        &self,
        request: &ClassificationRequest,
    ) -> Result<ClassificationResult, ClassifierError> {
        Classifier::classify(self, request).await
    }
}
