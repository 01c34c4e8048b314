use async_trait::async_trait;

use crate::error::ClassifierError;
use crate::types::{ClassificationRequest, ClassificationResult};

/// One call to an external classification service. No retry, no state
/// carried between calls.
#[async_trait]
pub trait ClassificationService: Send + Sync {
    async fn classify_once(
        &self,
        request: &ClassificationRequest,
    ) -> Result<ClassificationResult, ClassifierError>;
}

/// Stand-in used when no API key is configured. Every change then degrades
/// to `unclassified`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledClassifier;

#[async_trait]
impl ClassificationService for DisabledClassifier {
    async fn classify_once(
        &self,
        _request: &ClassificationRequest,
    ) -> Result<ClassificationResult, ClassifierError> {
        Err(ClassifierError::NotConfigured)
    }
}
