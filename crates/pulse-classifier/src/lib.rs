pub mod breaker;
pub mod classifier;
pub mod error;
pub mod openai;
pub mod retry;
pub mod service;
pub mod types;

pub use breaker::CircuitBreaker;
pub use classifier::{Classifier, RetryPolicy};
pub use error::ClassifierError;
pub use openai::OpenAiClassifier;
pub use service::{ClassificationService, DisabledClassifier};
pub use types::{ClassificationRequest, ClassificationResult};
