use super::{LanguageOracle, OracleError, OracleRequest};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Caps the number of outstanding oracle calls across every pipeline.
pub struct BoundedOracle {
    inner: Arc<dyn LanguageOracle>,
    permits: Semaphore,
}

impl BoundedOracle {
    pub fn new(inner: Arc<dyn LanguageOracle>, max_outstanding: usize) -> Self {
        Self {
            inner,
            permits: Semaphore::new(max_outstanding.max(1)),
        }
    }
}

#[async_trait]
impl LanguageOracle for BoundedOracle {
    async fn complete(&self, request: &OracleRequest) -> Result<Value, OracleError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| OracleError::Unavailable(e.to_string()))?;
        self.inner.complete(request).await
    }
}
