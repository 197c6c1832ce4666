//! Scripted provider shared by the layer tests.

use deckflow_core::error::FlowError;
use deckflow_core::provider::Provider;
use deckflow_core::types::*;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Plays back a fixed list of outcomes, then keeps succeeding with "done".
#[derive(Debug)]
pub struct ScriptedProvider {
    info: Arc<ProviderInfo>,
    script: Mutex<VecDeque<Result<String, FlowError>>>,
    delay: Option<Duration>,
    calls: AtomicU32,
}

impl ScriptedProvider {
    pub fn new(script: Vec<Result<&str, FlowError>>) -> Self {
        Self {
            info: Arc::new(ProviderInfo {
                id: "scripted".to_string(),
                name: "Scripted".to_string(),
                endpoint: "mem://scripted".to_string(),
            }),
            script: Mutex::new(script.into_iter().map(|r| r.map(str::to_string)).collect()),
            delay: None,
            calls: AtomicU32::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn info(&self) -> Arc<ProviderInfo> {
        self.info.clone()
    }

    async fn complete(&self, req: CompletionRequest) -> Result<CompletionResponse, FlowError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.script.lock().pop_front();
        let content = next.unwrap_or_else(|| Ok("done".to_string()))?;
        Ok(CompletionResponse::new("scripted-1", req.model, content))
    }
}
