//! A backend that replays canned responses, for exercising callers without a
//! provider.

use crate::backend::{LlmBackend, LlmBackendFactory, LlmProvider, LlmRequest, LlmResponse};
use crate::error::LlmError;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct Script {
    responses: VecDeque<Result<LlmResponse, LlmError>>,
    requests: Vec<LlmRequest>,
    api_keys: Vec<String>,
}

/// Returns queued responses in order and records every request.
///
/// Once the queue is empty it answers with an echo of the last user message.
#[derive(Debug, Clone)]
pub struct ScriptedBackend {
    provider: LlmProvider,
    script: Arc<Mutex<Script>>,
}

impl ScriptedBackend {
    #[must_use]
    pub fn new(provider: LlmProvider) -> Self {
        Self {
            provider,
            script: Arc::new(Mutex::new(Script::default())),
        }
    }

    /// Queues a response.
    #[must_use]
    pub fn then(self, response: Result<LlmResponse, LlmError>) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.responses.push_back(response);
        }
        self
    }

    /// Requests received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<LlmRequest> {
        self.script
            .lock()
            .map(|s| s.requests.clone())
            .unwrap_or_default()
    }

    /// API keys the factory was asked to bind.
    #[must_use]
    pub fn api_keys(&self) -> Vec<String> {
        self.script
            .lock()
            .map(|s| s.api_keys.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl LlmBackend for ScriptedBackend {
    async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let mut script = self.script.lock().map_err(|_| LlmError::RequestFailed {
            reason: "script lock poisoned".to_string(),
        })?;
        script.requests.push(request.clone());
        script.responses.pop_front().unwrap_or_else(|| {
            let last = request
                .messages
                .iter()
                .rev()
                .find(|m| m.role == crate::backend::MessageRole::User)
                .map(|m| m.content.clone())
                .unwrap_or_default();
            Ok(LlmResponse::text(&request.model, format!("echo: {last}")))
        })
    }

    fn provider(&self) -> LlmProvider {
        self.provider
    }
}

impl LlmBackendFactory for ScriptedBackend {
    fn backend(&self, _provider: LlmProvider, api_key: &str) -> Arc<dyn LlmBackend> {
        if let Ok(mut script) = self.script.lock() {
            script.api_keys.push(api_key.to_string());
        }
        Arc::new(self.clone())
    }
}
