//! Mock client for development and tests: canned responses, no sockets.

use std::collections::HashMap;

use serde_json::{json, Value};

/// Lightweight fake DOIP client for callers that want to exercise their own
/// plumbing without a server. Canned responses are keyed by operation name;
/// anything unset falls back to a minimal well-formed answer.
#[derive(Debug, Clone, Default)]
pub struct MockDoipClient {
    responses: HashMap<String, Value>,
}

impl MockDoipClient {
    pub fn new(responses: HashMap<String, Value>) -> Self {
        Self { responses }
    }

    pub fn with_response(mut self, operation: impl Into<String>, response: Value) -> Self {
        self.responses.insert(operation.into(), response);
        self
    }

    pub fn hello(&self) -> Value {
        self.responses.get("hello").cloned().unwrap_or_else(|| {
            json!({
                "operation": "hello",
                "status": "ok",
                "server": "mock_doip_client",
            })
        })
    }

    pub fn retrieve(&self, object_id: &str) -> Value {
        self.responses.get("retrieve").cloned().unwrap_or_else(|| {
            json!({
                "operation": "retrieve",
                "objectId": object_id,
                "components": [],
            })
        })
    }

    pub fn invoke(&self, object_id: &str, workflow: &str, params: Option<Value>) -> Value {
        self.responses.get("invoke").cloned().unwrap_or_else(|| {
            json!({
                "operation": "invoke",
                "objectId": object_id,
                "workflow": workflow,
                "params": params.unwrap_or_else(|| json!({})),
                "result": {},
            })
        })
    }
}
