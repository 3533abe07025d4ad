//! Request routing and error-envelope construction.

use serde_json::{json, Value};

use doip_wire::consts::*;
use doip_wire::Message;

use crate::error::DoipError;
use crate::handlers;
use crate::state::AppState;

/// Route one decoded request to its handler.
///
/// The op-code wins when it names a known operation; otherwise the first
/// metadata block carrying an `operation` string decides.
pub async fn dispatch(msg: &Message, state: &AppState) -> Result<Message, DoipError> {
    if msg.msg_type != MSG_TYPE_REQUEST {
        return Err(DoipError::Protocol(
            "only request messages are accepted".to_string(),
        ));
    }
    match resolve_op(msg) {
        Some(OP_HELLO) => handlers::handle_hello(msg, state).await,
        Some(OP_RETRIEVE) => handlers::handle_retrieve(msg, state).await,
        Some(OP_LIST_OPS) => handlers::handle_list_ops(msg, state).await,
        Some(OP_INVOKE) => handlers::handle_invoke(msg, state).await,
        _ => Err(DoipError::UnsupportedOperation(format!(
            "unsupported operation code 0x{:02x}",
            msg.op_code
        ))),
    }
}

fn resolve_op(msg: &Message) -> Option<u8> {
    if matches!(msg.op_code, OP_HELLO | OP_RETRIEVE | OP_LIST_OPS | OP_INVOKE) {
        return Some(msg.op_code);
    }
    match metadata_operation_name(msg)? {
        "hello" => Some(OP_HELLO),
        "retrieve" => Some(OP_RETRIEVE),
        "invoke" => Some(OP_INVOKE),
        "list_ops" | "list_operations" => Some(OP_LIST_OPS),
        _ => None,
    }
}

fn metadata_operation_name(msg: &Message) -> Option<&str> {
    msg.metadata
        .iter()
        .find_map(|meta| meta.get("operation").and_then(Value::as_str))
}

/// Error envelope: a single `{error, message}` metadata block, nothing else.
pub fn error_envelope(op_code: u8, object_id: &str, err: &DoipError) -> Message {
    let mut msg = Message::error(op_code, object_id);
    msg.metadata.push(json!({
        "error": err.kind(),
        "message": err.to_string(),
    }));
    msg
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::storage::MemoryStore;
    use crate::testutil::test_state;

    use super::*;

    #[tokio::test]
    async fn routes_hello_by_op_code() {
        let state = test_state(json!({}), Arc::new(MemoryStore::new("main")));
        let msg = Message::request(OP_HELLO, "");

        let response = dispatch(&msg, &state).await.unwrap();

        assert_eq!(response.msg_type, MSG_TYPE_RESPONSE);
        assert_eq!(response.op_code, OP_HELLO);
    }

    #[tokio::test]
    async fn routes_by_metadata_hint_when_op_code_is_unknown() {
        let state = test_state(json!({}), Arc::new(MemoryStore::new("main")));
        let mut msg = Message::request(0x99, "");
        msg.metadata.push(json!({"operation": "hello"}));

        let response = dispatch(&msg, &state).await.unwrap();

        assert_eq!(response.op_code, OP_HELLO);
        assert_eq!(response.metadata[0]["operation"], "hello");
    }

    #[tokio::test]
    async fn routes_list_operations_hint() {
        let state = test_state(json!({}), Arc::new(MemoryStore::new("main")));
        let mut msg = Message::request(0x00, "");
        msg.metadata.push(json!({"operation": "list_operations"}));

        let response = dispatch(&msg, &state).await.unwrap();
        assert_eq!(response.op_code, OP_LIST_OPS);
    }

    #[tokio::test]
    async fn rejects_non_request_messages() {
        let state = test_state(json!({}), Arc::new(MemoryStore::new("main")));
        let msg = Message::response(OP_HELLO, "");

        assert!(matches!(
            dispatch(&msg, &state).await,
            Err(DoipError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn rejects_unknown_operation() {
        let state = test_state(json!({}), Arc::new(MemoryStore::new("main")));
        let msg = Message::request(0x99, "Q1");

        assert!(matches!(
            dispatch(&msg, &state).await,
            Err(DoipError::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn error_envelope_carries_kind_and_message() {
        let err = DoipError::ComponentNotFound("object Q1 has no component 'x'".to_string());
        let envelope = error_envelope(OP_RETRIEVE, "Q1", &err);

        assert_eq!(envelope.msg_type, MSG_TYPE_ERROR);
        assert_eq!(envelope.op_code, OP_RETRIEVE);
        assert_eq!(envelope.object_id, "Q1");
        assert_eq!(envelope.metadata.len(), 1);
        assert_eq!(envelope.metadata[0]["error"], "ComponentNotFound");
        assert!(envelope.components.is_empty());
        assert!(envelope.workflows.is_empty());
    }
}
