//! JSON-segment compat framing and its bridge onto the DOIP dispatcher.
//!
//! The framing is a stream of `u32 length | bytes` segments terminated by a
//! zero-length segment. Only segment 0 is interpreted; it must be a JSON
//! object naming a target and an operation. Responses mirror the shape:
//! segment 0 is a status object, component bytes follow one segment each.

use bytes::Bytes;
use serde_json::{json, Map, Value};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use doip_wire::consts::*;
use doip_wire::Message;

use crate::dispatch;
use crate::state::AppState;

/// Read length-prefixed segments up to the zero-length terminator.
pub async fn read_segments<S>(stream: &mut S) -> std::io::Result<Vec<Vec<u8>>>
where
    S: AsyncRead + Unpin,
{
    let mut segments = Vec::new();
    loop {
        let mut len_bytes = [0u8; 4];
        stream.read_exact(&mut len_bytes).await?;
        let len = u32::from_be_bytes(len_bytes) as usize;
        if len == 0 {
            break;
        }
        let mut data = vec![0u8; len];
        stream.read_exact(&mut data).await?;
        segments.push(data);
    }
    Ok(segments)
}

/// Write segments followed by the zero-length terminator.
pub async fn write_segments<S>(stream: &mut S, segments: &[Bytes]) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    for segment in segments {
        let len = u32::try_from(segment.len()).map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, "segment too large")
        })?;
        stream.write_all(&len.to_be_bytes()).await?;
        stream.write_all(segment).await?;
    }
    stream.write_all(&0u32.to_be_bytes()).await?;
    stream.flush().await
}

/// Translate segment 0, run it through the shared dispatcher, and encode
/// the response segments.
pub async fn process_request(body: &Map<String, Value>, state: &AppState) -> Vec<Bytes> {
    let Some(msg) = translate_request(body) else {
        let operation = request_operation(body).cloned().unwrap_or(Value::Null);
        return vec![json_segment(&json!({
            "status": "error",
            "message": format!("Unsupported operation {operation}"),
        }))];
    };
    match dispatch::dispatch(&msg, state).await {
        Ok(response) => encode_response(&response),
        Err(err) => vec![json_segment(&json!({
            "status": "error",
            "message": err.to_string(),
        }))],
    }
}

fn request_operation(body: &Map<String, Value>) -> Option<&Value> {
    body.get("operationId").or_else(|| body.get("operation_id"))
}

/// Map a compat request onto an internal DOIP request message.
///
/// Returns `None` for an operation outside the supported set.
pub fn translate_request(body: &Map<String, Value>) -> Option<Message> {
    let target = body
        .get("targetId")
        .or_else(|| body.get("target_id"))
        .and_then(Value::as_str)
        .unwrap_or("");
    let attributes = body.get("attributes").and_then(Value::as_object);
    let op_code = resolve_operation(request_operation(body)?)?;

    let mut msg = Message::request(op_code, target);
    match op_code {
        OP_HELLO => msg.metadata.push(json!({"operation": "hello"})),
        OP_LIST_OPS => msg.metadata.push(json!({"operation": "list_operations"})),
        OP_RETRIEVE => {
            // Handlers read "element"; componentId is the doipy spelling.
            let element = attributes
                .and_then(|a| a.get("element").or_else(|| a.get("componentId")))
                .and_then(Value::as_str);
            if let Some(element) = element {
                msg.metadata.push(json!({"element": element}));
            }
        }
        OP_INVOKE => {
            let workflow = attributes
                .and_then(|a| a.get("workflow"))
                .or_else(|| body.get("workflow"))
                .and_then(Value::as_str)
                .unwrap_or("equation_extraction");
            let params = attributes
                .and_then(|a| a.get("params"))
                .or_else(|| body.get("params"))
                .cloned()
                .unwrap_or_else(|| json!({}));
            msg.metadata.push(json!({"workflow": workflow, "params": params}));
        }
        _ => return None,
    }
    Some(msg)
}

fn resolve_operation(operation: &Value) -> Option<u8> {
    if let Some(code) = operation.as_u64() {
        return match code {
            1 => Some(OP_HELLO),
            2 => Some(OP_RETRIEVE),
            4 => Some(OP_LIST_OPS),
            5 => Some(OP_INVOKE),
            _ => None,
        };
    }
    match operation.as_str()? {
        "HELLO" | "hello" => Some(OP_HELLO),
        "RETRIEVE" | "retrieve" => Some(OP_RETRIEVE),
        "LIST_OPS" | "list_ops" | "list_operations" => Some(OP_LIST_OPS),
        "INVOKE" | "invoke" => Some(OP_INVOKE),
        _ => None,
    }
}

/// Status segment plus one segment per component, in response order.
pub fn encode_response(msg: &Message) -> Vec<Bytes> {
    let mut status = json!({
        "status": "success",
        "metadata": &msg.metadata,
    });
    if let Some(first) = msg.components.first() {
        status["attributes"] = json!({"filename": first.component_id});
    }
    let mut segments = vec![json_segment(&status)];
    segments.extend(msg.components.iter().map(|c| c.content.clone()));
    segments
}

fn json_segment(value: &Value) -> Bytes {
    serde_json::to_vec(value).unwrap_or_default().into()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use doip_wire::ComponentBlock;

    use crate::storage::MemoryStore;
    use crate::testutil::test_state;

    use super::*;

    fn body(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn translates_hello_with_empty_target() {
        let msg = translate_request(&body(json!({"operationId": 1}))).unwrap();
        assert_eq!(msg.msg_type, MSG_TYPE_REQUEST);
        assert_eq!(msg.op_code, OP_HELLO);
        assert_eq!(msg.object_id, "");
        assert_eq!(msg.metadata, vec![json!({"operation": "hello"})]);
    }

    #[test]
    fn translates_retrieve_element() {
        let msg = translate_request(&body(json!({
            "targetId": "Q123",
            "operationId": 2,
            "attributes": {"element": "primary"},
        })))
        .unwrap();
        assert_eq!(msg.op_code, OP_RETRIEVE);
        assert_eq!(msg.object_id, "Q123");
        assert_eq!(msg.metadata, vec![json!({"element": "primary"})]);
    }

    #[test]
    fn translates_retrieve_component_id_spelling() {
        let msg = translate_request(&body(json!({
            "target_id": "Q123",
            "operation_id": "RETRIEVE",
            "attributes": {"componentId": "primary"},
        })))
        .unwrap();
        assert_eq!(msg.metadata, vec![json!({"element": "primary"})]);
    }

    #[test]
    fn translates_retrieve_without_element() {
        let msg = translate_request(&body(json!({
            "targetId": "Q123",
            "operationId": "retrieve",
        })))
        .unwrap();
        assert!(msg.metadata.is_empty());
    }

    #[test]
    fn translates_invoke_with_defaults() {
        let msg = translate_request(&body(json!({
            "targetId": "Q123",
            "operationId": 5,
        })))
        .unwrap();
        assert_eq!(msg.op_code, OP_INVOKE);
        assert_eq!(
            msg.metadata,
            vec![json!({"workflow": "equation_extraction", "params": {}})]
        );
    }

    #[test]
    fn translates_invoke_passthroughs() {
        let msg = translate_request(&body(json!({
            "targetId": "Q123",
            "operationId": "INVOKE",
            "workflow": "equation_extraction",
            "params": {"componentId": "primary"},
        })))
        .unwrap();
        assert_eq!(
            msg.metadata,
            vec![json!({"workflow": "equation_extraction", "params": {"componentId": "primary"}})]
        );
    }

    #[test]
    fn integer_four_is_list_ops() {
        let msg = translate_request(&body(json!({"operationId": 4}))).unwrap();
        assert_eq!(msg.op_code, OP_LIST_OPS);
        let msg = translate_request(&body(json!({"operationId": "list_operations"}))).unwrap();
        assert_eq!(msg.op_code, OP_LIST_OPS);
    }

    #[test]
    fn unknown_operation_is_rejected() {
        assert!(translate_request(&body(json!({"operationId": 9}))).is_none());
        assert!(translate_request(&body(json!({"operationId": "purge"}))).is_none());
        assert!(translate_request(&body(json!({"targetId": "Q1"}))).is_none());
    }

    #[test]
    fn response_with_components_sets_filename() {
        let mut msg = Message::response(OP_RETRIEVE, "Q123");
        msg.components
            .push(ComponentBlock::new("primary", "application/pdf", &b"data"[..]));
        msg.components
            .push(ComponentBlock::new("figure", "image/png", &b"png"[..]));

        let segments = encode_response(&msg);

        assert_eq!(segments.len(), 3);
        let status: Value = serde_json::from_slice(&segments[0]).unwrap();
        assert_eq!(status["status"], "success");
        assert_eq!(status["attributes"]["filename"], "primary");
        assert_eq!(segments[1], Bytes::from_static(b"data"));
        assert_eq!(segments[2], Bytes::from_static(b"png"));
    }

    #[test]
    fn response_without_components_has_single_segment() {
        let mut msg = Message::response(OP_HELLO, "");
        msg.metadata.push(json!({"operation": "hello", "status": "ok"}));

        let segments = encode_response(&msg);

        assert_eq!(segments.len(), 1);
        let status: Value = serde_json::from_slice(&segments[0]).unwrap();
        assert_eq!(status["metadata"][0]["operation"], "hello");
        assert!(status.get("attributes").is_none());
    }

    #[tokio::test]
    async fn process_request_reports_unsupported_operation() {
        let state = test_state(json!({}), Arc::new(MemoryStore::new("main")));
        let segments = process_request(&body(json!({"operationId": 9})), &state).await;

        assert_eq!(segments.len(), 1);
        let status: Value = serde_json::from_slice(&segments[0]).unwrap();
        assert_eq!(status["status"], "error");
    }

    #[tokio::test]
    async fn process_request_surfaces_handler_errors() {
        let state = test_state(
            json!({"kernel": {"fdo:hasComponent": []}}),
            Arc::new(MemoryStore::new("main")),
        );
        let segments = process_request(
            &body(json!({
                "targetId": "Q123",
                "operationId": 2,
                "attributes": {"element": "nope"},
            })),
            &state,
        )
        .await;

        let status: Value = serde_json::from_slice(&segments[0]).unwrap();
        assert_eq!(status["status"], "error");
        assert!(status["message"].as_str().unwrap().contains("nope"));
    }

    #[tokio::test]
    async fn segment_round_trip() {
        let segments = vec![Bytes::from_static(b"{\"a\":1}"), Bytes::from_static(b"raw")];
        let mut wire = Vec::new();
        write_segments(&mut wire, &segments).await.unwrap();

        let mut reader = &wire[..];
        let read = read_segments(&mut reader).await.unwrap();
        assert_eq!(read, vec![b"{\"a\":1}".to_vec(), b"raw".to_vec()]);
    }
}
