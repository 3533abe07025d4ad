//! Per-operation business logic behind the dispatcher.

use bytes::Bytes;
use serde_json::{json, Value};
use tracing::info;

use doip_wire::consts::*;
use doip_wire::shard;
use doip_wire::{ComponentBlock, Message};

use crate::error::DoipError;
use crate::registry::store_error;
use crate::rocrate;
use crate::state::AppState;
use crate::workflows;

const SERVER_NAME: &str = "mardi_doip_server";

fn available_operations() -> Value {
    json!({
        "hello": OP_HELLO,
        "retrieve": OP_RETRIEVE,
        "list_ops": OP_LIST_OPS,
        "invoke": OP_INVOKE,
    })
}

/// Health check; never fails.
pub async fn handle_hello(msg: &Message, _state: &AppState) -> Result<Message, DoipError> {
    info!(object_id = %msg.object_id, "handling hello request");
    let mut response = Message::response(OP_HELLO, msg.object_id.clone());
    response.metadata.push(json!({
        "operation": "hello",
        "status": "ok",
        "server": SERVER_NAME,
        "version": DOIP_VERSION,
        "availableOperations": available_operations(),
    }));
    Ok(response)
}

/// Operation discovery; never fails.
pub async fn handle_list_ops(msg: &Message, _state: &AppState) -> Result<Message, DoipError> {
    info!(object_id = %msg.object_id, "handling list_ops request");
    let mut response = Message::response(OP_LIST_OPS, msg.object_id.clone());
    response.metadata.push(json!({
        "operation": "list_operations",
        "availableOperations": available_operations(),
    }));
    Ok(response)
}

/// Retrieve the manifest, a named component, or the RO-Crate archive.
pub async fn handle_retrieve(msg: &Message, state: &AppState) -> Result<Message, DoipError> {
    let object_id = msg.object_id.to_uppercase();
    shard::base_identifier(&object_id)?;
    let element = first_metadata_str(msg, "element");
    info!(
        object_id = %object_id,
        element = element.as_deref().unwrap_or("<manifest>"),
        "handling retrieve request"
    );

    let mut response = Message::response(OP_RETRIEVE, object_id.clone());
    match element.as_deref() {
        Some("rocrate") => {
            let content = rocrate_payload(&object_id, state).await?;
            response
                .components
                .push(ComponentBlock::new("rocrate", "application/zip", content));
        }
        Some(component_id) => {
            let (record, content) = state.registry.get_component(&object_id, component_id).await?;
            response
                .components
                .push(ComponentBlock::new(record.component_id, record.media_type, content));
        }
        None => {
            let manifest = state.registry.fetch(&object_id).await?;
            response.metadata.push(manifest);
        }
    }
    Ok(response)
}

/// Run a named workflow and return its derived components.
pub async fn handle_invoke(msg: &Message, state: &AppState) -> Result<Message, DoipError> {
    let object_id = msg.object_id.to_uppercase();
    shard::base_identifier(&object_id)?;
    let (workflow, params) = requested_workflow(msg)?;
    info!(object_id = %object_id, workflow = %workflow, "handling invoke request");
    if workflow != "equation_extraction" {
        return Err(DoipError::UnsupportedOperation(format!(
            "unsupported workflow {workflow}"
        )));
    }

    let result = workflows::run_equation_extraction(&object_id, &params, state).await?;

    let mut response = Message::response(OP_INVOKE, object_id.clone());
    for entry in result
        .get("derivedComponents")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
    {
        let Some(component_id) = entry.get("componentId").and_then(Value::as_str) else {
            continue;
        };
        let media_type = entry
            .get("mediaType")
            .and_then(Value::as_str)
            .filter(|v| !v.is_empty())
            .unwrap_or(DEFAULT_MEDIA_TYPE);
        let extension = shard::extension_for_media_type(media_type).unwrap_or("bin");
        let key = shard::component_path(&object_id, component_id, extension)?;
        let content = state.store.get(&key).await.map_err(store_error)?;
        response
            .components
            .push(ComponentBlock::new(component_id, media_type, content));
    }
    response.metadata.push(json!({
        "operation": "invoke",
        "workflow": workflow,
        "result": result,
    }));
    response.workflows.push(result);
    Ok(response)
}

/// Stored RO-Crate component, or one assembled from the first distribution
/// URL named in the manifest. Empty bytes when no URL resolves.
async fn rocrate_payload(object_id: &str, state: &AppState) -> Result<Bytes, DoipError> {
    match state.registry.get_component(object_id, "rocrate").await {
        Ok((_, content)) => Ok(content),
        Err(DoipError::ComponentNotFound(_)) => {
            let manifest = state.registry.fetch(object_id).await?;
            rocrate::build_from_manifest(&manifest, &state.http).await
        }
        Err(err) => Err(err),
    }
}

fn first_metadata_str(msg: &Message, key: &str) -> Option<String> {
    msg.metadata
        .iter()
        .find_map(|meta| meta.get(key).and_then(Value::as_str))
        .map(str::to_string)
}

fn requested_workflow(msg: &Message) -> Result<(String, Value), DoipError> {
    for block in msg.metadata.iter().chain(msg.workflows.iter()) {
        if let Some(name) = block.get("workflow").and_then(Value::as_str) {
            let params = block.get("params").cloned().unwrap_or_else(|| json!({}));
            return Ok((name.to_string(), params));
        }
    }
    Err(DoipError::Protocol(
        "workflow not specified in invoke request".to_string(),
    ))
}
