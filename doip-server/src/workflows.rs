//! Workflow execution for the invoke operation.
//!
//! Only equation extraction is wired up, and the extraction itself is the
//! stub the portal ships: fixed records standing in for the real extractor.
//! The storage writes and the item creation are real.

use bytes::Bytes;
use serde_json::{json, Value};
use tracing::info;

use doip_wire::shard;

use crate::error::DoipError;
use crate::mediawiki;
use crate::registry::store_error;
use crate::state::AppState;

/// Extract equations from an object's source component, store the derived
/// JSON component, and register an item for the result.
pub async fn run_equation_extraction(
    object_id: &str,
    params: &Value,
    state: &AppState,
) -> Result<Value, DoipError> {
    let source_component = params
        .get("componentId")
        .and_then(Value::as_str)
        .unwrap_or("primary");
    let (_, source_bytes) = state
        .registry
        .get_component(object_id, source_component)
        .await?;

    let equations = extract_equations(&source_bytes);
    let equations_json =
        serde_json::to_vec(&equations).map_err(|err| DoipError::Storage(err.to_string()))?;
    let size = equations_json.len();

    let derived_id = format!("doip:bitstream/{object_id}/equations-json");
    let key = shard::component_path(object_id, &derived_id, "json")?;
    let stored_key = state
        .store
        .put(&key, Bytes::from(equations_json), "application/json")
        .await
        .map_err(store_error)?;
    info!(object_id = %object_id, key = %stored_key, "stored derived equations component");

    let latex = equations
        .iter()
        .filter_map(|eq| eq.get("latex").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join("; ");
    let created_item =
        mediawiki::create_equation_item(&state.http, &state.config.mediawiki_api, object_id, &latex)
            .await;

    Ok(json!({
        "workflow": "equation_extraction",
        "sourceObject": object_id,
        "derivedComponents": [
            {
                "componentId": derived_id,
                "mediaType": "application/json",
                "s3Key": stored_key,
                "size": size,
            }
        ],
        "createdItems": [created_item],
    }))
}

fn extract_equations(_source: &[u8]) -> Vec<Value> {
    vec![
        json!({"page": 1, "latex": "E=mc^2"}),
        json!({"page": 2, "latex": "\\\\int_a^b f(x) dx"}),
    ]
}
