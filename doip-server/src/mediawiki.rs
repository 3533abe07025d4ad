//! Best-effort MediaWiki/Wikibase item creation for workflow outputs.
//!
//! The portal treats item creation as advisory: a failed call is logged and
//! the workflow continues with a synthesized item id.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::json;
use tracing::{debug, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

static ITEM_SEQ: AtomicU64 = AtomicU64::new(0);

/// Create a Wikibase item describing an extracted equation.
pub async fn create_equation_item(
    http: &reqwest::Client,
    api_url: &str,
    source_id: &str,
    latex: &str,
) -> String {
    let payload = json!({
        "labels": {"en": {"language": "en", "value": format!("Equation from {source_id}")}},
        "claims": [
            {"property": "P123", "value": source_id},
            {"property": "P999", "value": latex},
        ],
        "metadata": {"source": source_id},
    });
    let result = http
        .post(api_url)
        .query(&[("action", "wbeditentity"), ("format", "json"), ("new", "item")])
        .json(&payload)
        .timeout(REQUEST_TIMEOUT)
        .send()
        .await;
    match result {
        Ok(response) => debug!(status = %response.status(), "mediawiki item submitted"),
        Err(err) => warn!(error = %err, "mediawiki item creation failed"),
    }
    synthesize_item_id()
}

/// Pseudo item id; the real portal assigns ids server-side.
fn synthesize_item_id() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let seq = ITEM_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("Q{now}{seq:04}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthesized_ids_are_unique_and_well_formed() {
        let a = synthesize_item_id();
        let b = synthesize_item_id();
        assert_ne!(a, b);
        assert!(a.starts_with('Q'));
        assert!(a[1..].chars().all(|c| c.is_ascii_digit()));
    }
}
