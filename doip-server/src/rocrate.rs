//! RO-Crate assembly: wraps an object's distribution download into a
//! minimal crate archive. Isolated helper; retrieval falls back to it when
//! no pre-built crate component is stored.

use std::io::{Cursor, Write};

use bytes::Bytes;
use serde_json::{json, Value};
use tracing::{debug, info};
use zip::write::FileOptions;
use zip::ZipWriter;

use crate::error::DoipError;

/// Build a crate archive from the first `profile.distribution[].contentUrl`
/// named in the manifest. Empty bytes when no URL resolves.
pub async fn build_from_manifest(
    manifest: &Value,
    http: &reqwest::Client,
) -> Result<Bytes, DoipError> {
    let Some(url) = first_distribution_url(manifest) else {
        debug!("manifest names no distribution URL; returning empty crate");
        return Ok(Bytes::new());
    };
    info!(url = %url, "assembling RO-Crate from distribution");
    let response = http.get(url).send().await.map_err(crate::error::from_reqwest)?;
    let response = response
        .error_for_status()
        .map_err(|err| DoipError::Storage(format!("distribution download failed: {err}")))?;
    let payload = response.bytes().await.map_err(crate::error::from_reqwest)?;

    let file_name = url
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .unwrap_or("distribution.bin")
        .to_string();
    assemble(&file_name, &payload)
        .map_err(|err| DoipError::Storage(format!("ro-crate assembly failed: {err}")))
}

fn first_distribution_url(manifest: &Value) -> Option<&str> {
    manifest
        .pointer("/profile/distribution")?
        .as_array()?
        .iter()
        .find_map(|entry| entry.get("contentUrl").and_then(Value::as_str))
}

fn assemble(file_name: &str, payload: &[u8]) -> zip::result::ZipResult<Bytes> {
    let descriptor = json!({
        "@context": "https://w3id.org/ro/crate/1.1/context",
        "@graph": [
            {"@id": "ro-crate-metadata.json", "@type": "CreativeWork", "about": {"@id": "./"}},
            {"@id": "./", "@type": "Dataset", "hasPart": [{"@id": file_name}]},
            {"@id": file_name, "@type": "File"},
        ],
    });
    let descriptor_bytes = descriptor.to_string().into_bytes();

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default();
    writer.start_file("ro-crate-metadata.json", options)?;
    writer.write_all(&descriptor_bytes)?;
    writer.start_file(file_name, options)?;
    writer.write_all(payload)?;
    let cursor = writer.finish()?;
    Ok(Bytes::from(cursor.into_inner()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembled_archive_is_a_zip() {
        let archive = assemble("data.csv", b"a,b\n1,2\n").unwrap();
        assert!(archive.starts_with(b"PK"));
    }

    #[test]
    fn distribution_url_resolution() {
        let manifest = json!({
            "profile": {"distribution": [
                {"name": "no url here"},
                {"contentUrl": "https://example.test/data.csv"},
            ]}
        });
        assert_eq!(
            first_distribution_url(&manifest),
            Some("https://example.test/data.csv")
        );
        assert_eq!(first_distribution_url(&json!({})), None);
        assert_eq!(
            first_distribution_url(&json!({"profile": {"distribution": []}})),
            None
        );
    }

    #[tokio::test]
    async fn missing_distribution_yields_empty_bytes() {
        let http = reqwest::Client::new();
        let archive = build_from_manifest(&json!({}), &http).await.unwrap();
        assert!(archive.is_empty());
    }
}
