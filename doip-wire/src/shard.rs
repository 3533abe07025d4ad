//! Sharded object-key derivation for blob storage.
//!
//! The 2-2-2 scheme keeps object listings manageable while staying a pure
//! function of the identifier: `Q123` shards to `00/01/23/Q123`. Component
//! keys extend the prefix with `components/<id>[.<ext>]`; the storage client
//! prepends the branch.

/// Identifier violations detected during key derivation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShardError {
    #[error("identifier must start with 'Q'")]
    MissingPrefix,
    #[error("identifier has no digits after 'Q'")]
    MissingDigits,
}

/// Leading `Q<digits>` run of an identifier, upper-cased.
///
/// Anything after the digit run is a routing suffix and is dropped.
pub fn base_identifier(identifier: &str) -> Result<String, ShardError> {
    let normalized = identifier.to_uppercase();
    let rest = normalized.strip_prefix('Q').ok_or(ShardError::MissingPrefix)?;
    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return Err(ShardError::MissingDigits);
    }
    Ok(format!("Q{digits}"))
}

/// Sharded directory prefix `pp/qq/rr/Q<digits>` with digits zero-padded to
/// at least six characters.
pub fn shard_prefix(identifier: &str) -> Result<String, ShardError> {
    let base = base_identifier(identifier)?;
    let padded = format!("{:0>6}", &base[1..]);
    Ok(format!(
        "{}/{}/{}/{}",
        &padded[0..2],
        &padded[2..4],
        &padded[4..6],
        base
    ))
}

/// Branch-relative key of one component, `<shard>/components/<id>[.<ext>]`.
///
/// An empty extension yields a name without a trailing dot.
pub fn component_path(
    identifier: &str,
    component_id: &str,
    extension: &str,
) -> Result<String, ShardError> {
    let ext = extension.trim_start_matches('.');
    let prefix = shard_prefix(identifier)?;
    Ok(if ext.is_empty() {
        format!("{prefix}/components/{component_id}")
    } else {
        format!("{prefix}/components/{component_id}.{ext}")
    })
}

/// File extension for the handful of media types the portal stores.
pub fn extension_for_media_type(media_type: &str) -> Option<&'static str> {
    match media_type {
        "application/pdf" => Some("pdf"),
        "image/png" => Some("png"),
        "image/jpeg" => Some("jpg"),
        "image/svg+xml" => Some("svg"),
        "application/json" => Some("json"),
        _ => None,
    }
}
