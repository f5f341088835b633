//! Scene export/import as an opaque byte transform.
//!
//! Export captures placements only — positions and kinds, no identities —
//! so an imported scene is re-identified by the server. Feeding the result
//! through `ReplaceAll` makes the load atomic: other participants see one
//! snapshot swap, never a half-loaded scene.

use crate::protocol::{ProtocolError, Totem, TotemSpec};

/// Serialize placed totems to bytes for export.
pub fn serialize(totems: &[Totem]) -> Result<Vec<u8>, ProtocolError> {
    let specs: Vec<TotemSpec> = totems
        .iter()
        .map(|t| TotemSpec { position: t.position, kind: t.kind })
        .collect();
    serde_json::to_vec_pretty(&specs)
        .map_err(|e| ProtocolError::SerializationError(e.to_string()))
}

/// Deserialize exported bytes back into placement requests.
pub fn deserialize(bytes: &[u8]) -> Result<Vec<TotemSpec>, ProtocolError> {
    serde_json::from_slice(bytes)
        .map_err(|e| ProtocolError::DeserializationError(e.to_string()))
}
