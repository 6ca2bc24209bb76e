//! The closed set of export formats the engine can produce.

use serde::{Deserialize, Serialize};

/// A recognized export format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// glTF binary container.
    Glb,
    Fbx,
    Stl,
    Usd,
    Obj,
    Ply,
}

/// Formats the pinned engine version cannot export reliably.
///
/// Requests for these are skipped without invoking the engine.
pub const UNSUPPORTED_FORMATS: &[ExportFormat] = &[ExportFormat::Obj];

/// Content type used for anything without a table entry.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

impl ExportFormat {
    /// Every recognized format.
    pub const ALL: [ExportFormat; 6] = [
        ExportFormat::Glb,
        ExportFormat::Fbx,
        ExportFormat::Stl,
        ExportFormat::Usd,
        ExportFormat::Obj,
        ExportFormat::Ply,
    ];

    /// Look up a format by its id. Matching is case-insensitive.
    pub fn from_id(id: &str) -> Option<Self> {
        let id = id.trim();
        Self::ALL
            .into_iter()
            .find(|format| format.id().eq_ignore_ascii_case(id))
    }

    pub fn id(self) -> &'static str {
        match self {
            ExportFormat::Glb => "glb",
            ExportFormat::Fbx => "fbx",
            ExportFormat::Stl => "stl",
            ExportFormat::Usd => "usd",
            ExportFormat::Obj => "obj",
            ExportFormat::Ply => "ply",
        }
    }

    /// File extension of the produced file.
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Usd => "usdc",
            other => other.id(),
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            ExportFormat::Glb => "model/gltf-binary",
            ExportFormat::Stl => "model/stl",
            ExportFormat::Obj => "model/obj",
            ExportFormat::Usd => "model/vnd.usd",
            ExportFormat::Fbx | ExportFormat::Ply => DEFAULT_CONTENT_TYPE,
        }
    }

    pub fn is_supported(self) -> bool {
        !UNSUPPORTED_FORMATS.contains(&self)
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// Content type for a raw format id, falling back to generic binary.
pub fn content_type_for(format_id: &str) -> &'static str {
    ExportFormat::from_id(format_id)
        .map(ExportFormat::content_type)
        .unwrap_or(DEFAULT_CONTENT_TYPE)
}

/// File extension for a raw format id.
///
/// Unknown ids keep only ASCII alphanumerics so they are safe in paths and
/// object keys.
pub fn extension_for(format_id: &str) -> String {
    match ExportFormat::from_id(format_id) {
        Some(format) => format.extension().to_string(),
        None => {
            let cleaned = sanitize_id(format_id);
            if cleaned.is_empty() {
                "bin".to_string()
            } else {
                cleaned
            }
        }
    }
}

/// Lowercased ASCII-alphanumeric form of a format id.
pub fn sanitize_id(format_id: &str) -> String {
    format_id
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}
