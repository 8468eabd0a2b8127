//! Voxel spacing extraction from media API documents.
//!
//! The media endpoint has shipped several layouts over time. Spacing keys
//! (`x_pixel_spacing`, ...) may sit in `media`, `data`, `data.metadata` or at
//! the root, optionally under a `response` wrapper, and values may be
//! scalars, strings, or single-element lists.

use serde_json::Value;

use speclink_linkage::{MediaFailure, Millimeters, VoxelSpacing};

const KEYS: [&str; 3] = ["x_pixel_spacing", "y_pixel_spacing", "z_pixel_spacing"];

fn first_value(v: &Value) -> Option<Millimeters> {
    match v {
        Value::Array(items) => items.first().and_then(first_value),
        Value::Number(n) => Millimeters::parse(&n.to_string()),
        Value::String(s) => Millimeters::parse(s),
        _ => None,
    }
}

fn triple_in(obj: &Value) -> VoxelSpacing {
    let get = |key: &str| obj.get(key).and_then(first_value);
    VoxelSpacing::new(get(KEYS[0]), get(KEYS[1]), get(KEYS[2]))
}

/// Search the known locations in order. The first complete triple wins;
/// otherwise the most complete partial one (earliest on ties).
pub fn extract_voxel_spacing(doc: &Value) -> Result<VoxelSpacing, MediaFailure> {
    let root = doc.get("response").unwrap_or(doc);
    if !root.is_object() {
        return Err(MediaFailure::Malformed("expected a JSON object".into()));
    }

    let locations = [
        root.get("media"),
        root.get("data"),
        root.get("data").and_then(|d| d.get("metadata")),
        Some(root),
    ];

    let mut best = VoxelSpacing::default();
    for obj in locations.into_iter().flatten().filter(|v| v.is_object()) {
        let found = triple_in(obj);
        if found.is_complete() {
            return Ok(found);
        }
        if found.present_count() > best.present_count() {
            best = found;
        }
    }
    Ok(best)
}
