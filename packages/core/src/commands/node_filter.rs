//! Node Filtering
//!
//! Document nodes returned by the plugin carry editor-internal data (variable
//! bindings, image hashes, vector geometry) that is noise to an agent. The
//! filter keeps a fixed set of fields, converts paint colours to hex and
//! drops vector nodes entirely, recursively through `children`.

use serde_json::{Map, Value};

/// Node type that is dropped with its whole subtree
pub const VECTOR_NODE_TYPE: &str = "VECTOR";

/// Keys removed from every fill, stroke and gradient stop
const STRIPPED_PAINT_KEYS: &[&str] = &["boundVariables", "imageRef"];

/// Typography keys kept from a text node's `style`
const KEPT_STYLE_KEYS: &[&str] = &[
    "fontFamily",
    "fontStyle",
    "fontWeight",
    "fontSize",
    "textAlignHorizontal",
    "letterSpacing",
    "lineHeightPx",
];

/// Filter one node and its descendants
///
/// Returns `None` for vector nodes and for anything that is not an object.
pub fn filter_node(node: &Value) -> Option<Value> {
    let node = node.as_object()?;
    if node.get("type").and_then(Value::as_str) == Some(VECTOR_NODE_TYPE) {
        return None;
    }

    let mut filtered = Map::new();
    for key in ["id", "name", "type"] {
        if let Some(value) = node.get(key) {
            filtered.insert(key.to_string(), value.clone());
        }
    }

    for key in ["fills", "strokes"] {
        if let Some(paints) = node.get(key).and_then(Value::as_array) {
            if !paints.is_empty() {
                let paints = paints.iter().map(filter_paint).collect();
                filtered.insert(key.to_string(), Value::Array(paints));
            }
        }
    }

    for key in ["cornerRadius", "absoluteBoundingBox"] {
        if let Some(value) = node.get(key).filter(|v| !v.is_null()) {
            filtered.insert(key.to_string(), value.clone());
        }
    }

    if let Some(characters) = node
        .get("characters")
        .and_then(Value::as_str)
        .filter(|c| !c.is_empty())
    {
        filtered.insert("characters".to_string(), Value::String(characters.to_string()));
    }

    if let Some(style) = node.get("style").and_then(Value::as_object) {
        let style: Map<String, Value> = KEPT_STYLE_KEYS
            .iter()
            .filter_map(|key| style.get(*key).map(|v| (key.to_string(), v.clone())))
            .collect();
        filtered.insert("style".to_string(), Value::Object(style));
    }

    if let Some(children) = node.get("children").and_then(Value::as_array) {
        let children = children.iter().filter_map(filter_node).collect();
        filtered.insert("children".to_string(), Value::Array(children));
    }

    Some(Value::Object(filtered))
}

/// Filter a node-info reply
///
/// Replies come either as the node itself or wrapped as `{"document": node}`.
/// A reply that filters to nothing (a vector) becomes `null`.
pub fn filter_node_reply(reply: &Value) -> Value {
    let node = reply.get("document").unwrap_or(reply);
    filter_node(node).unwrap_or(Value::Null)
}

fn filter_paint(paint: &Value) -> Value {
    let Some(paint) = paint.as_object() else {
        return paint.clone();
    };

    let mut paint = paint.clone();
    for key in STRIPPED_PAINT_KEYS {
        paint.remove(*key);
    }

    if let Some(stops) = paint.get_mut("gradientStops").and_then(Value::as_array_mut) {
        for stop in stops.iter_mut().filter_map(Value::as_object_mut) {
            stop.remove("boundVariables");
            if let Some(color) = stop.get("color").and_then(rgba_to_hex) {
                stop.insert("color".to_string(), Value::String(color));
            }
        }
    }

    if let Some(color) = paint.get("color").and_then(rgba_to_hex) {
        paint.insert("color".to_string(), Value::String(color));
    }

    Value::Object(paint)
}

/// Convert a `{r, g, b, a}` colour with unit-range channels to `#rrggbb[aa]`
///
/// Alpha is appended only when it is not fully opaque. A string that already
/// starts with `#` is passed through unchanged.
pub fn rgba_to_hex(color: &Value) -> Option<String> {
    if let Some(hex) = color.as_str() {
        return hex.starts_with('#').then(|| hex.to_string());
    }

    let color = color.as_object()?;
    let channel = |key: &str| color.get(key).and_then(Value::as_f64);
    let (r, g, b) = (channel("r")?, channel("g")?, channel("b")?);
    let a = channel("a").unwrap_or(1.0);

    let mut hex = format!("#{:02x}{:02x}{:02x}", to_byte(r), to_byte(g), to_byte(b));
    if a < 1.0 {
        hex.push_str(&format!("{:02x}", to_byte(a)));
    }
    Some(hex)
}

fn to_byte(unit: f64) -> u8 {
    (unit.clamp(0.0, 1.0) * 255.0).round() as u8
}
