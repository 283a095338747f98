//! MCP Tools Handler
//!
//! Implements MCP-compliant tools/list and tools/call methods. Every tool maps
//! one-to-one onto a [`DesignCommands`] method; arguments are parsed into the
//! command's typed parameters before anything is sent to the plugin.

use crate::commands::params::*;
use crate::commands::{CommandSender, DesignCommands};
use crate::mcp::types::MCPError;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::debug;

/// Handle tools/list MCP request
///
/// Returns the complete, static tool catalog:
///
/// ```json
/// {
///   "tools": [
///     {
///       "name": "get_node_info",
///       "description": "...",
///       "inputSchema": { ... }
///     }
///   ]
/// }
/// ```
pub fn handle_tools_list(_params: Value) -> Result<Value, MCPError> {
    Ok(json!({
        "tools": get_tool_schemas()
    }))
}

/// Handle tools/call MCP request
///
/// Request format:
/// ```json
/// {
///   "name": "tool_name",
///   "arguments": { ... }
/// }
/// ```
///
/// Tool failures (bad arguments, plugin errors, timeouts) are reported as a
/// successful JSON-RPC response with `isError: true`, so the agent sees the
/// message. Only a missing or unknown tool name is a JSON-RPC error.
pub async fn handle_tools_call<S: CommandSender>(
    commands: &DesignCommands<S>,
    params: Value,
) -> Result<Value, MCPError> {
    let tool_name = params["name"]
        .as_str()
        .ok_or_else(|| MCPError::invalid_params("Missing 'name' parameter".to_string()))?;

    if !TOOL_NAMES.contains(&tool_name) {
        return Err(MCPError::invalid_params(format!(
            "Unknown tool: {}",
            tool_name
        )));
    }

    // Arguments default to an empty object when missing
    let arguments = params.get("arguments").cloned().unwrap_or(json!({}));

    match dispatch(commands, tool_name, arguments).await {
        Ok(data) => {
            let text = serde_json::to_string_pretty(&data).map_err(|e| {
                MCPError::internal_error(format!("JSON serialization failed: {}", e))
            })?;

            Ok(json!({
                "content": [{
                    "type": "text",
                    "text": text
                }],
                "isError": false
            }))
        }
        Err(e) => {
            debug!("Tool '{}' failed: {}", tool_name, e);
            Ok(json!({
                "content": [{
                    "type": "text",
                    "text": e.message
                }],
                "isError": true
            }))
        }
    }
}

fn parse_args<T: DeserializeOwned>(arguments: Value) -> Result<T, MCPError> {
    serde_json::from_value(arguments)
        .map_err(|e| MCPError::invalid_params(format!("Invalid parameters: {}", e)))
}

async fn dispatch<S: CommandSender>(
    commands: &DesignCommands<S>,
    tool_name: &str,
    arguments: Value,
) -> Result<Value, MCPError> {
    let result = match tool_name {
        // Session
        "join_channel" => commands.join_channel(&parse_args(arguments)?).await,

        // Document and selection
        "get_document_info" => commands.get_document_info().await,
        "get_selection" => commands.get_selection().await,
        "read_my_design" => commands.read_my_design().await,
        "get_node_info" => commands.get_node_info(&parse_args(arguments)?).await,
        "get_nodes_info" => commands.get_nodes_info(&parse_args(arguments)?).await,

        // Creation
        "create_rectangle" => commands.create_rectangle(&parse_args(arguments)?).await,
        "create_frame" => commands.create_frame(&parse_args(arguments)?).await,
        "create_text" => commands.create_text(&parse_args(arguments)?).await,
        "clone_node" => commands.clone_node(&parse_args(arguments)?).await,
        "create_component_instance" => {
            commands
                .create_component_instance(&parse_args(arguments)?)
                .await
        }

        // Styling and geometry
        "set_fill_color" => commands.set_fill_color(&parse_args(arguments)?).await,
        "set_stroke_color" => commands.set_stroke_color(&parse_args(arguments)?).await,
        "move_node" => commands.move_node(&parse_args(arguments)?).await,
        "resize_node" => commands.resize_node(&parse_args(arguments)?).await,
        "set_corner_radius" => commands.set_corner_radius(&parse_args(arguments)?).await,

        // Deletion
        "delete_node" => commands.delete_node(&parse_args(arguments)?).await,
        "delete_multiple_nodes" => {
            commands
                .delete_multiple_nodes(&parse_args(arguments)?)
                .await
        }

        // Text
        "set_text_content" => commands.set_text_content(&parse_args(arguments)?).await,
        "set_multiple_text_contents" => {
            commands
                .set_multiple_text_contents(&parse_args(arguments)?)
                .await
        }
        "scan_text_nodes" => commands.scan_text_nodes(&parse_args(arguments)?).await,
        "scan_nodes_by_types" => commands.scan_nodes_by_types(&parse_args(arguments)?).await,

        // Styles, components and export
        "get_styles" => commands.get_styles().await,
        "get_local_components" => commands.get_local_components().await,
        "export_node_as_image" => commands.export_node_as_image(&parse_args(arguments)?).await,

        // Auto layout
        "set_layout_mode" => commands.set_layout_mode(&parse_args(arguments)?).await,
        "set_padding" => commands.set_padding(&parse_args(arguments)?).await,
        "set_axis_align" => commands.set_axis_align(&parse_args(arguments)?).await,
        "set_layout_sizing" => commands.set_layout_sizing(&parse_args(arguments)?).await,
        "set_item_spacing" => commands.set_item_spacing(&parse_args(arguments)?).await,

        // Annotations and prototyping
        "get_annotations" => {
            let params: GetAnnotationsParams = parse_args(arguments)?;
            commands.get_annotations(&params).await
        }
        "set_annotation" => commands.set_annotation(&parse_args(arguments)?).await,
        "get_reactions" => commands.get_reactions(&parse_args(arguments)?).await,

        // Viewport and selection
        "set_focus" => commands.set_focus(&parse_args(arguments)?).await,
        "set_selections" => commands.set_selections(&parse_args(arguments)?).await,

        _ => {
            return Err(MCPError::invalid_params(format!(
                "Unknown tool: {}",
                tool_name
            )))
        }
    };

    result.map_err(MCPError::from)
}

/// Names of every tool in the catalog, in catalog order
pub const TOOL_NAMES: &[&str] = &[
    "join_channel",
    "get_document_info",
    "get_selection",
    "read_my_design",
    "get_node_info",
    "get_nodes_info",
    "create_rectangle",
    "create_frame",
    "create_text",
    "clone_node",
    "create_component_instance",
    "set_fill_color",
    "set_stroke_color",
    "move_node",
    "resize_node",
    "set_corner_radius",
    "delete_node",
    "delete_multiple_nodes",
    "set_text_content",
    "set_multiple_text_contents",
    "scan_text_nodes",
    "scan_nodes_by_types",
    "get_styles",
    "get_local_components",
    "export_node_as_image",
    "set_layout_mode",
    "set_padding",
    "set_axis_align",
    "set_layout_sizing",
    "set_item_spacing",
    "get_annotations",
    "set_annotation",
    "get_reactions",
    "set_focus",
    "set_selections",
];

fn tool(name: &str, description: &str, properties: Value, required: &[&str]) -> Value {
    json!({
        "name": name,
        "description": description,
        "inputSchema": {
            "type": "object",
            "properties": properties,
            "required": required
        }
    })
}

fn node_id(description: &str) -> Value {
    json!({
        "type": "string",
        "description": description
    })
}

fn node_ids(description: &str) -> Value {
    json!({
        "type": "array",
        "items": { "type": "string" },
        "description": description
    })
}

fn number(description: &str) -> Value {
    json!({
        "type": "number",
        "description": description
    })
}

fn string(description: &str) -> Value {
    json!({
        "type": "string",
        "description": description
    })
}

fn color(description: &str) -> Value {
    let channel = json!({ "type": "number", "minimum": 0, "maximum": 1 });
    json!({
        "type": "object",
        "description": description,
        "properties": {
            "r": channel,
            "g": channel,
            "b": channel,
            "a": channel
        },
        "required": ["r", "g", "b"]
    })
}

fn string_enum(values: &[&str], description: &str) -> Value {
    json!({
        "type": "string",
        "enum": values,
        "description": description
    })
}

const AXIS_ALIGN_VALUES: &[&str] = &["MIN", "MAX", "CENTER", "SPACE_BETWEEN", "BASELINE"];
const SIZING_VALUES: &[&str] = &["FIXED", "HUG", "FILL"];
const LAYOUT_MODE_VALUES: &[&str] = &["NONE", "HORIZONTAL", "VERTICAL"];
const LAYOUT_WRAP_VALUES: &[&str] = &["NO_WRAP", "WRAP"];

/// Generate JSON schemas for all available MCP tools
///
/// Schemas are maintained by hand so descriptions can be written for agents.
/// The order and names must match [`TOOL_NAMES`].
fn get_tool_schemas() -> Vec<Value> {
    vec![
        tool(
            "join_channel",
            "Join the channel shown in the design plugin. Required before any other tool.",
            json!({ "channel": string("Channel name to join") }),
            &["channel"],
        ),
        tool(
            "get_document_info",
            "Get information about the current document and page",
            json!({}),
            &[],
        ),
        tool(
            "get_selection",
            "Get information about the current selection",
            json!({}),
            &[],
        ),
        tool(
            "read_my_design",
            "Get detailed information about every selected node",
            json!({}),
            &[],
        ),
        tool(
            "get_node_info",
            "Get information about one node. Vector children are omitted and colours are returned as hex.",
            json!({ "nodeId": node_id("ID of the node to inspect") }),
            &["nodeId"],
        ),
        tool(
            "get_nodes_info",
            "Get information about several nodes at once",
            json!({ "nodeIds": node_ids("IDs of the nodes to inspect") }),
            &["nodeIds"],
        ),
        tool(
            "create_rectangle",
            "Create a rectangle",
            json!({
                "x": number("X position"),
                "y": number("Y position"),
                "width": number("Width"),
                "height": number("Height"),
                "name": string("Optional layer name"),
                "parentId": node_id("Optional parent node ID")
            }),
            &["x", "y", "width", "height"],
        ),
        tool(
            "create_frame",
            "Create a frame, optionally with fill, stroke and auto layout settings",
            json!({
                "x": number("X position"),
                "y": number("Y position"),
                "width": number("Width"),
                "height": number("Height"),
                "name": string("Optional layer name"),
                "parentId": node_id("Optional parent node ID"),
                "fillColor": color("Fill colour"),
                "strokeColor": color("Stroke colour"),
                "strokeWeight": number("Stroke weight"),
                "layoutMode": string_enum(LAYOUT_MODE_VALUES, "Auto layout direction"),
                "layoutWrap": string_enum(LAYOUT_WRAP_VALUES, "Whether children wrap"),
                "paddingTop": number("Top padding"),
                "paddingRight": number("Right padding"),
                "paddingBottom": number("Bottom padding"),
                "paddingLeft": number("Left padding"),
                "primaryAxisAlignItems": string_enum(AXIS_ALIGN_VALUES, "Primary axis alignment"),
                "counterAxisAlignItems": string_enum(AXIS_ALIGN_VALUES, "Counter axis alignment"),
                "layoutSizingHorizontal": string_enum(SIZING_VALUES, "Horizontal sizing"),
                "layoutSizingVertical": string_enum(SIZING_VALUES, "Vertical sizing"),
                "itemSpacing": number("Spacing between children")
            }),
            &["x", "y", "width", "height"],
        ),
        tool(
            "create_text",
            "Create a text node",
            json!({
                "x": number("X position"),
                "y": number("Y position"),
                "text": string("Text content"),
                "fontSize": number("Font size"),
                "fontWeight": number("Font weight, e.g. 400 or 700"),
                "fontColor": color("Font colour"),
                "name": string("Optional layer name"),
                "parentId": node_id("Optional parent node ID")
            }),
            &["x", "y", "text"],
        ),
        tool(
            "clone_node",
            "Clone a node, optionally moving the copy",
            json!({
                "nodeId": node_id("ID of the node to clone"),
                "x": number("Optional X position of the copy"),
                "y": number("Optional Y position of the copy")
            }),
            &["nodeId"],
        ),
        tool(
            "create_component_instance",
            "Create an instance of a component",
            json!({
                "componentKey": string("Key of the component"),
                "x": number("X position"),
                "y": number("Y position")
            }),
            &["componentKey", "x", "y"],
        ),
        tool(
            "set_fill_color",
            "Set the fill colour of a node",
            json!({
                "nodeId": node_id("ID of the node"),
                "color": color("Fill colour")
            }),
            &["nodeId", "color"],
        ),
        tool(
            "set_stroke_color",
            "Set the stroke colour and weight of a node",
            json!({
                "nodeId": node_id("ID of the node"),
                "color": color("Stroke colour"),
                "weight": number("Stroke weight")
            }),
            &["nodeId", "color"],
        ),
        tool(
            "move_node",
            "Move a node",
            json!({
                "nodeId": node_id("ID of the node"),
                "x": number("New X position"),
                "y": number("New Y position")
            }),
            &["nodeId", "x", "y"],
        ),
        tool(
            "resize_node",
            "Resize a node",
            json!({
                "nodeId": node_id("ID of the node"),
                "width": number("New width"),
                "height": number("New height")
            }),
            &["nodeId", "width", "height"],
        ),
        tool(
            "set_corner_radius",
            "Set the corner radius of a node",
            json!({
                "nodeId": node_id("ID of the node"),
                "radius": number("Corner radius"),
                "corners": {
                    "type": "array",
                    "items": { "type": "boolean" },
                    "minItems": 4,
                    "maxItems": 4,
                    "description": "Corners to round: top-left, top-right, bottom-right, bottom-left"
                }
            }),
            &["nodeId", "radius"],
        ),
        tool(
            "delete_node",
            "Delete a node",
            json!({ "nodeId": node_id("ID of the node to delete") }),
            &["nodeId"],
        ),
        tool(
            "delete_multiple_nodes",
            "Delete several nodes at once",
            json!({ "nodeIds": node_ids("IDs of the nodes to delete") }),
            &["nodeIds"],
        ),
        tool(
            "set_text_content",
            "Replace the text of a text node",
            json!({
                "nodeId": node_id("ID of the text node"),
                "text": string("New text")
            }),
            &["nodeId", "text"],
        ),
        tool(
            "set_multiple_text_contents",
            "Replace the text of several text nodes below a parent in one call",
            json!({
                "nodeId": node_id("ID of the parent node"),
                "text": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "nodeId": node_id("ID of the text node"),
                            "text": string("New text")
                        },
                        "required": ["nodeId", "text"]
                    },
                    "description": "Replacements to apply"
                }
            }),
            &["nodeId", "text"],
        ),
        tool(
            "scan_text_nodes",
            "Find every text node below a node. Large subtrees are scanned in chunks.",
            json!({
                "nodeId": node_id("ID of the node to scan"),
                "useChunking": { "type": "boolean", "description": "Scan in chunks (default true)" },
                "chunkSize": { "type": "integer", "minimum": 1, "description": "Nodes per chunk (default 10)" }
            }),
            &["nodeId"],
        ),
        tool(
            "scan_nodes_by_types",
            "Find nodes of the given types below a node",
            json!({
                "nodeId": node_id("ID of the node to scan"),
                "types": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Node types to find, e.g. [\"COMPONENT\", \"FRAME\"]"
                }
            }),
            &["nodeId", "types"],
        ),
        tool(
            "get_styles",
            "Get all local styles of the document",
            json!({}),
            &[],
        ),
        tool(
            "get_local_components",
            "Get all local components of the document",
            json!({}),
            &[],
        ),
        tool(
            "export_node_as_image",
            "Export a node as an image",
            json!({
                "nodeId": node_id("ID of the node to export"),
                "format": string_enum(&["PNG", "JPG", "SVG", "PDF"], "Export format (default PNG)"),
                "scale": number("Export scale (default 1)")
            }),
            &["nodeId"],
        ),
        tool(
            "set_layout_mode",
            "Set the auto layout direction of a frame",
            json!({
                "nodeId": node_id("ID of the frame"),
                "layoutMode": string_enum(LAYOUT_MODE_VALUES, "Auto layout direction"),
                "layoutWrap": string_enum(LAYOUT_WRAP_VALUES, "Whether children wrap")
            }),
            &["nodeId", "layoutMode"],
        ),
        tool(
            "set_padding",
            "Set the auto layout padding of a frame",
            json!({
                "nodeId": node_id("ID of the frame"),
                "paddingTop": number("Top padding"),
                "paddingRight": number("Right padding"),
                "paddingBottom": number("Bottom padding"),
                "paddingLeft": number("Left padding")
            }),
            &["nodeId"],
        ),
        tool(
            "set_axis_align",
            "Set the auto layout alignment of a frame",
            json!({
                "nodeId": node_id("ID of the frame"),
                "primaryAxisAlignItems": string_enum(AXIS_ALIGN_VALUES, "Primary axis alignment"),
                "counterAxisAlignItems": string_enum(AXIS_ALIGN_VALUES, "Counter axis alignment")
            }),
            &["nodeId"],
        ),
        tool(
            "set_layout_sizing",
            "Set the auto layout sizing of a frame",
            json!({
                "nodeId": node_id("ID of the frame"),
                "layoutSizingHorizontal": string_enum(SIZING_VALUES, "Horizontal sizing"),
                "layoutSizingVertical": string_enum(SIZING_VALUES, "Vertical sizing")
            }),
            &["nodeId"],
        ),
        tool(
            "set_item_spacing",
            "Set the spacing between auto layout children",
            json!({
                "nodeId": node_id("ID of the frame"),
                "itemSpacing": number("Spacing between children")
            }),
            &["nodeId", "itemSpacing"],
        ),
        tool(
            "get_annotations",
            "Get annotations of a node, or of the whole page when no node is given",
            json!({
                "nodeId": node_id("Optional ID of the node"),
                "includeCategories": { "type": "boolean", "description": "Include annotation categories (default true)" }
            }),
            &[],
        ),
        tool(
            "set_annotation",
            "Create or update an annotation",
            json!({
                "nodeId": node_id("ID of the annotated node"),
                "annotationId": string("ID of the annotation to update; omit to create"),
                "labelMarkdown": string("Annotation text in markdown"),
                "categoryId": string("Optional category ID"),
                "properties": {
                    "type": "array",
                    "items": { "type": "object" },
                    "description": "Optional annotation properties"
                }
            }),
            &["nodeId", "labelMarkdown"],
        ),
        tool(
            "get_reactions",
            "Get the prototype reactions of nodes",
            json!({ "nodeIds": node_ids("IDs of the nodes") }),
            &["nodeIds"],
        ),
        tool(
            "set_focus",
            "Select a node and scroll the viewport to it",
            json!({ "nodeId": node_id("ID of the node to focus") }),
            &["nodeId"],
        ),
        tool(
            "set_selections",
            "Select several nodes and scroll the viewport to them",
            json!({ "nodeIds": node_ids("IDs of the nodes to select") }),
            &["nodeIds"],
        ),
    ]
}

// Include tests
#[cfg(test)]
#[path = "tools_test.rs"]
mod tools_test;
