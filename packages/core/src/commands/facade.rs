//! Design Commands
//!
//! Every method packages its arguments into the plugin's parameter object,
//! sends it through the [`CommandSender`] and returns the reply. Transport
//! errors propagate unchanged; only node-info replies are post-processed.

use super::node_filter::filter_node_reply;
use super::params::*;
use super::CommandSender;
use crate::transport::Result;
use futures_util::future::try_join_all;
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, instrument};

/// Timeout window for commands that walk large subtrees or render images
pub const LONG_RUNNING_TIMEOUT: Duration = Duration::from_secs(60);

/// Typed access to the design plugin
#[derive(Debug, Clone)]
pub struct DesignCommands<S> {
    sender: S,
}

impl<S: CommandSender> DesignCommands<S> {
    pub fn new(sender: S) -> Self {
        Self { sender }
    }

    pub fn sender(&self) -> &S {
        &self.sender
    }

    async fn call<P: Serialize + ?Sized>(
        &self,
        command: &str,
        params: &P,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let params = serde_json::to_value(params)?;
        self.sender.send_command(command, params, timeout).await
    }

    async fn call_bare(&self, command: &str) -> Result<Value> {
        self.sender.send_command(command, json!({}), None).await
    }

    // Document and selection

    pub async fn get_document_info(&self) -> Result<Value> {
        self.call_bare("get_document_info").await
    }

    pub async fn get_selection(&self) -> Result<Value> {
        self.call_bare("get_selection").await
    }

    /// Detailed info on every selected node
    pub async fn read_my_design(&self) -> Result<Value> {
        self.call_bare("read_my_design").await
    }

    /// Info on one node, filtered
    #[instrument(skip(self), fields(node_id = %params.node_id))]
    pub async fn get_node_info(&self, params: &NodeParams) -> Result<Value> {
        let reply = self.call("get_node_info", params, None).await?;
        Ok(filter_node_reply(&reply))
    }

    /// Info on several nodes, fetched concurrently and filtered
    ///
    /// Nodes that filter to nothing (vectors) are left out of the result.
    /// Fails with the first error if any lookup fails.
    pub async fn get_nodes_info(&self, params: &NodeIdsParams) -> Result<Value> {
        let lookups = params
            .node_ids
            .iter()
            .map(|id| self.get_node_info_raw(id.clone()));
        let replies = try_join_all(lookups).await?;

        let nodes: Vec<Value> = replies
            .iter()
            .map(filter_node_reply)
            .filter(|node| !node.is_null())
            .collect();
        debug!(
            "Fetched {} node(s), {} after filtering",
            params.node_ids.len(),
            nodes.len()
        );
        Ok(Value::Array(nodes))
    }

    async fn get_node_info_raw(&self, node_id: NodeId) -> Result<Value> {
        self.call("get_node_info", &NodeParams { node_id }, None)
            .await
    }

    // Creation

    pub async fn create_rectangle(&self, params: &CreateRectangleParams) -> Result<Value> {
        self.call("create_rectangle", params, None).await
    }

    pub async fn create_frame(&self, params: &CreateFrameParams) -> Result<Value> {
        self.call("create_frame", params, None).await
    }

    pub async fn create_text(&self, params: &CreateTextParams) -> Result<Value> {
        self.call("create_text", params, None).await
    }

    pub async fn clone_node(&self, params: &CloneNodeParams) -> Result<Value> {
        self.call("clone_node", params, None).await
    }

    pub async fn create_component_instance(
        &self,
        params: &ComponentInstanceParams,
    ) -> Result<Value> {
        self.call("create_component_instance", params, None).await
    }

    // Styling and geometry

    pub async fn set_fill_color(&self, params: &FillColorParams) -> Result<Value> {
        self.call("set_fill_color", params, None).await
    }

    pub async fn set_stroke_color(&self, params: &StrokeColorParams) -> Result<Value> {
        self.call("set_stroke_color", params, None).await
    }

    pub async fn move_node(&self, params: &MoveNodeParams) -> Result<Value> {
        self.call("move_node", params, None).await
    }

    pub async fn resize_node(&self, params: &ResizeNodeParams) -> Result<Value> {
        self.call("resize_node", params, None).await
    }

    pub async fn set_corner_radius(&self, params: &CornerRadiusParams) -> Result<Value> {
        self.call("set_corner_radius", params, None).await
    }

    // Deletion

    pub async fn delete_node(&self, params: &NodeParams) -> Result<Value> {
        self.call("delete_node", params, None).await
    }

    pub async fn delete_multiple_nodes(&self, params: &NodeIdsParams) -> Result<Value> {
        self.call("delete_multiple_nodes", params, Some(LONG_RUNNING_TIMEOUT))
            .await
    }

    // Text

    pub async fn set_text_content(&self, params: &TextContentParams) -> Result<Value> {
        self.call("set_text_content", params, None).await
    }

    pub async fn set_multiple_text_contents(
        &self,
        params: &MultipleTextContentsParams,
    ) -> Result<Value> {
        self.call(
            "set_multiple_text_contents",
            params,
            Some(LONG_RUNNING_TIMEOUT),
        )
        .await
    }

    pub async fn scan_text_nodes(&self, params: &ScanTextNodesParams) -> Result<Value> {
        self.call("scan_text_nodes", params, Some(LONG_RUNNING_TIMEOUT))
            .await
    }

    pub async fn scan_nodes_by_types(&self, params: &ScanNodesByTypesParams) -> Result<Value> {
        self.call("scan_nodes_by_types", params, Some(LONG_RUNNING_TIMEOUT))
            .await
    }

    // Styles, components and export

    pub async fn get_styles(&self) -> Result<Value> {
        self.call_bare("get_styles").await
    }

    pub async fn get_local_components(&self) -> Result<Value> {
        self.call_bare("get_local_components").await
    }

    pub async fn export_node_as_image(&self, params: &ExportImageParams) -> Result<Value> {
        self.call("export_node_as_image", params, Some(LONG_RUNNING_TIMEOUT))
            .await
    }

    // Auto layout

    pub async fn set_layout_mode(&self, params: &LayoutModeParams) -> Result<Value> {
        self.call("set_layout_mode", params, None).await
    }

    pub async fn set_padding(&self, params: &PaddingParams) -> Result<Value> {
        self.call("set_padding", params, None).await
    }

    pub async fn set_axis_align(&self, params: &AxisAlignParams) -> Result<Value> {
        self.call("set_axis_align", params, None).await
    }

    pub async fn set_layout_sizing(&self, params: &LayoutSizingParams) -> Result<Value> {
        self.call("set_layout_sizing", params, None).await
    }

    pub async fn set_item_spacing(&self, params: &ItemSpacingParams) -> Result<Value> {
        self.call("set_item_spacing", params, None).await
    }

    // Annotations and prototyping

    pub async fn get_annotations(&self, params: &GetAnnotationsParams) -> Result<Value> {
        self.call("get_annotations", params, None).await
    }

    pub async fn set_annotation(&self, params: &SetAnnotationParams) -> Result<Value> {
        self.call("set_annotation", params, None).await
    }

    pub async fn get_reactions(&self, params: &NodeIdsParams) -> Result<Value> {
        self.call("get_reactions", params, Some(LONG_RUNNING_TIMEOUT))
            .await
    }

    // Viewport and selection

    pub async fn set_focus(&self, params: &NodeParams) -> Result<Value> {
        self.call("set_focus", params, None).await
    }

    pub async fn set_selections(&self, params: &NodeIdsParams) -> Result<Value> {
        self.call("set_selections", params, None).await
    }

    // Session

    /// Join a channel; every other command requires one
    #[instrument(skip(self))]
    pub async fn join_channel(&self, params: &JoinChannelParams) -> Result<Value> {
        self.sender.join_channel(&params.channel).await?;
        Ok(json!({
            "channel": params.channel,
            "joined": true
        }))
    }
}

#[cfg(test)]
#[path = "facade_test.rs"]
mod facade_test;
