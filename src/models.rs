// SPDX-License-Identifier: MIT
//! JSON bodies of the broker API.
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterRequest {
    pub board_id: String,
    /// Must not be empty.
    pub node_ids: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterAssignment {
    pub node_id: String,
    pub cluster_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterResponse {
    pub assignments: Vec<ClusterAssignment>,
    pub embeddings_ms: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutlineStyle {
    Concise,
    Detailed,
}

impl OutlineStyle {
    pub fn as_str(self) -> &'static str {
        match self {
            OutlineStyle::Concise => "concise",
            OutlineStyle::Detailed => "detailed",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutlineRequest {
    pub board_id: String,
    pub cluster_id: String,
    #[serde(default)]
    pub style: Option<OutlineStyle>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutlineNode {
    pub title: String,
    pub x: f64,
    pub y: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutlineResponse {
    pub outline_nodes: Vec<OutlineNode>,
    pub latency_ms: u64,
}
