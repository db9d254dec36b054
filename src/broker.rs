// SPDX-License-Identifier: MIT
//! Placeholder clustering and outlining.
//!
//! Deterministic stand-ins for model calls. Only the mocked latencies are
//! random; assignments and outlines depend on the input alone.
use std::ops::RangeInclusive;

use rand::Rng;

use crate::models::{ClusterAssignment, OutlineNode};

pub const MIN_CLUSTERS: usize = 2;
pub const MAX_CLUSTERS: usize = 4;
pub const OUTLINE_LEN: usize = 4;

pub const EMBEDDING_LATENCY_MS: RangeInclusive<u64> = 420..=860;
pub const OUTLINE_LATENCY_MS: RangeInclusive<u64> = 800..=1500;

const OUTLINE_ORIGIN: (f64, f64) = (320.0, -120.0);
const OUTLINE_SPACING: f64 = 120.0;

/// Synthetic token usage of one call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Usage {
    pub tokens_in: u64,
    pub tokens_out: u64,
}

/// Number of groups for `node_count` items: a third of them, kept in `2..=4`.
pub fn cluster_count(node_count: usize) -> usize {
    (node_count / 3).clamp(MIN_CLUSTERS, MAX_CLUSTERS)
}

/// Assign `node_ids[i]` to `cluster-{i mod k}`.
pub fn assign_clusters(node_ids: &[String]) -> Vec<ClusterAssignment> {
    let k = cluster_count(node_ids.len());
    node_ids
        .iter()
        .enumerate()
        .map(|(idx, node_id)| ClusterAssignment {
            node_id: node_id.clone(),
            cluster_id: format!("cluster-{}", idx % k),
        })
        .collect()
}

/// Tokens billed for clustering `node_count` items: 512 plus 32 per item in, 128 out.
pub fn cluster_usage(node_count: usize) -> Usage {
    Usage {
        tokens_in: 512 + node_count as u64 * 32,
        tokens_out: 128,
    }
}

/// Four outline steps titled after `cluster_id`, stacked vertically.
pub fn outline_nodes(cluster_id: &str) -> Vec<OutlineNode> {
    let label = title_case(&cluster_id.replace("cluster-", ""));
    let (x, y) = OUTLINE_ORIGIN;
    (0..OUTLINE_LEN)
        .map(|idx| OutlineNode {
            title: format!("{label} Step {}", idx + 1),
            x,
            y: y + idx as f64 * OUTLINE_SPACING,
        })
        .collect()
}

/// Fixed token usage of one outline call.
pub fn outline_usage() -> Usage {
    Usage {
        tokens_in: 420,
        tokens_out: 256,
    }
}

/// Uppercase the first cased character of every word, lowercase the rest.
///
/// A word is a run of cased characters, so `"0ab-cd"` becomes `"0Ab-Cd"`.
fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_cased = false;
    for c in s.chars() {
        let cased = c.is_lowercase() || c.is_uppercase();
        if prev_cased {
            out.extend(c.to_lowercase());
        } else {
            out.extend(c.to_uppercase());
        }
        prev_cased = cased;
    }
    out
}

/// Mocked model latency in `range`.
pub fn mock_latency_ms(range: RangeInclusive<u64>) -> u64 {
    rand::thread_rng().gen_range(range)
}
