//! Wire response schemas.
//!
//! Field names are part of the API contract; renaming one breaks every
//! robot consumer.

use serde::{Deserialize, Serialize};

use crate::core::IssueId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageResponse {
    pub quick_ref: QuickRef,
    pub recommendations: Vec<Recommendation>,
    pub blockers_to_clear: Vec<BlockerInfo>,
    pub project_health: ProjectHealth,
}

/// At-a-glance counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuickRef {
    pub total: u64,
    pub open: u64,
    pub blocked: u64,
    pub ready: u64,
}

/// A ready issue annotated for "what should I pick up next".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub id: IssueId,
    pub index: i64,
    pub title: String,
    pub pagerank: f64,
    pub centrality: f64,
    /// Open issues this one blocks; closing it would (potentially)
    /// free them.
    pub unblocks: Vec<IssueId>,
    pub priority: i64,
    pub status: String,
}

/// An issue blocking many others.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockerInfo {
    pub id: IssueId,
    pub index: i64,
    pub title: String,
    pub blocks_count: u64,
    pub pagerank: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ProjectHealth {
    pub cycle_detected: bool,
    pub avg_pagerank: f64,
    pub max_pagerank: f64,
    pub dependency_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadyResponse {
    pub issues: Vec<ReadyIssue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadyIssue {
    pub id: IssueId,
    pub index: i64,
    pub title: String,
    pub pagerank: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphResponse {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: IssueId,
    pub index: i64,
    pub title: String,
    pub pagerank: f64,
    pub status: String,
}

/// `source` is the blocker, `target` the blocked issue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: IssueId,
    pub target: IssueId,
    #[serde(rename = "type")]
    pub kind: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edge_kind_serializes_as_type() {
        let edge = GraphEdge {
            source: IssueId::new(1),
            target: IssueId::new(2),
            kind: "blocks".into(),
        };
        let json = serde_json::to_value(&edge).unwrap();
        assert_eq!(json["type"], "blocks");
        assert_eq!(json["source"], 1);
        assert_eq!(json["target"], 2);
    }

    #[test]
    fn triage_field_names_are_stable() {
        let response = TriageResponse {
            quick_ref: QuickRef {
                total: 3,
                open: 2,
                blocked: 1,
                ready: 1,
            },
            recommendations: vec![],
            blockers_to_clear: vec![],
            project_health: ProjectHealth {
                cycle_detected: false,
                avg_pagerank: 0.1,
                max_pagerank: 0.2,
                dependency_count: 4,
            },
        };
        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("quick_ref").is_some());
        assert!(json.get("blockers_to_clear").is_some());
        assert_eq!(json["project_health"]["dependency_count"], 4);
        assert_eq!(json["project_health"]["avg_pagerank"], 0.1);
    }
}
