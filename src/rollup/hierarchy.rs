use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One management edge: `subordinate_id` reports to `manager_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchyEdge {
    pub subordinate_id: String,
    pub manager_id: String,
}

/// The management forest, indexed both upward and downward.
///
/// Construction enforces at most one direct manager per entity;
/// traversal carries a visited set so a cyclic edge set surfaces
/// `InvalidHierarchy` instead of looping.
#[derive(Debug, Default)]
pub struct Hierarchy {
    manager_of: HashMap<String, String>,
    reports_of: HashMap<String, Vec<String>>,
}

impl Hierarchy {
    pub fn from_edges(edges: Vec<HierarchyEdge>) -> Result<Self> {
        let mut hierarchy = Self::default();
        for edge in edges {
            if edge.subordinate_id == edge.manager_id {
                return Err(Error::InvalidHierarchy(format!(
                    "entity {} cannot manage itself",
                    edge.subordinate_id
                )));
            }
            if hierarchy.manager_of.contains_key(&edge.subordinate_id) {
                return Err(Error::InvalidHierarchy(format!(
                    "entity {} has more than one direct manager",
                    edge.subordinate_id
                )));
            }
            hierarchy
                .manager_of
                .insert(edge.subordinate_id.clone(), edge.manager_id.clone());
            hierarchy
                .reports_of
                .entry(edge.manager_id)
                .or_default()
                .push(edge.subordinate_id);
        }
        Ok(hierarchy)
    }

    pub fn manager_of(&self, entity_id: &str) -> Option<&str> {
        self.manager_of.get(entity_id).map(String::as_str)
    }

    pub fn direct_reports(&self, manager_id: &str) -> &[String] {
        self.reports_of
            .get(manager_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// True when `entity_id` reports to `manager_id` in one edge hop.
    pub fn is_direct_report(&self, manager_id: &str, entity_id: &str) -> bool {
        self.manager_of(entity_id) == Some(manager_id)
    }

    /// Every transitive subordinate under `root`, breadth-first, not
    /// including `root` itself. Revisiting an entity means the edge set
    /// contains a cycle and aborts the walk.
    pub fn subordinates(&self, root: &str) -> Result<Vec<String>> {
        let mut visited: HashSet<&str> = HashSet::from([root]);
        let mut queue: VecDeque<&str> = VecDeque::from([root]);
        let mut found: Vec<String> = Vec::new();

        while let Some(current) = queue.pop_front() {
            for report in self.direct_reports(current) {
                if !visited.insert(report) {
                    return Err(Error::InvalidHierarchy(format!(
                        "cycle detected at entity {report}"
                    )));
                }
                found.push(report.clone());
                queue.push_back(report);
            }
        }
        Ok(found)
    }
}
