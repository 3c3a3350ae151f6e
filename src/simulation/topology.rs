use crate::connection::{ConnectionGuideline, Connections, LinkCategory};
use crate::error::{Result, SimError};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct TopologyNode {
    pub id: String,
    pub level: usize,
    pub connections: Connections,
}

/// Agents plus the guidelines each one is handed.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    nodes: Vec<TopologyNode>,
    links: usize,
}

impl Topology {
    /// Builds a tree `depth` levels below the root `H0`, each inner node
    /// having `fanout` children. Ids carry their level's category prefix.
    pub fn tree(depth: usize, fanout: usize, organization: &str) -> Result<Self> {
        if depth > 0 && fanout == 0 {
            return Err(SimError::config("a tree with depth > 0 needs fanout >= 1"));
        }

        let root = format!("{}0", LinkCategory::for_level(0).prefix());
        let mut levels: Vec<Vec<String>> = vec![vec![root]];
        let mut edges = Vec::new();
        let mut counters: BTreeMap<char, usize> = BTreeMap::new();

        for level in 1..=depth {
            let prefix = LinkCategory::for_level(level).prefix();
            let mut current = Vec::new();
            for parent in &levels[level - 1] {
                for _ in 0..fanout {
                    let n = counters.entry(prefix).or_insert(0);
                    *n += 1;
                    let child = format!("{}{}", prefix, n);
                    edges.push((parent.clone(), child.clone()));
                    current.push(child);
                }
            }
            levels.push(current);
        }

        let order: Vec<(String, usize)> = levels
            .iter()
            .enumerate()
            .flat_map(|(level, ids)| ids.iter().map(move |id| (id.clone(), level)))
            .collect();
        Self::from_edges(&order, &edges, organization)
    }

    /// Builds guidelines for explicit (parent, child) edges. Each child's
    /// expected master is its parent.
    pub fn from_edges(nodes: &[(String, usize)], edges: &[(String, String)], organization: &str) -> Result<Self> {
        let mut guidelines: BTreeMap<&str, Vec<ConnectionGuideline>> =
            nodes.iter().map(|(id, _)| (id.as_str(), Vec::new())).collect();

        for (parent, child) in edges {
            if parent == child {
                return Err(SimError::config(format!("{} cannot be its own parent", parent)));
            }
            guidelines
                .get_mut(parent.as_str())
                .ok_or_else(|| SimError::UnknownAgent(parent.clone()))?
                .push(ConnectionGuideline::to_child(child, organization, parent)?);
            guidelines
                .get_mut(child.as_str())
                .ok_or_else(|| SimError::UnknownAgent(child.clone()))?
                .push(ConnectionGuideline::to_parent(parent, organization, parent)?);
        }

        let nodes = nodes
            .iter()
            .map(|(id, level)| TopologyNode {
                id: id.clone(),
                level: *level,
                connections: Connections::new(id.clone(), guidelines.remove(id.as_str()).unwrap_or_default()),
            })
            .collect();

        Ok(Self {
            nodes,
            links: edges.len(),
        })
    }

    pub fn nodes(&self) -> &[TopologyNode] {
        &self.nodes
    }

    pub fn links(&self) -> usize {
        self.links
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tree_shape_and_names() {
        let topology = Topology::tree(2, 2, "org").unwrap();
        let ids: Vec<&str> = topology.nodes().iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["H0", "N1", "N2", "L1", "L2", "L3", "L4"]);
        assert_eq!(topology.links(), 6);

        let n1 = &topology.nodes()[1];
        assert_eq!(n1.connections.parents().next().unwrap().peer(), "H0");
        assert_eq!(n1.connections.children().count(), 2);
    }

    #[test]
    fn test_lone_root() {
        let topology = Topology::tree(0, 3, "org").unwrap();
        assert_eq!(topology.nodes().len(), 1);
        assert_eq!(topology.links(), 0);
    }

    #[test]
    fn test_zero_fanout_rejected() {
        assert!(Topology::tree(1, 0, "org").is_err());
    }
}
