use crate::error::{Result, SimError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkDirection {
    /// The peer sits directly above this agent.
    ToParent,
    /// The peer sits directly below this agent.
    ToChild,
}

/// One authorized agent-to-agent link and its progress.
///
/// Built from already-parsed configuration; only the connection protocol
/// flips `connected` and `registered`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionGuideline {
    peer: String,
    organization: String,
    expected_master: String,
    direction: LinkDirection,
    #[serde(default)]
    connected: bool,
    #[serde(default)]
    registered: bool,
}

impl ConnectionGuideline {
    pub fn new(
        peer: impl Into<String>,
        organization: impl Into<String>,
        expected_master: impl Into<String>,
        direction: LinkDirection,
    ) -> Result<Self> {
        let guideline = Self {
            peer: peer.into().trim().to_string(),
            organization: organization.into().trim().to_string(),
            expected_master: expected_master.into().trim().to_string(),
            direction,
            connected: false,
            registered: false,
        };
        guideline.validate()?;
        Ok(guideline)
    }

    pub fn to_parent(peer: &str, organization: &str, expected_master: &str) -> Result<Self> {
        Self::new(peer, organization, expected_master, LinkDirection::ToParent)
    }

    pub fn to_child(peer: &str, organization: &str, expected_master: &str) -> Result<Self> {
        Self::new(peer, organization, expected_master, LinkDirection::ToChild)
    }

    /// Rejects blank identifiers. Deserialized guidelines go through this too.
    pub fn validate(&self) -> Result<()> {
        let missing = [
            ("peer", &self.peer),
            ("organization", &self.organization),
            ("expected master", &self.expected_master),
        ]
        .into_iter()
        .find(|(_, value)| value.trim().is_empty());

        match missing {
            Some((field, _)) => Err(SimError::config(format!(
                "connection guideline is missing its {} (peer: {:?})",
                field, self.peer
            ))),
            None => Ok(()),
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn organization(&self) -> &str {
        &self.organization
    }

    pub fn expected_master(&self) -> &str {
        &self.expected_master
    }

    pub fn direction(&self) -> LinkDirection {
        self.direction
    }

    pub fn is_parent(&self) -> bool {
        self.direction == LinkDirection::ToParent
    }

    pub fn is_child(&self) -> bool {
        self.direction == LinkDirection::ToChild
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    pub(crate) fn mark_connected(&mut self) {
        self.connected = true;
        self.registered = true;
    }
}

/// The guideline list handed to one agent, tagged with where it came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connections {
    pub tag: String,
    pub guidelines: Vec<ConnectionGuideline>,
}

impl Connections {
    pub fn new(tag: impl Into<String>, guidelines: Vec<ConnectionGuideline>) -> Self {
        Self {
            tag: tag.into(),
            guidelines,
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.guidelines.iter().try_for_each(ConnectionGuideline::validate)
    }

    pub fn parents(&self) -> impl Iterator<Item = &ConnectionGuideline> {
        self.guidelines.iter().filter(|g| g.is_parent())
    }

    pub fn children(&self) -> impl Iterator<Item = &ConnectionGuideline> {
        self.guidelines.iter().filter(|g| g.is_child())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guideline_rejects_missing_fields() {
        assert!(ConnectionGuideline::to_parent("", "org", "Parent").is_err());
        assert!(ConnectionGuideline::to_child("Child1", " ", "Parent").is_err());
        assert!(ConnectionGuideline::to_child("Child1", "org", "").is_err());
    }

    #[test]
    fn test_deserialized_guideline_is_validated() {
        let raw = r#"{"peer":"","organization":"org","expected_master":"P","direction":"to_parent"}"#;
        let guideline: ConnectionGuideline = serde_json::from_str(raw).unwrap();
        assert!(!guideline.is_connected());
        assert!(guideline.validate().is_err());
    }

    #[test]
    fn test_connections_split_by_direction() {
        let connections = Connections::new(
            "Child1",
            vec![
                ConnectionGuideline::to_parent("Parent", "org", "Parent").unwrap(),
                ConnectionGuideline::to_child("Grandchild", "org", "Child1").unwrap(),
            ],
        );
        assert_eq!(connections.parents().count(), 1);
        assert_eq!(connections.children().next().unwrap().peer(), "Grandchild");
        assert!(connections.validate().is_ok());
    }
}
