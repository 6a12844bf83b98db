//! Static agent identity, loaded once from `[[agents.profiles]]`.

use crate::subsystems::commands::AgentSummary;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentProfile {
    pub name: String,
    pub supervisor: String,
    pub role: String,
    /// Free text injected into the system prompt.
    pub guidance: String,
    /// Command tags this agent is told about at sign-on.
    pub commands: Vec<String>,
}

impl AgentProfile {
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    pub fn summary(&self) -> AgentSummary {
        AgentSummary {
            name: self.name.clone(),
            supervisor: self.supervisor.clone(),
            role: self.role.clone(),
        }
    }
}
