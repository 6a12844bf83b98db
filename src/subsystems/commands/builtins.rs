//! Built-in commands.

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};

use super::{ArgKind, ArgumentSpec, Arguments, Command, CommandContext, CommandError, ReturnSpec};

/// Built-in command by config section name.
pub fn lookup(name: &str) -> Option<Arc<dyn Command>> {
    match name {
        "list_agents" => Some(Arc::new(ListAgents)),
        "describe_agent" => Some(Arc::new(DescribeAgent)),
        "current_time" => Some(Arc::new(CurrentTime)),
        _ => None,
    }
}

pub struct ListAgents;

impl Command for ListAgents {
    fn name(&self) -> &'static str {
        "list_agents"
    }

    fn description(&self) -> &'static str {
        "List every agent in the swarm with its role."
    }

    fn arguments(&self) -> Vec<ArgumentSpec> {
        Vec::new()
    }

    fn returns(&self) -> ReturnSpec {
        ReturnSpec { kind: ArgKind::String, description: "one 'name: role' line per agent" }
    }

    fn invoke(&self, ctx: &CommandContext, _args: &Arguments) -> Result<String, CommandError> {
        if ctx.agents.is_empty() {
            return Ok("no agents".to_string());
        }
        Ok(ctx
            .agents
            .iter()
            .map(|a| format!("{}: {}", a.name, a.role))
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

pub struct DescribeAgent;

impl Command for DescribeAgent {
    fn name(&self) -> &'static str {
        "describe_agent"
    }

    fn description(&self) -> &'static str {
        "Describe one agent."
    }

    fn arguments(&self) -> Vec<ArgumentSpec> {
        vec![ArgumentSpec {
            name: "name",
            kind: ArgKind::String,
            description: "agent to describe",
            required: true,
            default: None,
        }]
    }

    fn returns(&self) -> ReturnSpec {
        ReturnSpec { kind: ArgKind::String, description: "the agent's role and supervisor" }
    }

    fn validate(&self, ctx: &CommandContext, args: &Arguments) -> Result<(), CommandError> {
        let name = args.string("name").unwrap_or_default();
        if ctx.agents.iter().any(|a| a.name.eq_ignore_ascii_case(name)) {
            Ok(())
        } else {
            Err(CommandError::invalid(self.name(), format!("no agent named '{name}'")))
        }
    }

    fn invoke(&self, ctx: &CommandContext, args: &Arguments) -> Result<String, CommandError> {
        let name = args.string("name").unwrap_or_default();
        let agent = ctx
            .agents
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| CommandError::failed(self.name(), format!("no agent named '{name}'")))?;
        Ok(format!(
            "{} is {}, supervised by {}.",
            agent.name,
            if agent.role.is_empty() { "without a role" } else { agent.role.as_str() },
            if agent.supervisor.is_empty() { "nobody" } else { agent.supervisor.as_str() },
        ))
    }
}

pub struct CurrentTime;

impl Command for CurrentTime {
    fn name(&self) -> &'static str {
        "current_time"
    }

    fn description(&self) -> &'static str {
        "Current UTC date and time."
    }

    fn arguments(&self) -> Vec<ArgumentSpec> {
        Vec::new()
    }

    fn returns(&self) -> ReturnSpec {
        ReturnSpec { kind: ArgKind::String, description: "RFC 3339 timestamp" }
    }

    fn invoke(&self, _ctx: &CommandContext, _args: &Arguments) -> Result<String, CommandError> {
        Ok(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subsystems::commands::{AgentSummary, CommandCall};

    fn ctx() -> CommandContext {
        CommandContext {
            agents: vec![
                AgentSummary { name: "Alice".into(), supervisor: "Operator".into(), role: "poet".into() },
                AgentSummary { name: "Bob".into(), supervisor: String::new(), role: String::new() },
            ],
            caller: "Carol".into(),
        }
    }

    fn args_for(cmd: &dyn Command, raw: &[(&str, &str)]) -> Arguments {
        let descriptor = crate::subsystems::commands::CommandDescriptor {
            name: cmd.name(),
            description: cmd.description(),
            tags: vec![],
            arguments: cmd.arguments(),
            returns: cmd.returns(),
        };
        let call = CommandCall {
            name: cmd.name().into(),
            args: raw.iter().map(|(k, v)| (Some(k.to_string()), v.to_string())).collect(),
        };
        descriptor.validate(&call).unwrap()
    }

    #[test]
    fn lookup_knows_builtins() {
        for name in ["list_agents", "describe_agent", "current_time"] {
            assert_eq!(lookup(name).unwrap().name(), name);
        }
        assert!(lookup("shell").is_none());
    }

    #[test]
    fn list_agents_lists_roles() {
        let out = ListAgents.invoke(&ctx(), &Arguments::default()).unwrap();
        assert_eq!(out, "Alice: poet\nBob: ");
    }

    #[test]
    fn describe_agent_is_case_insensitive() {
        let args = args_for(&DescribeAgent, &[("name", "alice")]);
        DescribeAgent.validate(&ctx(), &args).unwrap();
        let out = DescribeAgent.invoke(&ctx(), &args).unwrap();
        assert_eq!(out, "Alice is poet, supervised by Operator.");
    }

    #[test]
    fn describe_agent_rejects_unknown_names() {
        let args = args_for(&DescribeAgent, &[("name", "Zed")]);
        assert!(DescribeAgent.validate(&ctx(), &args).is_err());
    }

    #[test]
    fn describe_agent_handles_blank_profile() {
        let args = args_for(&DescribeAgent, &[("name", "Bob")]);
        let out = DescribeAgent.invoke(&ctx(), &args).unwrap();
        assert_eq!(out, "Bob is without a role, supervised by nobody.");
    }

    #[test]
    fn current_time_is_rfc3339() {
        let out = CurrentTime.invoke(&ctx(), &Arguments::default()).unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(&out).is_ok());
        assert!(out.ends_with('Z'));
    }
}
