//! Sign-on prompt builder.
//!
//! The sign-on template is plain text with `<key>` placeholders.  Variables
//! are substituted first, then command placeholders are expanded:
//!
//! ```text
//! <commands>              every command carrying one of the agent's tags
//! <commands:roster,clock>  every command carrying one of the listed tags
//! ```
//!
//! Unknown placeholders are left as they are.

use std::collections::BTreeMap;

use regex::{Captures, Regex};

use crate::error::ValidationError;
use crate::subsystems::commands::CommandRegistry;

const COMMANDS_PATTERN: &str = r"<commands(?::([\w,]+))?>";

/// Fluent builder over one template.
///
/// ```rust,ignore
/// let text = PromptBuilder::new("You are <name>, a <role>.\n<commands>")
///     .var("name", "Alice")
///     .var("role", "poet")
///     .with_commands(&registry, &["roster".to_string()])
///     .build()?;
/// ```
pub struct PromptBuilder<'a> {
    template: String,
    vars: BTreeMap<String, String>,
    commands: Option<(&'a CommandRegistry, Vec<String>)>,
}

impl<'a> PromptBuilder<'a> {
    pub fn new(template: impl Into<String>) -> Self {
        Self { template: template.into(), vars: BTreeMap::new(), commands: None }
    }

    /// Register a single `<key>` → `value` substitution.
    pub fn var(mut self, key: &str, value: impl Into<String>) -> Self {
        self.vars.insert(key.to_string(), value.into());
        self
    }

    /// Register several substitutions at once.
    pub fn with_vars<'b, I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (&'b str, &'b str)>,
    {
        for (k, v) in vars {
            self.vars.insert(k.to_string(), v.to_string());
        }
        self
    }

    /// Expand command placeholders from `registry`; bare `<commands>` uses
    /// `default_tags`.
    pub fn with_commands(mut self, registry: &'a CommandRegistry, default_tags: &[String]) -> Self {
        self.commands = Some((registry, default_tags.to_vec()));
        self
    }

    pub fn build(self) -> Result<String, ValidationError> {
        let mut prompt = self.template;
        for (k, v) in &self.vars {
            prompt = prompt.replace(&format!("<{k}>"), v);
        }

        let Some((registry, default_tags)) = self.commands else {
            return Ok(prompt);
        };

        let re = Regex::new(COMMANDS_PATTERN)
            .map_err(|e| ValidationError::Invalid(format!("commands pattern: {e}")))?;
        let expanded = re.replace_all(&prompt, |caps: &Captures| {
            let tags: Vec<String> = match caps.get(1) {
                Some(list) => list
                    .as_str()
                    .split(',')
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
                    .collect(),
                None => default_tags.clone(),
            };
            registry.render_for_tags(&tags)
        });
        Ok(expanded.into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CommandConfig;

    fn registry() -> CommandRegistry {
        CommandRegistry::from_config(&[
            CommandConfig { name: "list_agents".into(), tags: vec!["roster".into()] },
            CommandConfig { name: "current_time".into(), tags: vec!["clock".into()] },
        ])
        .unwrap()
    }

    #[test]
    fn substitutes_every_variable() {
        let out = PromptBuilder::new("<name> (<role>) reports to <supervisor>. <name>!")
            .with_vars([("name", "Alice"), ("role", "poet"), ("supervisor", "Operator")])
            .build()
            .unwrap();
        assert_eq!(out, "Alice (poet) reports to Operator. Alice!");
    }

    #[test]
    fn unknown_placeholders_survive() {
        let out = PromptBuilder::new("Hi <name>, <mystery>").var("name", "Bob").build().unwrap();
        assert_eq!(out, "Hi Bob, <mystery>");
    }

    #[test]
    fn bare_commands_use_default_tags() {
        let reg = registry();
        let out = PromptBuilder::new("Tools:\n<commands>")
            .with_commands(&reg, &["roster".into()])
            .build()
            .unwrap();
        assert!(out.contains("list_agents() -> str"));
        assert!(!out.contains("current_time"));
    }

    #[test]
    fn tagged_commands_override_defaults() {
        let reg = registry();
        let out = PromptBuilder::new("<commands:clock,roster>")
            .with_commands(&reg, &[])
            .build()
            .unwrap();
        let time_at = out.find("current_time() -> str").unwrap();
        let list_at = out.find("list_agents() -> str").unwrap();
        assert!(time_at < list_at, "registry order is by name");
        assert!(out.contains("\n\n"));
    }

    #[test]
    fn no_registry_leaves_command_tags() {
        let out = PromptBuilder::new("<commands>").build().unwrap();
        assert_eq!(out, "<commands>");
    }
}
