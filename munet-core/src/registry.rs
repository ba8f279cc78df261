//! Command Registry (§4.8) — the CLI hook: resolves a declared command's
//! `exec` template against the running topology for a selected node.
//!
//! Per the design note in §9, template evaluation is a bounded
//! substitution grammar, not arbitrary code: `{name}` or `{name.attr}`
//! against a whitelisted attribute set on `host` and `unet`, never an
//! eval of user input. This is realised with `minijinja` (as the teacher's
//! `Pinned::cores` scans `{{ ... }}` templates) configured with the
//! single-brace syntax the model uses, and nothing else: no control flow,
//! no filters beyond the defaults, no loader.

use minijinja::syntax::SyntaxConfig;
use minijinja::{context, Environment};
use serde::Serialize;

use crate::error::MunetError;
use crate::model::CliCommand;
use crate::model::Node;

/// The whitelisted view of a node exposed to templates as `host`.
#[derive(Debug, Clone, Serialize)]
pub struct HostView {
    pub name: String,
    pub id: u32,
    pub image: Option<String>,
}

impl From<&Node> for HostView {
    fn from(node: &Node) -> Self {
        HostView {
            name: node.name.clone(),
            id: node.id,
            image: node.image.clone(),
        }
    }
}

/// The whitelisted view of the running topology exposed as `unet`.
#[derive(Debug, Clone, Serialize)]
pub struct UnetView {
    pub run_id: String,
    pub node_count: usize,
}

/// Resolves declared CLI commands against a running topology.
pub struct CommandRegistry {
    commands: Vec<CliCommand>,
    env: Environment<'static>,
}

impl CommandRegistry {
    pub fn new(commands: Vec<CliCommand>) -> Self {
        let mut env = Environment::new();
        env.set_syntax(
            SyntaxConfig::builder()
                .variable_delimiters("{", "}")
                .block_delimiters("\0block-start\0", "\0block-end\0")
                .comment_delimiters("\0comment-start\0", "\0comment-end\0")
                .build()
                .expect("single-brace syntax is valid"),
        );
        CommandRegistry { commands, env }
    }

    pub fn commands(&self) -> &[CliCommand] {
        &self.commands
    }

    /// Commands offered for a node of the given resolved kind name (§4.8:
    /// `kinds` filter), or all commands if a command sets no filter.
    pub fn available_for_kind<'a>(&'a self, kind_name: Option<&str>) -> Vec<&'a CliCommand> {
        self.commands
            .iter()
            .filter(|c| {
                c.kinds_filter.is_empty()
                    || kind_name.is_some_and(|k| c.kinds_filter.iter().any(|f| f == k))
            })
            .collect()
    }

    /// Resolve `command`'s `exec` template (or its per-kind override, if
    /// `kind_name` matches one) against `host`/`unet`/`user_input`.
    pub fn resolve(
        &self,
        command: &CliCommand,
        host: &HostView,
        unet: &UnetView,
        kind_name: Option<&str>,
        user_input: &str,
    ) -> Result<String, MunetError> {
        let template_src = kind_name
            .and_then(|k| command.exec_kind.get(k))
            .unwrap_or(&command.exec);

        let tmpl = self
            .env
            .template_from_str(template_src)
            .map_err(|e| MunetError::Internal(format!("invalid command template: {e}")))?;

        tmpl.render(context! { host => host, unet => unet, user_input => user_input })
            .map_err(|e| MunetError::Internal(format!("template substitution failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn command(exec: &str) -> CliCommand {
        CliCommand {
            name: "shell".into(),
            format: None,
            help: None,
            kinds_filter: vec![],
            new_window: false,
            top_level: false,
            interactive: true,
            exec: exec.to_string(),
            exec_kind: HashMap::new(),
        }
    }

    #[test]
    fn substitutes_host_and_unet_attributes() {
        let registry = CommandRegistry::new(vec![]);
        let host = HostView { name: "r1".into(), id: 1, image: None };
        let unet = UnetView { run_id: "run-1".into(), node_count: 2 };
        let cmd = command("ip netns exec {host.name} bash");
        let resolved = registry.resolve(&cmd, &host, &unet, None, "").unwrap();
        assert_eq!(resolved, "ip netns exec r1 bash");
    }

    #[test]
    fn kind_override_takes_precedence() {
        let registry = CommandRegistry::new(vec![]);
        let host = HostView { name: "r1".into(), id: 1, image: Some("alpine".into()) };
        let unet = UnetView { run_id: "run-1".into(), node_count: 1 };
        let mut cmd = command("ip netns exec {host.name} sh");
        cmd.exec_kind.insert("router".into(), "podman exec munet-{host.name} sh".into());
        let resolved = registry.resolve(&cmd, &host, &unet, Some("router"), "").unwrap();
        assert_eq!(resolved, "podman exec munet-r1 sh");
    }

    #[test]
    fn kinds_filter_restricts_availability() {
        let mut cmd = command("echo hi");
        cmd.kinds_filter = vec!["router".into()];
        let registry = CommandRegistry::new(vec![cmd]);
        assert!(registry.available_for_kind(Some("router")).len() == 1);
        assert!(registry.available_for_kind(Some("host")).is_empty());
    }
}
