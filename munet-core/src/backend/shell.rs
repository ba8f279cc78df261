//! ShellNode: the default backend, a bare process in a dedicated netns
//! (plus mount/UTS namespaces for mounts and hostname isolation).
//!
//! Grounded in the teacher's `Node::setup` (netns creation via
//! `rtnetlink::NetworkNamespace::add`, then `ip -n <netns> ...` shell-outs)
//! and in `netns-testbench`'s async `tokio::process::Command` usage.

use nix::sys::signal::Signal;
use nix::unistd::Pid;
use rtnetlink::NetworkNamespace;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::backend::{netns_exec_prefix, ExecOutput};
use crate::error::MunetError;
use crate::linkplan::LinkEndpoint;
use crate::model::kind::{InitPolicy, Mount, ShellPolicy};
use crate::model::Node;

pub struct ShellNode {
    node: Node,
    prepared: bool,
    child: Option<Child>,
}

impl ShellNode {
    pub fn new(node: Node) -> Self {
        ShellNode {
            node,
            prepared: false,
            child: None,
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node.name
    }

    fn netns(&self) -> &str {
        &self.node.name
    }

    pub async fn prepare(&mut self) -> Result<(), MunetError> {
        let netns = self.netns().to_string();
        debug!(node = %netns, "creating network namespace");
        NetworkNamespace::add(netns.clone())
            .await
            .map_err(|e| MunetError::BackendUnavailable(format!("netns add {netns:?}: {e}")))?;
        // The namespace now exists in the kernel, so `cleanup()` must be
        // able to reclaim it even if a later step in `prepare()` fails.
        self.prepared = true;

        run_ip(&["-n", &netns, "link", "set", "dev", "lo", "up"]).await?;

        info!(node = %netns, "node prepared");
        Ok(())
    }

    pub async fn attach_link(&mut self, endpoint: &LinkEndpoint) -> Result<(), MunetError> {
        if !self.prepared {
            return Err(MunetError::Internal(format!(
                "attach_link called before prepare on {:?}",
                self.node.name
            )));
        }
        let netns = self.netns();

        if let Some(mtu) = endpoint.mtu {
            run_ip(&[
                "-n",
                netns,
                "link",
                "set",
                "dev",
                &endpoint.ifname,
                "mtu",
                &mtu.to_string(),
            ])
            .await?;
        }

        if let Some(ip) = endpoint.ip {
            run_ip(&["-n", netns, "addr", "add", &ip.to_string(), "dev", &endpoint.ifname]).await?;
        }

        run_ip(&["-n", netns, "link", "set", "dev", &endpoint.ifname, "up"]).await?;
        Ok(())
    }

    pub async fn start(&mut self) -> Result<(), MunetError> {
        let Some(cmd) = self.node.cmd.clone() else {
            debug!(node = %self.node.name, "no cmd set, node holds namespace open only");
            return Ok(());
        };

        let mut argv = netns_exec_prefix(self.netns());
        let mut exec_tail = Vec::new();
        if let InitPolicy::Enabled(true) = &self.node.init {
            exec_tail.push("tini".to_string());
            exec_tail.push("--".to_string());
        } else if let InitPolicy::Path(path) = &self.node.init {
            exec_tail.push(path.clone());
            exec_tail.push("--".to_string());
        }
        exec_tail.extend(shell_argv(&self.node.shell, &cmd));

        // Every node gets its own UTS namespace (hostname = node name) and
        // a private mount namespace for its bind mounts, entered by this
        // process itself so both are torn down automatically when it
        // exits (§10.7; §1's "composing kernel namespaces (network,
        // mount, PID, UTS)").
        argv.push("unshare".to_string());
        argv.push("--uts".to_string());
        argv.push("--mount".to_string());
        argv.push("--propagation".to_string());
        argv.push("private".to_string());
        argv.push("--".to_string());
        argv.push("/bin/sh".to_string());
        argv.push("-c".to_string());
        argv.push(uts_mount_then_exec_script(&self.node.name, &self.node.mounts, &exec_tail));

        let mut command = Command::new("ip");
        command.args(&argv);
        for env in &self.node.env {
            command.env(&env.name, &env.value);
        }
        command.kill_on_drop(true);

        let child = command
            .spawn()
            .map_err(|e| MunetError::StartFailed {
                node: self.node.name.clone(),
                reason: e.to_string(),
            })?;
        self.child = Some(child);
        info!(node = %self.node.name, "started");
        Ok(())
    }

    pub async fn exec(&mut self, argv: &[String]) -> Result<ExecOutput, MunetError> {
        if self.child.is_none() && self.node.cmd.is_some() {
            return Err(MunetError::NotRunning(self.node.name.clone()));
        }
        let mut full_argv = netns_exec_prefix(self.netns());
        full_argv.extend(argv.iter().cloned());

        let output = Command::new("ip")
            .args(&full_argv)
            .output()
            .await
            .map_err(|e| MunetError::ExecFailed {
                node: self.node.name.clone(),
                reason: e.to_string(),
            })?;

        Ok(ExecOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    pub async fn signal(&mut self, sig: Signal) -> Result<(), MunetError> {
        let Some(child) = &self.child else {
            return Err(MunetError::NotRunning(self.node.name.clone()));
        };
        let Some(pid) = child.id() else {
            return Err(MunetError::NotRunning(self.node.name.clone()));
        };
        nix::sys::signal::kill(Pid::from_raw(pid as i32), sig)
            .map_err(|e| MunetError::ExecFailed {
                node: self.node.name.clone(),
                reason: e.to_string(),
            })
    }

    /// Whether this node has a main process the orchestrator should
    /// supervise (§4.6: a `cmd`-less node only holds its namespace open).
    pub fn has_process(&self) -> bool {
        self.child.is_some()
    }

    /// Block until the node's main process exits (§5 supervision).
    pub async fn wait(&mut self) -> Result<std::process::ExitStatus, MunetError> {
        let child = self
            .child
            .as_mut()
            .ok_or_else(|| MunetError::NotRunning(self.node.name.clone()))?;
        child.wait().await.map_err(MunetError::Io)
    }

    pub async fn cleanup(&mut self) {
        let netns = self.netns().to_string();

        if let Some(cleanup_cmd) = self.node.cleanup_cmd.clone() {
            let argv = netns_exec_prefix(&netns);
            let mut full = argv;
            full.extend(shell_argv(&self.node.shell, &cleanup_cmd));
            if let Err(e) = Command::new("ip").args(&full).output().await {
                warn!(node = %netns, error = %e, "cleanup_cmd failed");
            }
        }

        if let Some(mut child) = self.child.take() {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }

        if !self.prepared {
            return;
        }
        if let Err(e) = NetworkNamespace::del(netns.clone()).await {
            warn!(node = %netns, error = %e, "failed to delete network namespace");
        }
    }
}

fn shell_argv(policy: &ShellPolicy, cmd: &str) -> Vec<String> {
    match policy {
        ShellPolicy::Enabled(true) => {
            let shell = if std::path::Path::new("/bin/bash").exists() {
                "/bin/bash"
            } else {
                "/bin/sh"
            };
            vec![shell.to_string(), "-c".to_string(), cmd.to_string()]
        }
        ShellPolicy::Path(path) => vec![path.clone(), "-c".to_string(), cmd.to_string()],
        ShellPolicy::Enabled(false) => cmd.split_whitespace().map(str::to_string).collect(),
    }
}

async fn run_ip(args: &[&str]) -> Result<(), MunetError> {
    let output = Command::new("ip")
        .args(args)
        .output()
        .await
        .map_err(MunetError::Io)?;
    if !output.status.success() {
        return Err(MunetError::Internal(format!(
            "ip {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(())
}

/// Build the `sh -c` script that sets the node's hostname in the freshly
/// unshared UTS namespace, realises `mounts` as bind mounts in the
/// unshared mount namespace, then `exec`s `tail` (§10.7). `hostname` and
/// `mount` are the external programs shelled out to (§6); `exec` replaces
/// the shell so the node's main process remains PID of this subtree.
fn uts_mount_then_exec_script(node_name: &str, mounts: &[Mount], tail: &[String]) -> String {
    let mut script = format!("hostname {} && ", shell_quote(node_name));
    for mount in mounts {
        script.push_str(&format!(
            "mkdir -p {} && mount --bind {} {}",
            shell_quote(&mount.destination),
            shell_quote(&mount.source),
            shell_quote(&mount.destination),
        ));
        if mount.readonly {
            script.push_str(&format!(
                " && mount -o remount,ro,bind {}",
                shell_quote(&mount.destination)
            ));
        }
        script.push_str(" && ");
    }
    script.push_str("exec ");
    script.push_str(
        &tail
            .iter()
            .map(|a| shell_quote(a))
            .collect::<Vec<_>>()
            .join(" "),
    );
    script
}

/// Single-quote `s` for safe embedding in a POSIX shell command line.
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_argv_picks_bash_or_sh_when_enabled() {
        let argv = shell_argv(&ShellPolicy::Enabled(true), "echo hi");
        assert_eq!(argv.len(), 3);
        assert!(argv[0] == "/bin/bash" || argv[0] == "/bin/sh");
        assert_eq!(argv[1], "-c");
        assert_eq!(argv[2], "echo hi");
    }

    #[test]
    fn shell_argv_splits_by_word_when_disabled() {
        let argv = shell_argv(&ShellPolicy::Enabled(false), "echo hi there");
        assert_eq!(argv, vec!["echo", "hi", "there"]);
    }

    #[test]
    fn shell_quote_escapes_embedded_single_quotes() {
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
    }

    #[test]
    fn uts_mount_then_exec_script_sets_hostname_then_chains_bind_mounts_then_execs_tail() {
        let mounts = vec![Mount {
            source: "/host/data".into(),
            destination: "/data".into(),
            readonly: true,
        }];
        let tail = vec!["/bin/sh".to_string(), "-c".to_string(), "run".to_string()];
        let script = uts_mount_then_exec_script("r1", &mounts, &tail);
        assert!(script.starts_with("hostname 'r1' && "));
        assert!(script.contains("mkdir -p '/data'"));
        assert!(script.contains("mount --bind '/host/data' '/data'"));
        assert!(script.contains("remount,ro,bind '/data'"));
        assert!(script.ends_with("exec '/bin/sh' '-c' 'run'"));
    }

    #[test]
    fn uts_mount_then_exec_script_sets_hostname_with_no_mounts() {
        let tail = vec!["/bin/sh".to_string(), "-c".to_string(), "run".to_string()];
        let script = uts_mount_then_exec_script("r1", &[], &tail);
        assert_eq!(script, "hostname 'r1' && exec '/bin/sh' '-c' 'run'");
    }

    /// Real kernel namespace creation/teardown; needs CAP_NET_ADMIN, so this
    /// is excluded from the default unprivileged test run.
    #[tokio::test]
    #[cfg(feature = "sudo-tests")]
    async fn prepare_then_cleanup_round_trips_a_real_netns() {
        let node = Node::from_merge(
            "shtest".into(),
            1,
            &crate::model::kind::Kind::default(),
            &crate::model::node::RawNode::default(),
        );
        let mut backend = ShellNode::new(node);
        backend.prepare().await.expect("netns create should succeed as root");
        backend.cleanup().await;
    }
}
