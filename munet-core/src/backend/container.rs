//! ContainerNode: a node realised by `podman run` (the default container
//! engine, §6 "external programs invoked"), joining the same network
//! namespace the orchestrator already created for it.

use nix::sys::signal::Signal;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::backend::ExecOutput;
use crate::error::MunetError;
use crate::linkplan::LinkEndpoint;
use crate::model::Node;

pub struct ContainerNode {
    node: Node,
    container_name: String,
    prepared: bool,
    child: Option<Child>,
}

impl ContainerNode {
    pub fn new(node: Node) -> Self {
        let container_name = format!("munet-{}", node.name);
        ContainerNode {
            node,
            container_name,
            prepared: false,
            child: None,
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node.name
    }

    pub async fn prepare(&mut self) -> Result<(), MunetError> {
        // podman manages its own network namespace per container; the
        // orchestrator still pre-creates `self.node.name` as a netns so
        // the Link Planner's veth placement is uniform across backends,
        // then this container joins it with `--network ns:/var/run/netns/<name>`.
        rtnetlink::NetworkNamespace::add(self.node.name.clone())
            .await
            .map_err(|e| {
                MunetError::BackendUnavailable(format!("netns add {:?}: {e}", self.node.name))
            })?;
        self.prepared = true;
        Ok(())
    }

    pub async fn attach_link(&mut self, endpoint: &LinkEndpoint) -> Result<(), MunetError> {
        let netns = &self.node.name;
        if let Some(mtu) = endpoint.mtu {
            run_ip(&["-n", netns, "link", "set", "dev", &endpoint.ifname, "mtu", &mtu.to_string()])
                .await?;
        }
        if let Some(ip) = endpoint.ip {
            run_ip(&["-n", netns, "addr", "add", &ip.to_string(), "dev", &endpoint.ifname]).await?;
        }
        run_ip(&["-n", netns, "link", "set", "dev", &endpoint.ifname, "up"]).await
    }

    pub async fn start(&mut self) -> Result<(), MunetError> {
        let image = self
            .node
            .image
            .clone()
            .ok_or_else(|| MunetError::Internal(format!("{:?} has no image", self.node.name)))?;

        let mut command = Command::new("podman");
        command
            .arg("run")
            .arg("--rm")
            .arg("--name")
            .arg(&self.container_name)
            .arg("--network")
            .arg(format!("ns:/var/run/netns/{}", self.node.name));

        if self.node.privileged {
            command.arg("--privileged");
        }
        for cap in &self.node.cap_add {
            command.arg("--cap-add").arg(cap);
        }
        for cap in &self.node.cap_remove {
            command.arg("--cap-drop").arg(cap);
        }
        for env in &self.node.env {
            command.arg("-e").arg(format!("{}={}", env.name, env.value));
        }
        for mount in &self.node.mounts {
            let mode = if mount.readonly { "ro" } else { "rw" };
            command.arg("-v").arg(format!(
                "{}:{}:{}",
                mount.source, mount.destination, mode
            ));
        }
        if let Some(extras) = &self.node.podman {
            for cap in &extras.extra_cap_add {
                command.arg("--cap-add").arg(cap);
            }
            for mount in &extras.extra_mounts {
                command
                    .arg("-v")
                    .arg(format!("{}:{}", mount.source, mount.destination));
            }
            if let Some(mode) = &extras.network_mode {
                debug!(node = %self.node.name, mode, "podman network-mode override requested");
            }
        }

        command.arg(&image);
        if let Some(cmd) = &self.node.cmd {
            command.arg("sh").arg("-c").arg(cmd);
        }
        command.kill_on_drop(true);

        let child = command.spawn().map_err(|e| MunetError::StartFailed {
            node: self.node.name.clone(),
            reason: e.to_string(),
        })?;
        self.child = Some(child);
        info!(node = %self.node.name, image = %image, "container started");
        Ok(())
    }

    pub async fn exec(&mut self, argv: &[String]) -> Result<ExecOutput, MunetError> {
        if self.child.is_none() {
            return Err(MunetError::NotRunning(self.node.name.clone()));
        }
        let mut command = Command::new("podman");
        command.arg("exec").arg(&self.container_name);
        command.args(argv);
        let output = command
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
        if self.child.is_none() {
            return Err(MunetError::NotRunning(self.node.name.clone()));
        }
        let signame = signal_name(sig);
        let status = Command::new("podman")
            .arg("kill")
            .arg("--signal")
            .arg(signame)
            .arg(&self.container_name)
            .status()
            .await
            .map_err(|e| MunetError::ExecFailed {
                node: self.node.name.clone(),
                reason: e.to_string(),
            })?;
        if status.success() {
            Ok(())
        } else {
            Err(MunetError::ExecFailed {
                node: self.node.name.clone(),
                reason: "podman kill exited non-zero".to_string(),
            })
        }
    }

    pub fn has_process(&self) -> bool {
        self.child.is_some()
    }

    pub async fn wait(&mut self) -> Result<std::process::ExitStatus, MunetError> {
        let child = self
            .child
            .as_mut()
            .ok_or_else(|| MunetError::NotRunning(self.node.name.clone()))?;
        child.wait().await.map_err(MunetError::Io)
    }

    pub async fn cleanup(&mut self) {
        if let Some(cleanup_cmd) = self.node.cleanup_cmd.clone() {
            let status = Command::new("podman")
                .arg("exec")
                .arg(&self.container_name)
                .arg("sh")
                .arg("-c")
                .arg(&cleanup_cmd)
                .status()
                .await;
            if let Err(e) = status {
                warn!(node = %self.node.name, error = %e, "cleanup_cmd failed");
            }
        }

        let _ = Command::new("podman")
            .arg("stop")
            .arg(&self.container_name)
            .status()
            .await;
        if let Some(mut child) = self.child.take() {
            let _ = child.wait().await;
        }

        if self.prepared {
            if let Err(e) = rtnetlink::NetworkNamespace::del(self.node.name.clone()).await {
                warn!(node = %self.node.name, error = %e, "failed to delete network namespace");
            }
        }
    }
}

fn signal_name(sig: Signal) -> &'static str {
    match sig {
        Signal::SIGTERM => "SIGTERM",
        Signal::SIGINT => "SIGINT",
        Signal::SIGKILL => "SIGKILL",
        Signal::SIGHUP => "SIGHUP",
        _ => "SIGTERM",
    }
}

async fn run_ip(args: &[&str]) -> Result<(), MunetError> {
    let output = Command::new("ip").args(args).output().await.map_err(MunetError::Io)?;
    if !output.status.success() {
        return Err(MunetError::Internal(format!(
            "ip {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(())
}
