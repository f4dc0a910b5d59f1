//! [`ExecutionDriver`] backed by a Docker-compatible engine via bollard.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions, LogOutput,
    LogsOptions, RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
    WaitContainerOptions,
};
use bollard::image::RemoveImageOptions;
use bollard::models::{ContainerStateStatusEnum, ContainerSummary, HostConfig, HostConfigLogConfig};
use bollard::system::EventsOptions;
use bollard::Docker;
use futures::{StreamExt, TryFutureExt, TryStreamExt};

use crate::config::EngineConfig;
use crate::deadline::with_deadline;
use crate::driver::{
    EventStream, ExecutionDriver, LogChunk, LogStream, UnitSpec, UnitState, UnitSummary,
    WaitCondition,
};
use crate::error::DriverError;
use crate::events::{subscription_filters, unit_event_from_message};

/// Driver talking to one engine endpoint.
#[derive(Clone)]
pub struct DockerDriver {
    docker: Docker,
    config: EngineConfig,
}

impl DockerDriver {
    /// Connect using `DOCKER_HOST` or the local socket.
    ///
    /// The client's own request timeout is raised to the create deadline so
    /// the per-call deadlines are the ones that apply.
    pub fn connect(config: EngineConfig) -> Result<Self, DriverError> {
        let docker = Docker::connect_with_defaults()
            .map_err(|e| DriverError::EngineUnavailable(e.to_string()))?
            .with_timeout(config.create_timeout);
        Ok(Self::new(docker, config))
    }

    pub fn new(docker: Docker, config: EngineConfig) -> Self {
        Self { docker, config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    async fn list(
        &self,
        filters: HashMap<String, Vec<String>>,
    ) -> Result<Vec<UnitSummary>, DriverError> {
        let options = ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        };
        let containers = with_deadline(
            "list",
            self.config.short_timeout,
            self.docker.list_containers(Some(options)).map_err(DriverError::from),
        )
        .await?;

        Ok(containers.into_iter().filter_map(unit_summary).collect())
    }

    /// Stop then remove one unit that uses an image being removed.
    async fn tear_down(&self, unit: &UnitSummary) -> Result<(), DriverError> {
        match self.stop(&unit.id, self.config.stop_grace).await {
            Ok(()) | Err(DriverError::UnitNotFound(_)) => {}
            Err(e) => return Err(e),
        }
        match self.remove(&unit.id, true).await {
            Ok(()) | Err(DriverError::UnitNotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Build the engine create payload for a unit.
pub fn container_config(spec: &UnitSpec, config: &EngineConfig) -> Config<String> {
    let log_config = HostConfigLogConfig {
        typ: Some("json-file".to_string()),
        config: Some(HashMap::from([
            ("max-size".to_string(), config.log_max_size.clone()),
            ("max-file".to_string(), config.log_max_file.clone()),
        ])),
    };

    Config {
        image: Some(spec.image.clone()),
        entrypoint: (!spec.entrypoint.is_empty()).then(|| spec.entrypoint.clone()),
        cmd: (!spec.cmd.is_empty()).then(|| spec.cmd.clone()),
        env: (!spec.env.is_empty()).then(|| spec.env.clone()),
        labels: Some(spec.labels.clone()),
        tty: Some(false),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        host_config: Some(HostConfig {
            log_config: Some(log_config),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Convert a listing entry, dropping entries without an id.
fn unit_summary(container: ContainerSummary) -> Option<UnitSummary> {
    let id = container.id?;
    let name = container
        .names
        .unwrap_or_default()
        .into_iter()
        .next()
        .map(|n| n.trim_start_matches('/').to_string())
        .unwrap_or_default();

    Some(UnitSummary {
        id,
        name,
        image: container.image.unwrap_or_default(),
        running: container.state.as_deref() == Some("running"),
    })
}

fn log_chunk(output: LogOutput) -> Option<LogChunk> {
    match output {
        LogOutput::StdOut { message } | LogOutput::Console { message } => {
            Some(LogChunk::stdout(message))
        }
        LogOutput::StdErr { message } => Some(LogChunk::stderr(message)),
        LogOutput::StdIn { .. } => None,
    }
}

#[async_trait]
impl ExecutionDriver for DockerDriver {
    async fn create(&self, spec: &UnitSpec) -> Result<String, DriverError> {
        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };
        let config = container_config(spec, &self.config);

        let response = with_deadline(
            "create",
            self.config.create_timeout,
            self.docker
                .create_container(Some(options), config)
                .map_err(DriverError::from),
        )
        .await?;

        for warning in &response.warnings {
            tracing::warn!(unit = %spec.name, warning = %warning, "Engine warning on create");
        }
        tracing::debug!(unit = %spec.name, unit_id = %response.id, "Unit created");
        Ok(response.id)
    }

    async fn start(&self, unit_id: &str) -> Result<(), DriverError> {
        with_deadline(
            "start",
            self.config.short_timeout,
            self.docker
                .start_container(unit_id, None::<StartContainerOptions<String>>)
                .map_err(DriverError::from),
        )
        .await
    }

    async fn stop(&self, unit_id: &str, grace: Duration) -> Result<(), DriverError> {
        let options = StopContainerOptions {
            t: grace.as_secs() as i64,
        };
        let result = with_deadline(
            "stop",
            self.config.stop_timeout,
            self.docker
                .stop_container(unit_id, Some(options))
                .map_err(DriverError::from),
        )
        .await;

        match result {
            // 304: already stopped.
            Err(DriverError::Engine { status: 304, .. }) => Ok(()),
            other => other,
        }
    }

    async fn wait(&self, unit_id: &str, condition: WaitCondition) -> Result<i64, DriverError> {
        let options = WaitContainerOptions {
            condition: condition.as_str().to_string(),
        };
        let mut responses = Box::pin(self.docker.wait_container(unit_id, Some(options)));
        let first = with_deadline("wait", self.config.wait_timeout, async {
            Ok::<_, DriverError>(responses.next().await)
        })
        .await?;

        match first {
            Some(Ok(response)) => Ok(response.status_code),
            // Non-zero exits arrive as an error carrying the code.
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(e.into()),
            None => self
                .inspect(unit_id)
                .await?
                .exit_code
                .ok_or_else(|| DriverError::Engine {
                    status: 500,
                    message: format!("wait on {unit_id} ended without an exit code"),
                }),
        }
    }

    async fn remove(&self, unit_id: &str, force: bool) -> Result<(), DriverError> {
        let options = RemoveContainerOptions {
            force,
            ..Default::default()
        };
        with_deadline(
            "remove",
            self.config.short_timeout,
            self.docker
                .remove_container(unit_id, Some(options))
                .map_err(DriverError::from),
        )
        .await
    }

    async fn inspect(&self, unit_id: &str) -> Result<UnitState, DriverError> {
        let response = with_deadline(
            "inspect",
            self.config.short_timeout,
            self.docker
                .inspect_container(unit_id, None::<InspectContainerOptions>)
                .map_err(DriverError::from),
        )
        .await?;

        let state = response.state.unwrap_or_default();
        let running = state.running.unwrap_or(false)
            || matches!(
                state.status,
                Some(ContainerStateStatusEnum::RUNNING | ContainerStateStatusEnum::RESTARTING)
            );

        Ok(UnitState {
            running,
            exit_code: if running { None } else { state.exit_code },
        })
    }

    async fn list_by_name_prefix(&self, prefix: &str) -> Result<Vec<UnitSummary>, DriverError> {
        // The engine's name filter is a substring match; narrow it here.
        let filters = HashMap::from([("name".to_string(), vec![prefix.to_string()])]);
        let mut units = self.list(filters).await?;
        units.retain(|u| u.name.starts_with(prefix));
        Ok(units)
    }

    async fn list_by_image(&self, image: &str) -> Result<Vec<UnitSummary>, DriverError> {
        let filters = HashMap::from([("ancestor".to_string(), vec![image.to_string()])]);
        self.list(filters).await
    }

    async fn remove_image(&self, image: &str) -> Result<(), DriverError> {
        let units = self.list_by_image(image).await?;
        for unit in &units {
            if let Err(e) = self.tear_down(unit).await {
                tracing::warn!(image, unit = %unit.name, error = %e, "Failed to tear down unit");
                if e.is_transient() {
                    return Err(e);
                }
                return Err(DriverError::ImageInUse {
                    image: image.to_string(),
                    reason: format!("unit {} could not be removed: {e}", unit.name),
                });
            }
        }

        let options = RemoveImageOptions {
            force: true,
            ..Default::default()
        };
        let result = with_deadline(
            "remove_image",
            self.config.short_timeout,
            self.docker
                .remove_image(image, Some(options), None)
                .map_err(DriverError::from),
        )
        .await;

        match result {
            Ok(_) => {
                tracing::info!(image, units = units.len(), "Image removed");
                Ok(())
            }
            Err(DriverError::UnitNotFound(_)) => Ok(()),
            Err(DriverError::UnitNameConflict(reason)) => Err(DriverError::ImageInUse {
                image: image.to_string(),
                reason,
            }),
            Err(e) => Err(e),
        }
    }

    async fn ping(&self) -> Result<(), DriverError> {
        with_deadline(
            "ping",
            self.config.short_timeout,
            self.docker.ping().map_ok(|_| ()).map_err(DriverError::from),
        )
        .await
    }

    async fn node_name(&self) -> Result<String, DriverError> {
        let info = with_deadline(
            "info",
            self.config.short_timeout,
            self.docker.info().map_err(DriverError::from),
        )
        .await?;
        Ok(info.name.unwrap_or_default())
    }

    fn open_log_stream(&self, unit_id: &str, follow: bool) -> LogStream {
        let options = LogsOptions::<String> {
            follow,
            stdout: true,
            stderr: true,
            tail: "all".to_string(),
            ..Default::default()
        };

        self.docker
            .logs(unit_id, Some(options))
            .map_err(DriverError::from)
            .try_filter_map(|output| async move { Ok(log_chunk(output)) })
            .boxed()
    }

    fn events(&self) -> EventStream {
        let options = EventsOptions::<String> {
            filters: subscription_filters(),
            ..Default::default()
        };

        self.docker
            .events(Some(options))
            .map_err(DriverError::from)
            .try_filter_map(|message| async move { Ok(unit_event_from_message(message)) })
            .boxed()
    }
}
