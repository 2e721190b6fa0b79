use super::ContainerRuntime;
use crate::config::ProbeProfile;
use crate::error::{Error, Result};
use crate::types::{ContainerSummary, LifecycleEvent};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::CreateImageOptions;
use bollard::models::{EventMessage, HostConfig};
use bollard::system::EventsOptions;
use bollard::Docker;
use futures_util::stream::StreamExt;
use log::{debug, error, info, warn};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;

const RECONNECT_DELAY: Duration = Duration::from_secs(2);

#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connects to the local Docker daemon (unix socket on Linux) and
    /// checks that it answers.
    pub async fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()?;
        docker.ping().await?;
        Ok(Self { docker })
    }

    /// Pulls `image` if the daemon does not have it yet.
    async fn ensure_image(&self, image: &str) -> Result<()> {
        match self.docker.inspect_image(image).await {
            Ok(_) => return Ok(()),
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => {}
            Err(e) => return Err(e.into()),
        }

        info!("Pulling image {}", image);
        let opts = CreateImageOptions::<String> {
            from_image: image.to_string(),
            ..Default::default()
        };
        let mut pull = self.docker.create_image(Some(opts), None, None);
        while let Some(progress) = pull.next().await {
            let progress = progress?;
            if let Some(status) = progress.status {
                debug!("{}: {}", image, status);
            }
        }
        Ok(())
    }

    async fn start_and_collect(&self, id: &str) -> Result<Vec<u8>> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await?;

        let mut wait = self
            .docker
            .wait_container(id, None::<WaitContainerOptions<String>>);
        while let Some(status) = wait.next().await {
            match status {
                Ok(_) => {}
                // A non-zero exit still produced output worth parsing.
                Err(BollardError::DockerContainerWaitError { code, .. }) => {
                    debug!("Container {} exited with code {}", id, code);
                }
                Err(e) => return Err(e.into()),
            }
        }

        let opts = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            tail: "all".to_string(),
            ..Default::default()
        };
        let mut logs = self.docker.logs(id, Some(opts));
        let mut out = Vec::new();
        while let Some(chunk) = logs.next().await {
            out.extend_from_slice(&chunk?.into_bytes());
        }
        Ok(out)
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>> {
        let opts = ListContainersOptions::<String> {
            all: false,
            ..Default::default()
        };
        let containers = self.docker.list_containers(Some(opts)).await?;
        Ok(containers
            .into_iter()
            .filter_map(|c| {
                Some(ContainerSummary {
                    id: c.id?,
                    names: c.names.unwrap_or_default(),
                })
            })
            .collect())
    }

    async fn inspect_name(&self, id: &str) -> Result<String> {
        let detail = self.docker.inspect_container(id, None).await?;
        detail.name.ok_or_else(|| Error::Resolve {
            id: id.to_string(),
            reason: "container has no name".into(),
        })
    }

    async fn run_output(&self, profile: &ProbeProfile) -> Result<Vec<u8>> {
        self.ensure_image(&profile.image).await?;

        let config = Config::<String> {
            image: Some(profile.image.clone()),
            cmd: Some(profile.cmd.clone()),
            env: Some(profile.env.clone()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            host_config: Some(HostConfig {
                privileged: Some(profile.privileged),
                network_mode: Some(profile.network_mode.clone()),
                binds: Some(profile.binds.clone()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let created = self
            .docker
            .create_container(None::<CreateContainerOptions<String>>, config)
            .await?;
        let id = created.id;
        debug!("Created probe container {}", id);

        let output = self.start_and_collect(&id).await;

        let rm = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        if let Err(e) = self.docker.remove_container(&id, Some(rm)).await {
            warn!("Failed to remove probe container {}: {}", id, e);
        }

        output
    }

    async fn watch_events(&self, tx: mpsc::Sender<LifecycleEvent>) -> Result<()> {
        loop {
            let opts = EventsOptions::<String> {
                filters: [
                    ("type", ["container"].as_slice()),
                    ("event", ["start", "die"].as_slice()),
                ]
                .iter()
                .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
                .collect(),
                ..Default::default()
            };

            let mut stream = self.docker.events(Some(opts));

            info!("Watching for Docker events");
            while let Some(msg) = stream.next().await {
                match msg {
                    Ok(event) => {
                        let Some(event) = lifecycle_event(event) else {
                            continue;
                        };
                        if tx.send(event).await.is_err() {
                            info!("Event receiver closed, stopping Docker watch");
                            return Ok(());
                        }
                    }
                    Err(e) => {
                        error!("Error in Docker event stream: {}", e);
                        break;
                    }
                }
            }

            if tx.is_closed() {
                return Ok(());
            }
            warn!(
                "Docker event stream ended. Reconnecting in {:?}...",
                RECONNECT_DELAY
            );
            sleep(RECONNECT_DELAY).await;
        }
    }
}

fn lifecycle_event(event: EventMessage) -> Option<LifecycleEvent> {
    let actor = event.actor?;
    let id = actor.id.filter(|id| !id.is_empty())?;
    let action = event.action.unwrap_or_default();
    let from = actor
        .attributes
        .and_then(|mut attrs| attrs.remove("image"))
        .unwrap_or_default();
    Some(LifecycleEvent::new(id, action.as_str(), from))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bollard::models::EventActor;
    use std::collections::HashMap;

    #[test]
    fn maps_container_event() {
        let mut attrs = HashMap::new();
        attrs.insert("image".to_string(), "nginx:latest".to_string());
        attrs.insert("name".to_string(), "web1".to_string());
        let msg = EventMessage {
            action: Some("start".into()),
            actor: Some(EventActor {
                id: Some("abc123456789deadbeef".into()),
                attributes: Some(attrs),
            }),
            ..Default::default()
        };
        let ev = lifecycle_event(msg).unwrap();
        assert_eq!(ev.short_id(), "abc123456789");
        assert_eq!(ev.status, crate::types::EventStatus::Start);
        assert_eq!(ev.from, "nginx:latest");
    }

    #[test]
    fn drops_event_without_actor_id() {
        let msg = EventMessage {
            action: Some("die".into()),
            actor: Some(EventActor {
                id: None,
                attributes: None,
            }),
            ..Default::default()
        };
        assert!(lifecycle_event(msg).is_none());
    }
}
