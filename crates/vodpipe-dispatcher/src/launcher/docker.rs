//! Docker Engine API launcher.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use vodpipe_models::JobSpec;

use super::{job_environment, TaskLauncher};
use crate::error::{DispatchError, DispatchResult};

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct CreateContainerRequest<'a> {
    image: &'a str,
    env: Vec<String>,
    labels: HashMap<&'static str, String>,
    host_config: HostConfig<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct HostConfig<'a> {
    auto_remove: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    network_mode: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateContainerResponse {
    id: String,
    #[serde(default)]
    warnings: Option<Vec<String>>,
}

/// Runs each job in its own auto-removed container.
pub struct DockerLauncher {
    http: Client,
    base_url: String,
    image: String,
    network: Option<String>,
    forwarded_env: Vec<(String, String)>,
}

impl DockerLauncher {
    pub fn new(
        host_url: impl Into<String>,
        image: impl Into<String>,
        network: Option<String>,
        forwarded_env: Vec<(String, String)>,
    ) -> DispatchResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| DispatchError::config_error(format!("Failed to build Docker client: {}", e)))?;

        Ok(Self {
            http,
            base_url: host_url.into().trim_end_matches('/').to_string(),
            image: image.into(),
            network,
            forwarded_env,
        })
    }

    fn create_request(&self, spec: &JobSpec) -> CreateContainerRequest<'_> {
        let env = job_environment(spec, &self.forwarded_env)
            .into_iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        let mut labels = HashMap::new();
        labels.insert("vodpipe.source_bucket", spec.source_bucket.clone());
        labels.insert("vodpipe.video_key", spec.video_key.clone());
        labels.insert("vodpipe.output_prefix", spec.output_prefix.clone());

        CreateContainerRequest {
            image: &self.image,
            env,
            labels,
            host_config: HostConfig {
                auto_remove: true,
                network_mode: self.network.as_deref(),
            },
        }
    }

    async fn create(&self, spec: &JobSpec) -> DispatchResult<String> {
        let url = format!("{}/containers/create", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&self.create_request(spec))
            .send()
            .await
            .map_err(|e| DispatchError::launch(format!("Docker create request failed: {}", e)))?;

        let status = response.status();
        if status != StatusCode::CREATED && status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(DispatchError::launch(format!(
                "Docker create returned {}: {}",
                status,
                body.trim()
            )));
        }

        let created: CreateContainerResponse = response
            .json()
            .await
            .map_err(|e| DispatchError::launch(format!("Invalid Docker create response: {}", e)))?;
        for warning in created.warnings.unwrap_or_default() {
            warn!(container_id = %created.id, "Docker warning: {}", warning);
        }
        Ok(created.id)
    }

    async fn start(&self, container_id: &str) -> DispatchResult<()> {
        let url = format!("{}/containers/{}/start", self.base_url, container_id);
        let response = self
            .http
            .post(&url)
            .send()
            .await
            .map_err(|e| DispatchError::launch(format!("Docker start request failed: {}", e)))?;

        match response.status() {
            // 304: already running
            StatusCode::NO_CONTENT | StatusCode::NOT_MODIFIED => Ok(()),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(DispatchError::launch(format!(
                    "Docker start of {} returned {}: {}",
                    container_id,
                    status,
                    body.trim()
                )))
            }
        }
    }
}

#[async_trait]
impl TaskLauncher for DockerLauncher {
    fn kind(&self) -> &'static str {
        "docker"
    }

    async fn launch(&self, spec: &JobSpec) -> DispatchResult<String> {
        let container_id = self.create(spec).await?;
        debug!(container_id = %container_id, "Created job container");
        self.start(&container_id).await?;
        info!(
            container_id = %container_id,
            image = %self.image,
            output_prefix = %spec.output_prefix,
            "Started job container"
        );
        Ok(container_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vodpipe_models::validate_key;

    #[test]
    fn test_create_request_shape() {
        let launcher = DockerLauncher::new(
            "http://docker:2375/",
            "vodpipe-job:1",
            Some("vodpipe".to_string()),
            vec![("S3_REGION".to_string(), "auto".to_string())],
        )
        .unwrap();
        let identity = validate_key("alice###trip.mp4").unwrap();
        let spec = JobSpec::new(&identity, "B", "alice###trip.mp4", "D", 7).with_watermark("logos/alice.png");

        let body = serde_json::to_value(launcher.create_request(&spec)).unwrap();

        assert_eq!(launcher.base_url, "http://docker:2375");
        assert_eq!(body["Image"], "vodpipe-job:1");
        assert_eq!(body["HostConfig"]["AutoRemove"], true);
        assert_eq!(body["HostConfig"]["NetworkMode"], "vodpipe");
        assert_eq!(body["Labels"]["vodpipe.output_prefix"], "processed/alice###trip-7/");
        let env: Vec<&str> = body["Env"].as_array().unwrap().iter().map(|v| v.as_str().unwrap()).collect();
        assert!(env.contains(&"S3_REGION=auto"));
        assert!(env.contains(&"VIDEO_KEY=alice###trip.mp4"));
        assert!(env.contains(&"WATERMARK_KEY=logos/alice.png"));
    }
}
