//! Client for the Syskit control service.
//!
//! The service exposes a small REST API under `/api/` for deployment
//! discovery, registration, and command-line retrieval. Every call goes
//! through one envelope that checks the status code and turns failures into
//! errors naming the method, URI, and server-side message.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{Error, Result};
use crate::shell::Shell;

/// Default control-service endpoint.
pub const DEFAULT_URL: &str = "http://localhost:20202";
/// Delay between liveness checks in [`Connection::connect`].
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// One task of an available deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployedTask {
    pub task_name: String,
    pub task_model_name: String,
}

/// A deployment the control service knows how to start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailableDeployment {
    pub name: String,
    pub project_name: String,
    #[serde(default)]
    pub tasks: Vec<DeployedTask>,
    #[serde(default)]
    pub default_deployment_for: Option<String>,
    #[serde(default)]
    pub default_logger: Option<String>,
}

/// Everything needed to start a registered deployment's process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandLine {
    #[serde(default)]
    pub env: HashMap<String, String>,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub working_directory: PathBuf,
}

#[derive(Deserialize)]
struct DeploymentList {
    deployments: Vec<AvailableDeployment>,
}

#[derive(Deserialize)]
struct Registration {
    registered_deployment: u64,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// Connection to a Syskit control service.
#[derive(Debug, Clone)]
pub struct Connection {
    client: reqwest::Client,
    base: Url,
    poll_interval: Duration,
}

impl Connection {
    /// Creates a connection to the service at `url` (e.g. `http://localhost:20202`).
    pub fn new(url: &str) -> Result<Self> {
        let invalid = |message: String| Error::InvalidUrl {
            url: url.to_string(),
            message,
        };
        let base = Url::parse(&format!("{}/api/", url.trim_end_matches('/')))
            .map_err(|e| invalid(e.to_string()))?;
        if base.cannot_be_a_base() {
            return Err(invalid("not a base URL".to_string()));
        }
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| invalid(e.to_string()))?;
        Ok(Self {
            client,
            base,
            poll_interval: POLL_INTERVAL,
        })
    }

    /// Sets the delay between liveness checks, at least one millisecond.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(MIN_POLL_INTERVAL);
        self
    }

    /// Base URI of the REST API, ending in `/api/`.
    pub fn uri(&self) -> &Url {
        &self.base
    }

    /// Sends a single liveness check. Never fails: any transport error or
    /// unexpected status is reported as `false`.
    pub async fn attempt_connection(&self) -> bool {
        match self
            .call(Method::GET, StatusCode::OK, "ping", &[("value", "42")])
            .await
        {
            Ok(_) => true,
            Err(err) => {
                tracing::debug!("syskit liveness check failed: {err}");
                false
            }
        }
    }

    /// Polls the service until it answers or `token` is cancelled.
    ///
    /// Checks never overlap: the next tick is only awaited once the previous
    /// check finished. Cancelling drops a check still in flight, so the call
    /// settles even if the service accepts connections and never answers.
    pub async fn connect(&self, token: &CancellationToken) -> Result<()> {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let connected = tokio::select! {
                biased;
                _ = token.cancelled() => false,
                _ = ticker.tick() => tokio::select! {
                    biased;
                    _ = token.cancelled() => false,
                    connected = self.attempt_connection() => connected,
                },
            };
            if connected {
                tracing::info!(uri = %self.base, "connected to syskit");
                return Ok(());
            }
            if token.is_cancelled() {
                tracing::debug!(uri = %self.base, "syskit connection interrupted");
                return Err(Error::Interrupted);
            }
        }
    }

    /// Lists the deployments the service can start.
    pub async fn available_deployments(&self) -> Result<Vec<AvailableDeployment>> {
        let list: DeploymentList = self
            .call_json(Method::GET, StatusCode::OK, "syskit/deployments/available", &[])
            .await?;
        Ok(list.deployments)
    }

    /// Registers deployment model `model_name` under `task_name` and returns
    /// the registration ID.
    pub async fn register_deployment(&self, model_name: &str, task_name: &str) -> Result<u64> {
        let registration: Registration = self
            .call_json(
                Method::POST,
                StatusCode::CREATED,
                "syskit/deployments",
                &[("name", model_name), ("as", task_name)],
            )
            .await?;
        Ok(registration.registered_deployment)
    }

    /// Returns how to start a previously registered deployment.
    pub async fn command_line(&self, deployment_id: u64) -> Result<CommandLine> {
        self.call_json(
            Method::GET,
            StatusCode::OK,
            &format!("syskit/deployments/{deployment_id}/command_line"),
            &[],
        )
        .await
    }

    /// Deregisters every deployment.
    pub async fn clear(&self) -> Result<()> {
        self.call(Method::DELETE, StatusCode::NO_CONTENT, "syskit/deployments", &[])
            .await
            .map(drop)
    }

    /// Asks the service to shut down.
    pub async fn quit(&self) -> Result<()> {
        self.call(Method::POST, StatusCode::CREATED, "quit", &[])
            .await
            .map(drop)
    }

    async fn call_json<T: DeserializeOwned>(
        &self,
        method: Method,
        expected: StatusCode,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        let (uri, body) = self.call(method.clone(), expected, path, query).await?;
        serde_json::from_str(&body).map_err(|e| Error::Transport {
            method: method.to_string(),
            uri: uri.to_string(),
            message: format!("invalid response: {e}"),
        })
    }

    async fn call(
        &self,
        method: Method,
        expected: StatusCode,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<(Url, String)> {
        let mut uri = self.base.join(path).map_err(|e| Error::InvalidUrl {
            url: format!("{}{path}", self.base),
            message: e.to_string(),
        })?;
        if !query.is_empty() {
            uri.query_pairs_mut().extend_pairs(query);
        }

        let transport = |message: String| Error::Transport {
            method: method.to_string(),
            uri: uri.to_string(),
            message,
        };
        let response = self
            .client
            .request(method.clone(), uri.clone())
            .send()
            .await
            .map_err(|e| transport(e.to_string()))?;
        let status = response.status();
        let body = response.text().await.map_err(|e| transport(e.to_string()))?;

        if status != expected {
            let message = serde_json::from_str::<ErrorBody>(&body)
                .map(|b| b.error)
                .unwrap_or_else(|_| body.clone());
            return Err(Error::UnexpectedStatus {
                method: method.to_string(),
                uri: uri.to_string(),
                status: status.as_u16(),
                message,
            });
        }
        Ok((uri, body))
    }
}

/// Lists the available deployments sorted by name and lets the user pick one.
///
/// Returns `None` when the user dismisses the selection.
pub async fn pick_deployment(
    connection: &Connection,
    shell: &dyn Shell,
) -> Result<Option<AvailableDeployment>> {
    let mut deployments = connection.available_deployments().await?;
    deployments.sort_by(|a, b| a.name.cmp(&b.name));
    let labels: Vec<String> = deployments
        .iter()
        .map(|d| match &d.default_deployment_for {
            Some(model) => format!("{} ({})", d.name, model),
            None => d.name.clone(),
        })
        .collect();
    let choice = shell.quick_pick("Select a deployment", &labels).await;
    Ok(choice.and_then(|index| deployments.into_iter().nth(index)))
}
