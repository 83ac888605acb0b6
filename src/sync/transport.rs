use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};

use crate::error::{FleetError, Result};
use crate::host::Host;

/// Host-to-host transfer of job files and commands, addressed by `ip:port`.
#[async_trait]
pub trait HostTransport: Send + Sync {
    async fn send_definition(&self, target: &Host, job_name: &str, contents: Vec<u8>) -> Result<()>;

    async fn send_dependency(
        &self,
        target: &Host,
        job_name: &str,
        file_name: &str,
        contents: Vec<u8>,
    ) -> Result<()>;

    /// Ask `target` to load a job whose files it already holds.
    ///
    /// A target refusing the job answers [`FleetError::LoadRejected`].
    async fn load_job(&self, target: &Host, job_name: &str) -> Result<()>;

    /// Ask `source` to push all of its jobs to `requester`.
    async fn request_pull(&self, source: &Host, requester: &Host) -> Result<()>;

    /// Ask `source` to push one job to `target`.
    async fn request_job_push(&self, source: &Host, job_name: &str, target: &Host) -> Result<()>;
}

/// [`HostTransport`] over the HTTP endpoints served by [`crate::api`].
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    timeout: Duration,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("jobfleet/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FleetError::Internal(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self { client, timeout })
    }

    fn url(host: &Host, path: &str) -> String {
        format!("http://{}{}", host.addr(), path)
    }

    async fn check(host: &Host, response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(FleetError::Transport(format!(
            "{} answered {}: {}",
            host, status, body
        )))
    }
}

#[async_trait]
impl HostTransport for HttpTransport {
    async fn send_definition(&self, target: &Host, job_name: &str, contents: Vec<u8>) -> Result<()> {
        let url = Self::url(target, &format!("/internal/jobs/{}/definition", job_name));
        let response = self.client.put(url).body(contents).send().await?;
        Self::check(target, response).await?;
        Ok(())
    }

    async fn send_dependency(
        &self,
        target: &Host,
        job_name: &str,
        file_name: &str,
        contents: Vec<u8>,
    ) -> Result<()> {
        let url = Self::url(
            target,
            &format!("/internal/jobs/{}/dependencies/{}", job_name, file_name),
        );
        let response = self.client.put(url).body(contents).send().await?;
        Self::check(target, response).await?;
        Ok(())
    }

    async fn load_job(&self, target: &Host, job_name: &str) -> Result<()> {
        let url = Self::url(target, &format!("/internal/jobs/{}/load", job_name));
        let response = self.client.post(url).send().await?;

        if response.status() == StatusCode::UNPROCESSABLE_ENTITY {
            let reason = response.text().await.unwrap_or_default();
            return Err(FleetError::LoadRejected {
                job: job_name.to_string(),
                host: target.to_string(),
                reason,
            });
        }
        Self::check(target, response).await?;
        Ok(())
    }

    async fn request_pull(&self, source: &Host, requester: &Host) -> Result<()> {
        let url = Self::url(source, "/internal/pull");
        let response = self.client.post(url).json(requester).send().await?;
        Self::check(source, response).await?;
        Ok(())
    }

    async fn request_job_push(&self, source: &Host, job_name: &str, target: &Host) -> Result<()> {
        let url = Self::url(source, &format!("/internal/jobs/{}/push", job_name));
        let response = self.client.post(url).json(target).send().await?;
        Self::check(source, response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_host_is_transport_error() {
        let transport = HttpTransport::new(Duration::from_millis(500)).unwrap();
        // Port 9 (discard) on loopback is almost never listening
        let host = Host::new("nowhere", None, 9);
        let err = transport.load_job(&host, "report").await.unwrap_err();
        assert!(matches!(err, FleetError::Transport(_)));
    }

    #[test]
    fn urls_use_host_address() {
        let host = Host::new("b", Some("10.0.0.2".parse().unwrap()), 8080);
        assert_eq!(
            HttpTransport::url(&host, "/internal/pull"),
            "http://10.0.0.2:8080/internal/pull"
        );
    }
}
