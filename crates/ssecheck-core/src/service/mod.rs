//! Client for the test service's control protocol.
//!
//! - `GET <service>` returns the service's capabilities; polled at startup
//! - `POST <service>` creates an entity, whose URL comes back in `Location`
//! - `POST <entity>` sends a command, `DELETE <entity>` disposes of it
//! - `DELETE <service>` asks the service to exit

mod entity;

pub use entity::RemoteEntity;

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use reqwest::header::LOCATION;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::ServiceConfig;
use crate::error::HarnessError;
use crate::logging::DebugLogger;

/// What the test service reports about itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceInfo {
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// Set of named optional behaviors supported by the test service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities(BTreeSet<String>);

impl Capabilities {
    pub fn has(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for Capabilities {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// Connection to a running test service.
#[derive(Debug, Clone)]
pub struct TestServiceClient {
    http: Client,
    url: Url,
    info: ServiceInfo,
}

impl TestServiceClient {
    /// Waits for the service to answer `GET` and reads its info.
    ///
    /// Connection failures are retried with a doubling interval until the startup timeout
    /// elapses. Any response other than 200 ends the wait with an error.
    pub async fn connect(config: &ServiceConfig) -> Result<Self, HarnessError> {
        let url = Url::parse(&config.url)?;
        let http = Client::new();
        let deadline = Instant::now() + config.startup_timeout();
        let mut interval = config.poll_interval();

        let response = loop {
            match http.get(url.clone()).send().await {
                Ok(response) => break response,
                Err(e) => {
                    if Instant::now() >= deadline {
                        return Err(HarnessError::Transport(format!(
                            "test service at {} did not respond within {:?}: {}",
                            url,
                            config.startup_timeout(),
                            e
                        )));
                    }
                    tracing::debug!(%url, "Test service not ready yet: {}", e);
                    tokio::time::sleep(interval).await;
                    interval = (interval * 2).min(config.max_poll_interval());
                }
            }
        };

        let status = response.status();
        let body = response.text().await?;
        if status != StatusCode::OK {
            return Err(HarnessError::status(status.as_u16(), &body));
        }
        let info = parse_info(&body)?;
        tracing::info!(%url, capabilities = ?info.capabilities, "Connected to test service");

        Ok(Self { http, url, info })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn info(&self) -> &ServiceInfo {
        &self.info
    }

    pub fn capabilities(&self) -> Capabilities {
        self.info.capabilities.iter().cloned().collect()
    }

    pub fn has_capability(&self, name: &str) -> bool {
        self.info.capabilities.iter().any(|c| c == name)
    }

    /// Names from `all` that the service does not support.
    pub fn missing_capabilities(&self, all: &[&str]) -> Vec<String> {
        all.iter()
            .filter(|name| !self.has_capability(name))
            .map(|name| name.to_string())
            .collect()
    }

    /// Asks the service to create an entity described by `params`.
    ///
    /// The response must be 2xx with a `Location` header. A location that is not an absolute
    /// URL is appended to the service URL, keeping any path the service URL has.
    pub async fn create_entity<P: Serialize + ?Sized>(
        &self,
        params: &P,
        description: &str,
        logger: &DebugLogger,
    ) -> Result<RemoteEntity, HarnessError> {
        let body = serde_json::to_string(params)?;
        logger.log(format!("Creating {} with parameters: {}", description, body));

        let response = self
            .http
            .post(self.url.clone())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(HarnessError::status(status.as_u16(), &text));
        }

        let location = location.filter(|l| !l.is_empty()).ok_or(HarnessError::MissingLocation)?;
        let resource = resolve_location(&self.url, &location)?;
        logger.log(format!("Created {} at {}", description, resource));

        Ok(RemoteEntity::new(
            self.http.clone(),
            resource,
            description.to_string(),
            logger.clone(),
        ))
    }

    /// Asks the service to exit. A dropped connection counts as success.
    pub async fn stop_service(&self) -> Result<(), HarnessError> {
        match self.http.delete(self.url.clone()).send().await {
            Ok(response) if response.status().as_u16() >= 300 => {
                let status = response.status().as_u16();
                let text = response.text().await.unwrap_or_default();
                Err(HarnessError::status(status, &text))
            }
            Ok(_) => Ok(()),
            Err(e) => {
                tracing::debug!("Ignoring error from service shutdown request: {}", e);
                Ok(())
            }
        }
    }
}

fn parse_info(body: &str) -> Result<ServiceInfo, HarnessError> {
    if body.trim().is_empty() {
        return Ok(ServiceInfo::default());
    }
    serde_json::from_str(body).map_err(|e| HarnessError::MalformedResponse(e.to_string()))
}

fn resolve_location(base: &Url, location: &str) -> Result<Url, HarnessError> {
    match Url::parse(location) {
        Ok(url) => Ok(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let root = base.as_str().trim_end_matches('/');
            let separator = if location.starts_with('/') { "" } else { "/" };
            Ok(Url::parse(&format!("{}{}{}", root, separator, location))?)
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_info() {
        let info = parse_info(r#"{"capabilities": ["comments", "restart"]}"#).unwrap();
        assert_eq!(info.capabilities, vec!["comments", "restart"]);

        assert!(parse_info("").unwrap().capabilities.is_empty());
        assert!(parse_info("{}").unwrap().capabilities.is_empty());
        assert!(matches!(
            parse_info("not json"),
            Err(HarnessError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_capabilities() {
        let caps: Capabilities = ["comments", "restart"].into_iter().collect();
        assert!(caps.has("comments"));
        assert!(!caps.has("headers"));
        assert_eq!(caps.len(), 2);
        assert_eq!(caps.iter().collect::<Vec<_>>(), vec!["comments", "restart"]);
    }

    #[test]
    fn test_resolve_location() {
        let root = Url::parse("http://localhost:8000").unwrap();
        let nested = Url::parse("http://localhost:8000/sse/").unwrap();

        let resolved = |base: &Url, loc: &str| resolve_location(base, loc).unwrap().to_string();
        assert_eq!(resolved(&root, "/clients/1"), "http://localhost:8000/clients/1");
        assert_eq!(resolved(&nested, "/clients/1"), "http://localhost:8000/sse/clients/1");
        assert_eq!(resolved(&nested, "clients/1"), "http://localhost:8000/sse/clients/1");
        assert_eq!(resolved(&nested, "http://other:9/c/2"), "http://other:9/c/2");
    }
}
