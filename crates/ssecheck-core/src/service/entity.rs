use std::sync::atomic::{AtomicBool, Ordering};

use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::{Map, Value};
use url::Url;

use crate::error::HarnessError;
use crate::logging::DebugLogger;

/// An object created inside the test service, addressed by its resource URL.
#[derive(Debug)]
pub struct RemoteEntity {
    http: Client,
    url: Url,
    description: String,
    logger: DebugLogger,
    closed: AtomicBool,
}

impl RemoteEntity {
    pub(crate) fn new(http: Client, url: Url, description: String, logger: DebugLogger) -> Self {
        Self {
            http,
            url,
            description,
            logger,
            closed: AtomicBool::new(false),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// POSTs `{"command": command, ...extra}` to the entity.
    ///
    /// `extra` must serialize to a JSON object or to null.
    pub async fn send_command<P: Serialize + ?Sized>(&self, command: &str, extra: &P) -> Result<(), HarnessError> {
        let mut body = match serde_json::to_value(extra)? {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(HarnessError::Protocol(format!(
                    "command parameters must be a JSON object, got {}",
                    other
                )))
            }
        };
        body.insert("command".to_string(), Value::String(command.to_string()));
        let body = Value::Object(body).to_string();
        self.logger
            .log(format!("Sending command to {}: {}", self.description, body));

        let response = self
            .http
            .post(self.url.clone())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() >= 300 {
            let text = response.text().await.unwrap_or_default();
            return Err(HarnessError::status(status.as_u16(), &text));
        }
        Ok(())
    }

    /// DELETEs the entity. Only 200 and 204 count as success.
    ///
    /// Calling this again after a first attempt does nothing.
    pub async fn close(&self) -> Result<(), HarnessError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.logger.log(format!("Closing {}", self.description));

        let response = self.http.delete(self.url.clone()).send().await?;
        match response.status() {
            StatusCode::OK | StatusCode::NO_CONTENT => Ok(()),
            status => {
                let text = response.text().await.unwrap_or_default();
                Err(HarnessError::status(status.as_u16(), &text))
            }
        }
    }
}
