//! Host platform settings over its local HTTP API.

use crate::config::TetherConfig;
use crate::traits::TetherSettings;
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, warn};

pub struct HttpTetherSettings {
    client: Client,
    base_url: String,
}

impl HttpTetherSettings {
    pub fn new(config: &TetherConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| Error::Settings(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.settings_api.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key)
    }

    async fn fetch(&self, key: &str) -> Result<Value> {
        let response = self
            .client
            .get(self.url(key))
            .send()
            .await
            .map_err(|e| Error::Settings(e.to_string()))?;
        if !response.status().is_success() {
            return Err(Error::Settings(format!("HTTP {}", response.status())));
        }
        response
            .json()
            .await
            .map_err(|e| Error::Settings(e.to_string()))
    }

    async fn store(&self, key: &str, value: &str) -> Result<Value> {
        let response = self
            .client
            .put(self.url(key))
            .json(&value)
            .send()
            .await
            .map_err(|e| Error::Settings(e.to_string()))?;
        if !response.status().is_success() {
            return Err(Error::Settings(format!("HTTP {}", response.status())));
        }
        response
            .json()
            .await
            .map_err(|e| Error::Settings(e.to_string()))
    }
}

/// Reads `{"value": ...}` or a bare JSON string.
pub fn setting_value(reply: &Value) -> Option<String> {
    match reply {
        Value::Object(map) => match map.get("value")? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(u8::from(*b).to_string()),
            _ => None,
        },
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

/// The settings API acknowledges a write with `{"status": "OK"}`.
pub fn put_accepted(reply: &Value) -> bool {
    reply.get("status").and_then(Value::as_str) == Some("OK")
}

#[async_trait]
impl TetherSettings for HttpTetherSettings {
    async fn get(&self, key: &str) -> Option<String> {
        match self.fetch(key).await {
            Ok(reply) => {
                let value = setting_value(&reply);
                debug!(key = %key, value = ?value, "host setting read");
                value
            }
            Err(e) => {
                warn!(key = %key, error = %e, "host setting read failed");
                None
            }
        }
    }

    async fn put(&self, key: &str, value: &str) -> bool {
        match self.store(key, value).await {
            Ok(reply) => {
                let ok = put_accepted(&reply);
                if !ok {
                    warn!(key = %key, reply = %reply, "host setting write not acknowledged");
                }
                ok
            }
            Err(e) => {
                warn!(key = %key, error = %e, "host setting write failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn value_shapes() {
        assert_eq!(setting_value(&json!({"value": "2"})).as_deref(), Some("2"));
        assert_eq!(setting_value(&json!({"value": 1})).as_deref(), Some("1"));
        assert_eq!(setting_value(&json!("0")).as_deref(), Some("0"));
        assert_eq!(setting_value(&json!({"other": "x"})), None);
        assert_eq!(setting_value(&json!(null)), None);
    }

    #[test]
    fn acknowledgement() {
        assert!(put_accepted(&json!({"status": "OK"})));
        assert!(!put_accepted(&json!({"status": "ERROR"})));
        assert!(!put_accepted(&json!("OK")));
    }

    #[test]
    fn key_is_appended_to_the_base_url() {
        let cfg = TetherConfig {
            settings_api: "http://127.0.0.1/api/settings/".into(),
            ..TetherConfig::default()
        };
        let s = HttpTetherSettings::new(&cfg).unwrap();
        assert_eq!(s.url("EnableTethering"), "http://127.0.0.1/api/settings/EnableTethering");
    }
}
