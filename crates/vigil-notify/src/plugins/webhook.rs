use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;

use vigil_common::ActionRequest;

use crate::ActionExecutor;

/// Sends the alert as JSON to the URL carried in the action's `url`
/// property. Delivery is a single best-effort attempt; a failure is reported
/// to the dispatcher, which logs it and moves on.
pub struct WebhookExecutor {
    client: reqwest::Client,
}

impl WebhookExecutor {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for WebhookExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ActionExecutor for WebhookExecutor {
    fn name(&self) -> &str {
        "webhook"
    }

    fn default_properties(&self) -> HashMap<String, String> {
        [
            ("url".to_string(), String::new()),
            ("method".to_string(), "POST".to_string()),
            ("timeout_secs".to_string(), "10".to_string()),
        ]
        .into_iter()
        .collect()
    }

    async fn execute(
        &self,
        request: &ActionRequest,
        properties: &HashMap<String, String>,
    ) -> anyhow::Result<()> {
        let url = properties
            .get("url")
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("webhook action is missing the 'url' property"))?;
        let method = properties
            .get("method")
            .map(String::as_str)
            .unwrap_or("POST");
        let method = Method::from_str(&method.to_uppercase())
            .map_err(|_| anyhow::anyhow!("invalid webhook method '{method}'"))?;
        let timeout_secs: u64 = properties
            .get("timeout_secs")
            .and_then(|v| v.parse().ok())
            .unwrap_or(10);

        let body = serde_json::to_string(&request.alert)?;

        let response = self
            .client
            .request(method, url.as_str())
            .header("Content-Type", "application/json")
            .timeout(Duration::from_secs(timeout_secs))
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("webhook returned HTTP {status}");
        }
        Ok(())
    }
}
