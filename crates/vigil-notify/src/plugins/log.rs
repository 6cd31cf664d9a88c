use std::collections::HashMap;

use async_trait::async_trait;

use vigil_common::ActionRequest;

use crate::ActionExecutor;

/// Writes the alert to the process log. Mostly useful as a last-resort
/// binding and in development setups.
pub struct LogExecutor;

#[async_trait]
impl ActionExecutor for LogExecutor {
    fn name(&self) -> &str {
        "log"
    }

    fn default_properties(&self) -> HashMap<String, String> {
        [("level".to_string(), "info".to_string())]
            .into_iter()
            .collect()
    }

    async fn execute(
        &self,
        request: &ActionRequest,
        properties: &HashMap<String, String>,
    ) -> anyhow::Result<()> {
        let alert = &request.alert;
        let level = properties.get("level").map(String::as_str).unwrap_or("info");
        match level {
            "error" => tracing::error!(
                tenant_id = %alert.tenant_id,
                trigger_id = %alert.trigger_id,
                alert_id = %alert.alert_id,
                severity = %alert.severity,
                "Alert notification"
            ),
            "warn" => tracing::warn!(
                tenant_id = %alert.tenant_id,
                trigger_id = %alert.trigger_id,
                alert_id = %alert.alert_id,
                severity = %alert.severity,
                "Alert notification"
            ),
            _ => tracing::info!(
                tenant_id = %alert.tenant_id,
                trigger_id = %alert.trigger_id,
                alert_id = %alert.alert_id,
                severity = %alert.severity,
                "Alert notification"
            ),
        }
        Ok(())
    }
}
