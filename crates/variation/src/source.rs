use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_types::{FactorBundle, FactorSource, SimError, VariationFactor};

const SOURCE_HEADER: &str = "X-Analysis-Source";
const UPDATED_HEADER: &str = "X-Updated-At";

/// Client for the news-analysis endpoint. The envelope is decoded
/// leniently: the bundle survives malformed entries, unknown sources stay
/// opaque strings, and transport failures surface as the non-fatal
/// `FactorSource` error so callers can fall back to the last known set.
pub struct HttpFactorSource {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpFactorSource {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, SimError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|err| SimError::FactorSource(format!("client build failed: {err}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl FactorSource for HttpFactorSource {
    async fn fetch(&self) -> Result<FactorBundle, SimError> {
        let resp = self
            .client
            .get(&self.endpoint)
            .send()
            .await
            .map_err(|err| SimError::FactorSource(err.to_string()))?
            .error_for_status()
            .map_err(|err| SimError::FactorSource(err.to_string()))?;

        let header_source = header_string(&resp, SOURCE_HEADER);
        let header_updated = header_string(&resp, UPDATED_HEADER);

        let body = resp
            .json::<serde_json::Value>()
            .await
            .map_err(|err| SimError::FactorSource(format!("non-JSON body: {err}")))?;

        Ok(decode_envelope(&body, header_source, header_updated))
    }
}

fn header_string(resp: &reqwest::Response, name: &str) -> Option<String> {
    resp.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Decodes the `{factors, source, updatedAt}` envelope. Headers win over
/// body fields; entries that fail to decode are dropped silently.
pub fn decode_envelope(
    body: &serde_json::Value,
    header_source: Option<String>,
    header_updated: Option<String>,
) -> FactorBundle {
    let mut factors = Vec::new();
    if let Some(items) = body.get("factors").and_then(|v| v.as_array()) {
        for item in items {
            match serde_json::from_value::<VariationFactor>(item.clone()) {
                Ok(factor) => factors.push(factor),
                Err(err) => {
                    tracing::debug!(%err, "dropping malformed variation factor");
                }
            }
        }
    }

    let source = header_source
        .or_else(|| {
            body.get("source")
                .and_then(|v| v.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| "unknown".to_string());

    let updated_at = header_updated
        .or_else(|| {
            body.get("updatedAt")
                .and_then(|v| v.as_str())
                .map(str::to_string)
        })
        .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
        .map(|dt| dt.with_timezone(&Utc));

    FactorBundle {
        factors,
        source,
        updated_at,
    }
}
