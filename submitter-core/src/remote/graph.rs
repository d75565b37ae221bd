use super::envelope;
use super::{DeleteResult, IndicatorApi, SubmitResult};
use crate::auth::truncate;
use crate::config::EndpointsConfig;
use crate::error::RemoteError;
use crate::types::WireRecord;
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::Serialize;
use serde_json::Value;

#[derive(Serialize)]
struct ValueBody<'a, T> {
  value: &'a [T],
}

pub struct GraphClient {
  client: Client,
  graph_base: String,
}

impl GraphClient {
  pub fn new(endpoints: &EndpointsConfig) -> anyhow::Result<Self> {
    let client = Client::builder()
      .timeout(endpoints.timeout())
      .user_agent(format!("tisubmit/{}", env!("CARGO_PKG_VERSION")))
      .build()?;
    Ok(Self {
      client,
      graph_base: endpoints.graph_base(),
    })
  }

  pub fn submit_url(&self) -> String {
    format!("{}/security/tiIndicators/submitTiIndicators", self.graph_base)
  }

  pub fn delete_url(&self) -> String {
    format!(
      "{}/security/tiIndicators/deleteTiIndicatorsByExternalId",
      self.graph_base
    )
  }

  fn post_json<T: Serialize>(
    &self,
    operation: &'static str,
    url: &str,
    token: &str,
    items: &[T],
  ) -> Result<Value, RemoteError> {
    let response = self
      .client
      .post(url)
      .bearer_auth(token)
      .header(CONTENT_TYPE, "application/json")
      .header(ACCEPT, "application/json")
      .json(&ValueBody { value: items })
      .send()?;

    let status = response.status();
    let text = response.text()?;
    tracing::debug!(operation, status = status.as_u16(), body = %text, "graph response");

    if !status.is_success() {
      return Err(RemoteError::Http {
        operation,
        status: status.as_u16(),
        body: truncate(&text),
      });
    }

    serde_json::from_str(&text)
      .map_err(|e| RemoteError::Schema(format!("{operation} response is not JSON: {e}")))
  }
}

impl IndicatorApi for GraphClient {
  fn submit(&self, token: &str, records: &[WireRecord]) -> Result<Vec<SubmitResult>, RemoteError> {
    let body = self.post_json("submitTiIndicators", &self.submit_url(), token, records)?;
    envelope::parse_submit(&body, &self.graph_base)
  }

  fn delete(&self, token: &str, external_ids: &[String]) -> Result<Vec<DeleteResult>, RemoteError> {
    let body = self.post_json(
      "deleteTiIndicatorsByExternalId",
      &self.delete_url(),
      token,
      external_ids,
    )?;
    envelope::parse_delete(&body, &self.graph_base)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn endpoints_live_under_versioned_security_path() {
    let client = GraphClient::new(&EndpointsConfig::default()).unwrap();
    assert_eq!(
      client.submit_url(),
      "https://graph.microsoft.com/beta/security/tiIndicators/submitTiIndicators"
    );
    assert_eq!(
      client.delete_url(),
      "https://graph.microsoft.com/beta/security/tiIndicators/deleteTiIndicatorsByExternalId"
    );
  }
}
