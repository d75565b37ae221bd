use crate::config::EndpointsConfig;
use crate::error::AuthError;
use reqwest::blocking::Client;
use serde::Deserialize;

#[derive(Clone, Default, PartialEq)]
pub struct Credentials {
  pub client_id: Option<String>,
  pub client_secret: Option<String>,
  pub tenant_id: Option<String>,
}

impl std::fmt::Debug for Credentials {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Credentials")
      .field("client_id", &self.client_id)
      .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
      .field("tenant_id", &self.tenant_id)
      .finish()
  }
}

pub struct RequiredCredentials<'a> {
  pub client_id: &'a str,
  pub client_secret: &'a str,
  pub tenant_id: &'a str,
}

impl Credentials {
  pub fn require(&self) -> Result<RequiredCredentials<'_>, AuthError> {
    fn field<'a>(v: &'a Option<String>, name: &'static str) -> Result<&'a str, AuthError> {
      match v.as_deref() {
        Some(s) if !s.trim().is_empty() => Ok(s),
        _ => Err(AuthError::Configuration { field: name }),
      }
    }

    Ok(RequiredCredentials {
      client_id: field(&self.client_id, "client_id")?,
      client_secret: field(&self.client_secret, "client_secret")?,
      tenant_id: field(&self.tenant_id, "tenant_id")?,
    })
  }
}

pub trait TokenProvider: Send + Sync {
  fn acquire_token(&self, credentials: &Credentials) -> Result<String, AuthError>;
}

pub struct ClientCredentialsProvider {
  client: Client,
  authority_url: String,
  resource: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
  #[serde(default)]
  access_token: Option<String>,
}

impl ClientCredentialsProvider {
  pub fn new(endpoints: &EndpointsConfig) -> anyhow::Result<Self> {
    let client = Client::builder()
      .timeout(endpoints.timeout())
      .user_agent(format!("tisubmit/{}", env!("CARGO_PKG_VERSION")))
      .build()?;
    Ok(Self {
      client,
      authority_url: endpoints.authority_url.trim_end_matches('/').to_string(),
      resource: endpoints.resource.clone(),
    })
  }

  pub fn token_url(&self, tenant_id: &str) -> String {
    format!("{}/{}/oauth2/token", self.authority_url, tenant_id)
  }
}

impl TokenProvider for ClientCredentialsProvider {
  fn acquire_token(&self, credentials: &Credentials) -> Result<String, AuthError> {
    let creds = credentials.require()?;

    let response = self
      .client
      .post(self.token_url(creds.tenant_id))
      .form(&[
        ("grant_type", "client_credentials"),
        ("client_id", creds.client_id),
        ("client_secret", creds.client_secret),
        ("resource", self.resource.as_str()),
      ])
      .send()?;

    let status = response.status();
    let body = response.text()?;
    if !status.is_success() {
      return Err(AuthError::Status {
        status: status.as_u16(),
        body: truncate(&body),
      });
    }

    let parsed: TokenResponse = serde_json::from_str(&body)
      .map_err(|e| AuthError::InvalidResponse(format!("token response is not JSON: {e}")))?;
    match parsed.access_token {
      Some(t) if !t.is_empty() => Ok(t),
      _ => Err(AuthError::InvalidResponse(
        "invalid token or access_token not available".to_string(),
      )),
    }
  }
}

pub(crate) fn truncate(text: &str) -> String {
  let count = text.chars().count();
  if count <= 512 {
    return text.to_string();
  }
  let prefix: String = text.chars().take(512).collect();
  format!("{prefix}...")
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn missing_fields_fail_before_any_request() {
    let provider = ClientCredentialsProvider::new(&EndpointsConfig::default()).unwrap();

    let creds = Credentials {
      client_id: Some("id".to_string()),
      client_secret: None,
      tenant_id: Some("tenant".to_string()),
    };
    let err = provider.acquire_token(&creds).unwrap_err();
    assert!(matches!(err, AuthError::Configuration { field: "client_secret" }));

    let blank = Credentials {
      client_id: Some("  ".to_string()),
      ..creds
    };
    assert!(matches!(
      blank.require(),
      Err(AuthError::Configuration { field: "client_id" })
    ));
  }

  #[test]
  fn debug_output_redacts_secret() {
    let creds = Credentials {
      client_id: Some("id".to_string()),
      client_secret: Some("hunter2".to_string()),
      tenant_id: None,
    };
    let text = format!("{creds:?}");
    assert!(!text.contains("hunter2"));
    assert!(text.contains("<redacted>"));
  }

  #[test]
  fn token_url_is_scoped_to_tenant() {
    let provider = ClientCredentialsProvider::new(&EndpointsConfig::default()).unwrap();
    assert_eq!(
      provider.token_url("contoso.onmicrosoft.com"),
      "https://login.microsoftonline.com/contoso.onmicrosoft.com/oauth2/token"
    );
  }
}
