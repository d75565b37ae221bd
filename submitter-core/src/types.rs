use serde::{Deserialize, Serialize};

/// Expiration value carried by withdrawn indicators. The dispatcher routes any
/// record carrying it to the delete set.
pub const EXPIRED_SENTINEL: &str = "1970-01-01T00:00:00";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndicatorType {
  Url,
  Domain,
  Md5,
  Sha256,
  Sha1,
  IPv4,
}

impl IndicatorType {
  pub fn parse(raw: &str) -> Option<Self> {
    match raw {
      "URL" => Some(Self::Url),
      "domain" => Some(Self::Domain),
      "md5" => Some(Self::Md5),
      "sha256" => Some(Self::Sha256),
      "sha1" => Some(Self::Sha1),
      "IPv4" => Some(Self::IPv4),
      _ => None,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Url => "URL",
      Self::Domain => "domain",
      Self::Md5 => "md5",
      Self::Sha256 => "sha256",
      Self::Sha1 => "sha1",
      Self::IPv4 => "IPv4",
    }
  }

  pub fn file_hash_type(&self) -> Option<u8> {
    match self {
      Self::Sha1 => Some(1),
      Self::Sha256 => Some(2),
      Self::Md5 => Some(3),
      _ => None,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorValue {
  #[serde(rename = "type")]
  pub indicator_type: String,

  #[serde(default)]
  pub confidence: u32,

  #[serde(default)]
  pub sources: Vec<String>,

  #[serde(default)]
  pub share_level: Option<String>,
}

pub fn tlp_level(share_level: Option<&str>) -> u8 {
  match share_level {
    Some("white") => 1,
    Some("green") => 2,
    Some("amber") => 3,
    Some("red") => 4,
    _ => 0,
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum IndicatorTarget {
  Url {
    url: String,
  },
  Domain {
    #[serde(rename = "domainName")]
    domain_name: String,
  },
  FileHash {
    #[serde(rename = "fileHashType")]
    file_hash_type: u8,
    #[serde(rename = "fileHashValue")]
    file_hash_value: String,
  },
  NetworkIpv4 {
    #[serde(rename = "networkIPv4")]
    address: String,
  },
  NetworkCidrBlock {
    #[serde(rename = "networkCidrBlock")]
    block: String,
  },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireRecord {
  pub description: String,
  pub confidence: u32,
  pub external_id: String,
  pub indicator: String,
  pub expiration_date_time: String,
  pub tlp_level: u8,
  pub threat_type: String,

  #[serde(skip_serializing_if = "Option::is_none")]
  pub action: Option<i64>,

  #[serde(skip_serializing_if = "Option::is_none")]
  pub target_product: Option<String>,

  #[serde(flatten)]
  pub target: IndicatorTarget,
}

impl WireRecord {
  pub fn is_withdrawn(&self) -> bool {
    self.expiration_date_time == EXPIRED_SENTINEL
  }
}
