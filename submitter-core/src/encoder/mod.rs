use crate::error::EncodeError;
use crate::types::{
  tlp_level, IndicatorTarget, IndicatorType, IndicatorValue, WireRecord, EXPIRED_SENTINEL,
};
use chrono::{DateTime, Duration, Utc};

pub mod ipv4;

use ipv4::Ipv4Cidr;

pub const VALIDITY_DAYS: i64 = 29;

const EXPIRATION_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

#[derive(Debug, Clone, PartialEq)]
pub struct EncodeSettings {
  pub recommended_action: Option<i64>,
  pub target_product: Option<String>,
  pub threat_type: String,
}

pub fn expiration_for(expired: bool, now: DateTime<Utc>) -> String {
  if expired {
    return EXPIRED_SENTINEL.to_string();
  }
  (now + Duration::days(VALIDITY_DAYS))
    .format(EXPIRATION_FORMAT)
    .to_string()
}

/// Encodes one lifecycle event. IPv4 ranges expand to one record per
/// covering CIDR block; every other indicator yields exactly one record.
pub fn encode(
  indicator: &str,
  value: &IndicatorValue,
  expired: bool,
  settings: &EncodeSettings,
  now: DateTime<Utc>,
) -> Result<Vec<WireRecord>, EncodeError> {
  let kind = IndicatorType::parse(&value.indicator_type)
    .ok_or_else(|| EncodeError::UnsupportedIndicatorType(value.indicator_type.clone()))?;

  let targets = targets_for(kind, indicator)?;

  let description = format!("{} indicator from {}", kind.as_str(), value.sources.join(", "));
  let external_id = format!("{}:{}", kind.as_str(), indicator);
  let expiration = expiration_for(expired, now);
  let tlp = tlp_level(value.share_level.as_deref());

  let records = targets
    .into_iter()
    .map(|target| WireRecord {
      description: description.clone(),
      confidence: value.confidence,
      external_id: external_id.clone(),
      indicator: indicator.to_string(),
      expiration_date_time: expiration.clone(),
      tlp_level: tlp,
      threat_type: settings.threat_type.clone(),
      action: settings.recommended_action,
      target_product: settings.target_product.clone(),
      target,
    })
    .collect::<Vec<_>>();

  tracing::debug!(
    external_id = %external_id,
    records = records.len(),
    expired,
    "indicator encoded"
  );
  Ok(records)
}

fn targets_for(kind: IndicatorType, indicator: &str) -> Result<Vec<IndicatorTarget>, EncodeError> {
  let target = match kind {
    IndicatorType::Url => IndicatorTarget::Url {
      url: indicator.to_string(),
    },
    IndicatorType::Domain => IndicatorTarget::Domain {
      domain_name: indicator.to_string(),
    },
    IndicatorType::Md5 | IndicatorType::Sha256 | IndicatorType::Sha1 => IndicatorTarget::FileHash {
      file_hash_type: kind.file_hash_type().unwrap_or_default(),
      file_hash_value: indicator.to_string(),
    },
    IndicatorType::IPv4 => return ipv4_targets(indicator),
  };
  Ok(vec![target])
}

fn ipv4_targets(indicator: &str) -> Result<Vec<IndicatorTarget>, EncodeError> {
  let invalid = |reason: String| EncodeError::InvalidAddress {
    indicator: indicator.to_string(),
    reason,
  };

  if indicator.contains('-') {
    let blocks = ipv4::parse_range(indicator).map_err(invalid)?;
    return Ok(
      blocks
        .into_iter()
        .map(|b| IndicatorTarget::NetworkCidrBlock {
          block: b.to_string(),
        })
        .collect(),
    );
  }

  let parsed: Ipv4Cidr = indicator.parse().map_err(invalid)?;
  if parsed.size() == 1 && !indicator.contains('/') {
    Ok(vec![IndicatorTarget::NetworkIpv4 {
      address: indicator.to_string(),
    }])
  } else {
    Ok(vec![IndicatorTarget::NetworkCidrBlock {
      block: indicator.to_string(),
    }])
  }
}
