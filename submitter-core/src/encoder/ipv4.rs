use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Cidr {
  pub network: Ipv4Addr,
  pub prefix: u8,
}

impl Ipv4Cidr {
  pub fn size(&self) -> u64 {
    1u64 << (32 - u32::from(self.prefix))
  }

  pub fn first(&self) -> u32 {
    u32::from(self.network)
  }

  pub fn last(&self) -> u32 {
    (u64::from(self.first()) + self.size() - 1) as u32
  }
}

impl fmt::Display for Ipv4Cidr {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}", self.network, self.prefix)
  }
}

impl FromStr for Ipv4Cidr {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let (addr, prefix) = match s.split_once('/') {
      Some((a, p)) => (a, p),
      None => (s, "32"),
    };
    let network: Ipv4Addr = addr
      .trim()
      .parse()
      .map_err(|_| format!("invalid address {addr:?}"))?;
    let prefix: u8 = prefix
      .trim()
      .parse()
      .map_err(|_| format!("invalid prefix {prefix:?}"))?;
    if prefix > 32 {
      return Err(format!("prefix /{prefix} out of range"));
    }
    Ok(Self { network, prefix })
  }
}

/// Splits the inclusive range `start..=end` into the minimal list of
/// covering CIDR blocks, in ascending order.
pub fn range_to_cidrs(start: Ipv4Addr, end: Ipv4Addr) -> Result<Vec<Ipv4Cidr>, String> {
  let mut cur = u64::from(u32::from(start));
  let end = u64::from(u32::from(end));
  if cur > end {
    return Err(format!("range start {start} is after end"));
  }

  let mut out = Vec::new();
  while cur <= end {
    let align_bits = if cur == 0 { 32 } else { cur.trailing_zeros().min(32) };
    let remaining = end - cur + 1;
    let len_bits = 63 - remaining.leading_zeros();
    let host_bits = align_bits.min(len_bits);

    out.push(Ipv4Cidr {
      network: Ipv4Addr::from(cur as u32),
      prefix: (32 - host_bits) as u8,
    });
    cur += 1u64 << host_bits;
  }
  Ok(out)
}

pub fn parse_range(raw: &str) -> Result<Vec<Ipv4Cidr>, String> {
  let (a, b) = raw
    .split_once('-')
    .ok_or_else(|| "range must be START-END".to_string())?;
  let start: Ipv4Addr = a
    .trim()
    .parse()
    .map_err(|_| format!("invalid range start {a:?}"))?;
  let end: Ipv4Addr = b
    .trim()
    .parse()
    .map_err(|_| format!("invalid range end {b:?}"))?;
  range_to_cidrs(start, end)
}
