//! CIDR allow/deny rules applied to remote addresses before a connection
//! is set up.

use {
    crate::config::ConfigError,
    std::{net::IpAddr, str::FromStr},
};

/// Whether a matching rule admits or refuses the address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterAction {
    Accept,
    Reject,
}

/// One `address/prefix` rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpFilterRule {
    pub action: FilterAction,
    network: IpAddr,
    prefix_len: u8,
}

impl IpFilterRule {
    /// Parse `"10.0.0.0/8"`, `"::1"` and similar. A bare address matches
    /// exactly.
    pub fn parse(action: FilterAction, cidr: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidIpFilterRule(cidr.to_string());
        let (addr, prefix) = match cidr.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (cidr, None),
        };
        let network = IpAddr::from_str(addr.trim()).map_err(|_| invalid())?;
        let max_len = match network {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        let prefix_len = match prefix {
            Some(p) => p.trim().parse::<u8>().map_err(|_| invalid())?,
            None => max_len,
        };
        if prefix_len > max_len {
            return Err(invalid());
        }
        Ok(Self {
            action,
            network,
            prefix_len,
        })
    }

    pub fn matches(&self, ip: &IpAddr) -> bool {
        match (self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => prefix_matches(
                u128::from(u32::from(net)),
                u128::from(u32::from(*ip)),
                self.prefix_len,
                32,
            ),
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                prefix_matches(u128::from(net), u128::from(*ip), self.prefix_len, 128)
            }
            _ => false,
        }
    }
}

fn prefix_matches(net: u128, ip: u128, prefix_len: u8, bits: u32) -> bool {
    let host_bits = bits.saturating_sub(u32::from(prefix_len));
    let mask = u128::MAX.checked_shl(host_bits).unwrap_or(0);
    (net & mask) == (ip & mask)
}

/// Ordered rule list; the first matching rule decides. Addresses matching
/// no rule are accepted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IpFilter {
    rules: Vec<IpFilterRule>,
}

impl IpFilter {
    pub fn new(rules: Vec<IpFilterRule>) -> Self {
        Self { rules }
    }

    /// Build a filter from textual accept and reject lists. Reject rules
    /// are checked first.
    pub fn from_lists(accept: &[String], reject: &[String]) -> Result<Self, ConfigError> {
        let rules = reject
            .iter()
            .map(|r| IpFilterRule::parse(FilterAction::Reject, r))
            .chain(accept.iter().map(|r| IpFilterRule::parse(FilterAction::Accept, r)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    pub fn is_accepted(&self, ip: &IpAddr) -> bool {
        self.rules
            .iter()
            .find(|rule| rule.matches(ip))
            .map_or(true, |rule| rule.action == FilterAction::Accept)
    }
}
