//! Address sets for address-based client matching.
//!
//! An address set is built from tokens separated by commas, semicolons or
//! whitespace. Each token is one of:
//!
//! - a single address: `192.168.1.1`, `::1`
//! - an inclusive range: `10.0.0.1-10.0.0.50`
//! - a CIDR block: `10.0.0.0/8`, `fd00::/8`

use ipnet::IpNet;
use std::net::IpAddr;

use crate::error::{Result, ThrottleError};

#[derive(Debug, Clone, PartialEq, Eq)]
enum AddressBlock {
    Network(IpNet),
    Range { start: IpAddr, end: IpAddr },
}

impl AddressBlock {
    fn parse(token: &str) -> Result<Self> {
        if let Ok(network) = token.parse::<IpNet>() {
            return Ok(AddressBlock::Network(network));
        }

        if let Ok(addr) = token.parse::<IpAddr>() {
            return Ok(AddressBlock::Network(IpNet::from(addr.to_canonical())));
        }

        if let Some((start, end)) = token.split_once('-') {
            let start = parse_addr(start, token)?;
            let end = parse_addr(end, token)?;
            if start.is_ipv4() != end.is_ipv4() {
                return Err(ThrottleError::Config(format!(
                    "address range '{}' mixes IPv4 and IPv6",
                    token
                )));
            }
            if start > end {
                return Err(ThrottleError::Config(format!(
                    "address range '{}' ends before it starts",
                    token
                )));
            }
            return Ok(AddressBlock::Range { start, end });
        }

        Err(ThrottleError::Config(format!(
            "cannot parse an address, range or CIDR block from '{}'",
            token
        )))
    }

    fn contains(&self, addr: IpAddr) -> bool {
        match self {
            AddressBlock::Network(network) => network.contains(&addr),
            AddressBlock::Range { start, end } => {
                start.is_ipv4() == addr.is_ipv4() && *start <= addr && addr <= *end
            }
        }
    }
}

fn parse_addr(value: &str, token: &str) -> Result<IpAddr> {
    value
        .trim()
        .parse::<IpAddr>()
        .map(|addr| addr.to_canonical())
        .map_err(|_| ThrottleError::Config(format!("invalid address '{}' in '{}'", value.trim(), token)))
}

/// A set of addresses made of single addresses, ranges and CIDR blocks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressSet {
    blocks: Vec<AddressBlock>,
}

impl AddressSet {
    /// Parse a single entry that may hold several separated tokens.
    ///
    /// An entry without any token is rejected.
    pub fn parse(entry: &str) -> Result<Self> {
        let set = Self::parse_all([entry])?;
        if set.is_empty() {
            return Err(ThrottleError::Config(format!(
                "cannot parse an address set from '{}'",
                entry
            )));
        }
        Ok(set)
    }

    /// Parse every entry into one set. An empty list yields an empty set.
    pub fn parse_all<I, S>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut blocks = Vec::new();
        for entry in entries {
            for token in entry
                .as_ref()
                .split(|c: char| c == ',' || c == ';' || c.is_whitespace())
                .filter(|t| !t.is_empty())
            {
                blocks.push(AddressBlock::parse(token)?);
            }
        }
        Ok(Self { blocks })
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Returns `true` if the address falls inside any block.
    pub fn contains(&self, addr: IpAddr) -> bool {
        let addr = addr.to_canonical();
        self.blocks.iter().any(|block| block.contains(addr))
    }

    /// Like [`contains`](Self::contains) for an unparsed address.
    ///
    /// Strings that are not addresses are never contained.
    pub fn contains_str(&self, addr: &str) -> bool {
        addr.trim()
            .parse::<IpAddr>()
            .map(|addr| self.contains(addr))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_single_address() {
        let set = AddressSet::parse("192.168.1.1").unwrap();
        assert!(set.contains(ip("192.168.1.1")));
        assert!(!set.contains(ip("192.168.1.2")));
    }

    #[test]
    fn test_cidr_block() {
        let set = AddressSet::parse("10.0.0.0/8").unwrap();
        assert!(set.contains(ip("10.0.0.1")));
        assert!(set.contains(ip("10.255.255.255")));
        assert!(!set.contains(ip("11.0.0.1")));
    }

    #[test]
    fn test_range() {
        let set = AddressSet::parse("10.0.0.10-10.0.0.20").unwrap();
        assert!(set.contains(ip("10.0.0.10")));
        assert!(set.contains(ip("10.0.0.15")));
        assert!(set.contains(ip("10.0.0.20")));
        assert!(!set.contains(ip("10.0.0.21")));
        assert!(!set.contains(ip("::1")));
    }

    #[test]
    fn test_multiple_tokens_in_one_entry() {
        let set = AddressSet::parse("127.0.0.1, ::1; 172.16.0.0/12").unwrap();
        assert_eq!(set.len(), 3);
        assert!(set.contains(ip("::1")));
        assert!(set.contains(ip("172.20.0.1")));
    }

    #[test]
    fn test_ipv6() {
        let set = AddressSet::parse("fd00::/8").unwrap();
        assert!(set.contains(ip("fd00::1")));
        assert!(set.contains(ip("fdff::1")));
        assert!(!set.contains(ip("2001:db8::1")));
    }

    #[test]
    fn test_ipv4_mapped_address_matches_ipv4_block() {
        let set = AddressSet::parse("192.168.0.0/16").unwrap();
        assert!(set.contains(ip("::ffff:192.168.3.4")));
    }

    #[test]
    fn test_invalid_tokens_rejected() {
        assert!(AddressSet::parse("not-an-ip").is_err());
        assert!(AddressSet::parse("10.0.0.0/33").is_err());
        assert!(AddressSet::parse("10.0.0.20-10.0.0.10").is_err());
        assert!(AddressSet::parse("10.0.0.1-::1").is_err());
        assert!(AddressSet::parse("").is_err());
        assert!(AddressSet::parse_all(["127.0.0.1", "bogus"]).is_err());
    }

    #[test]
    fn test_empty_list_is_empty_set() {
        let set = AddressSet::parse_all(Vec::<String>::new()).unwrap();
        assert!(set.is_empty());
        assert!(!set.contains(ip("127.0.0.1")));
    }

    #[test]
    fn test_contains_str() {
        let set = AddressSet::parse("127.0.0.1").unwrap();
        assert!(set.contains_str("127.0.0.1"));
        assert!(set.contains_str(" 127.0.0.1 "));
        assert!(!set.contains_str(""));
        assert!(!set.contains_str("localhost"));
    }
}
