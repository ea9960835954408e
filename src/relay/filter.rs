//! UDP target policy
//!
//! Datagrams to block-listed domains or to IPv4 addresses that are not
//! global unicast are dropped without notice.

use crate::socks::TargetAddr;
use std::net::{IpAddr, Ipv4Addr};

/// Domain suffixes matched on label boundaries
#[derive(Debug, Clone, Default)]
pub struct BlockList {
    suffixes: Vec<String>,
}

impl BlockList {
    /// Build from configured suffixes; case and surrounding dots are ignored
    pub fn new<I, S>(suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        BlockList {
            suffixes: suffixes
                .into_iter()
                .map(|s| s.as_ref().trim_matches('.').to_ascii_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    /// Number of configured suffixes
    pub fn len(&self) -> usize {
        self.suffixes.len()
    }

    /// Whether no suffix is configured
    pub fn is_empty(&self) -> bool {
        self.suffixes.is_empty()
    }

    /// Whether `domain` equals a suffix or is a subdomain of one
    pub fn is_blocked(&self, domain: &str) -> bool {
        let domain = domain.trim_end_matches('.').to_ascii_lowercase();
        self.suffixes.iter().any(|suffix| {
            domain == *suffix
                || (domain.len() > suffix.len()
                    && domain.ends_with(suffix.as_str())
                    && domain.as_bytes()[domain.len() - suffix.len() - 1] == b'.')
        })
    }
}

/// Global unicast test for IPv4
///
/// Rejects unspecified, loopback, link-local, multicast and broadcast
/// addresses. Private ranges are global unicast and pass.
pub fn is_global_unicast(ip: Ipv4Addr) -> bool {
    !(ip.is_unspecified()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_multicast()
        || ip.is_broadcast())
}

/// Decides which UDP targets may be relayed
#[derive(Debug, Clone, Default)]
pub struct UdpPolicy {
    block_list: BlockList,
    allow_non_global: bool,
}

impl UdpPolicy {
    /// Create a policy
    pub fn new(block_list: BlockList, allow_non_global: bool) -> Self {
        UdpPolicy {
            block_list,
            allow_non_global,
        }
    }

    /// Check the target as written by the client, before resolution
    pub fn permits_target(&self, target: &TargetAddr) -> bool {
        match target {
            TargetAddr::Domain(domain, _) => !self.block_list.is_blocked(domain),
            TargetAddr::Ip(addr) => self.permits_ip(addr.ip()),
        }
    }

    /// Check a literal or resolved address
    pub fn permits_ip(&self, ip: IpAddr) -> bool {
        match ip {
            IpAddr::V4(v4) => self.allow_non_global || is_global_unicast(v4),
            IpAddr::V6(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_list_suffix_match() {
        let list = BlockList::new(["example.com", ".Tracker.NET."]);
        assert_eq!(list.len(), 2);
        assert!(list.is_blocked("example.com"));
        assert!(list.is_blocked("ads.example.com"));
        assert!(list.is_blocked("ADS.Example.com."));
        assert!(list.is_blocked("a.b.tracker.net"));
        assert!(!list.is_blocked("notexample.com"));
        assert!(!list.is_blocked("example.com.evil"));
        assert!(!list.is_blocked("com"));
    }

    #[test]
    fn test_empty_block_list() {
        let list = BlockList::new(Vec::<String>::new());
        assert!(list.is_empty());
        assert!(!list.is_blocked("example.com"));
    }

    #[test]
    fn test_is_global_unicast() {
        assert!(is_global_unicast(Ipv4Addr::new(8, 8, 8, 8)));
        assert!(is_global_unicast(Ipv4Addr::new(192, 168, 0, 47)));
        assert!(is_global_unicast(Ipv4Addr::new(10, 1, 2, 3)));
        assert!(!is_global_unicast(Ipv4Addr::UNSPECIFIED));
        assert!(!is_global_unicast(Ipv4Addr::LOCALHOST));
        assert!(!is_global_unicast(Ipv4Addr::new(169, 254, 1, 1)));
        assert!(!is_global_unicast(Ipv4Addr::new(224, 0, 0, 251)));
        assert!(!is_global_unicast(Ipv4Addr::BROADCAST));
    }

    #[test]
    fn test_udp_policy() {
        let policy = UdpPolicy::new(BlockList::new(["example.com"]), false);
        assert!(!policy.permits_target(&TargetAddr::domain("ads.example.com", 53)));
        assert!(policy.permits_target(&TargetAddr::domain("example.org", 53)));
        assert!(!policy.permits_target(&TargetAddr::ipv4(Ipv4Addr::LOCALHOST, 53)));
        assert!(policy.permits_target(&TargetAddr::ipv4(Ipv4Addr::new(1, 1, 1, 1), 53)));
        assert!(policy.permits_ip("::1".parse().unwrap()));

        let lenient = UdpPolicy::new(BlockList::default(), true);
        assert!(lenient.permits_ip(IpAddr::V4(Ipv4Addr::LOCALHOST)));
    }
}
