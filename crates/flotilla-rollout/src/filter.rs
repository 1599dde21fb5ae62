//! Peer filters — narrow a rollout to the nodes an operator asked for.
//!
//! Filters are plain predicates over `Peer`. They compose with `And`/`Or`,
//! and an empty `And` matches everything while an empty `Or` matches
//! nothing.

use std::collections::HashSet;
use std::net::IpAddr;

use regex::Regex;

use flotilla_core::Peer;

#[derive(Debug, Clone, Default)]
pub enum Filter {
    #[default]
    Always,
    Never,
    /// Peer name matches the pattern (unanchored, like `Regex::is_match`).
    Name(Regex),
    /// Peer address is one of these IPs. Ports are ignored.
    Ip(Vec<IpAddr>),
    /// Peer name is in the set.
    Peers(HashSet<String>),
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    pub fn name(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Filter::Name(Regex::new(pattern)?))
    }

    pub fn ip(ips: impl IntoIterator<Item = IpAddr>) -> Self {
        Filter::Ip(ips.into_iter().collect())
    }

    pub fn peers<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Self {
        Filter::Peers(names.into_iter().map(Into::into).collect())
    }

    pub fn and(self, other: Filter) -> Self {
        match self {
            Filter::And(mut all) => {
                all.push(other);
                Filter::And(all)
            }
            first => Filter::And(vec![first, other]),
        }
    }

    pub fn or(self, other: Filter) -> Self {
        match self {
            Filter::Or(mut any) => {
                any.push(other);
                Filter::Or(any)
            }
            first => Filter::Or(vec![first, other]),
        }
    }

    pub fn matches(&self, peer: &Peer) -> bool {
        match self {
            Filter::Always => true,
            Filter::Never => false,
            Filter::Name(re) => re.is_match(&peer.name),
            Filter::Ip(ips) => ips.contains(&peer.addr.ip()),
            Filter::Peers(names) => names.contains(&peer.name),
            Filter::And(all) => all.iter().all(|f| f.matches(peer)),
            Filter::Or(any) => any.iter().any(|f| f.matches(peer)),
        }
    }

    /// Keep the peers that match, preserving order.
    pub fn apply(&self, peers: impl IntoIterator<Item = Peer>) -> Vec<Peer> {
        peers.into_iter().filter(|p| self.matches(p)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    fn peer(name: &str, last: u8) -> Peer {
        Peer::new(name, SocketAddr::from(([10, 0, 0, last], 7946)))
    }

    fn fleet() -> Vec<Peer> {
        vec![peer("web-1", 1), peer("web-2", 2), peer("db-1", 3)]
    }

    fn names(peers: &[Peer]) -> Vec<&str> {
        peers.iter().map(|p| p.name.as_str()).collect()
    }

    #[test]
    fn constants() {
        assert_eq!(Filter::Always.apply(fleet()).len(), 3);
        assert!(Filter::Never.apply(fleet()).is_empty());
        assert_eq!(Filter::default().apply(fleet()).len(), 3);
    }

    #[test]
    fn name_pattern() {
        let f = Filter::name("^web-").unwrap();
        assert_eq!(names(&f.apply(fleet())), vec!["web-1", "web-2"]);
        assert!(Filter::name("(").is_err());
    }

    #[test]
    fn ip_ignores_port() {
        let mut other_port = peer("db-1", 3);
        other_port.addr.set_port(1);
        let f = Filter::ip(["10.0.0.3".parse().unwrap()]);
        assert!(f.matches(&other_port));
        assert_eq!(names(&f.apply(fleet())), vec!["db-1"]);
    }

    #[test]
    fn composition() {
        let web = Filter::name("^web-").unwrap();
        let first = Filter::peers(["web-1", "db-1"]);

        assert_eq!(names(&web.clone().and(first.clone()).apply(fleet())), vec!["web-1"]);
        assert_eq!(names(&web.or(first).apply(fleet())), vec!["web-1", "web-2", "db-1"]);
        assert_eq!(Filter::And(vec![]).apply(fleet()).len(), 3);
        assert!(Filter::Or(vec![]).apply(fleet()).is_empty());
    }

    #[test]
    fn chained_and_flattens() {
        let f = Filter::Always.and(Filter::Always).and(Filter::Never);
        match &f {
            Filter::And(all) => assert_eq!(all.len(), 3),
            other => panic!("expected And, got {other:?}"),
        }
        assert!(!f.matches(&peer("web-1", 1)));
    }
}
