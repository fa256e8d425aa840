//! Origin parsing.
//!
//! Logins only ever store an origin (`scheme://host[:port]`), never a full
//! URL. This module splits an origin-ish string into its parts so validation
//! can normalize it and the store can match records by host.

use std::net::{Ipv4Addr, Ipv6Addr};

/// The host part of an origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Host {
    Domain(String),
    Ipv4(Ipv4Addr),
    Ipv6(Ipv6Addr),
}

impl Host {
    /// Parses a bare host. Domains are lowercased; IPv6 literals may be
    /// bracketed. Returns `None` for empty input or illegal characters.
    #[must_use]
    pub fn parse(input: &str) -> Option<Self> {
        if input.is_empty() {
            return None;
        }
        if let Some(inner) = input.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            return inner.parse().ok().map(Host::Ipv6);
        }
        if let Ok(v6) = input.parse::<Ipv6Addr>() {
            return Some(Host::Ipv6(v6));
        }
        if let Ok(v4) = input.parse::<Ipv4Addr>() {
            return Some(Host::Ipv4(v4));
        }
        if input.chars().any(is_forbidden_host_char) {
            return None;
        }
        Some(Host::Domain(input.to_ascii_lowercase()))
    }

    /// Whether this host is `base` itself or a subdomain of it. IP
    /// addresses only ever match exactly.
    #[must_use]
    pub fn is_within(&self, base: &Host) -> bool {
        match (base, self) {
            (Host::Domain(base), Host::Domain(host)) => {
                host == base
                    || (host.len() > base.len()
                        && host.ends_with(base.as_str())
                        && host.as_bytes()[host.len() - base.len() - 1] == b'.')
            }
            (Host::Ipv4(base), Host::Ipv4(host)) => base == host,
            (Host::Ipv6(base), Host::Ipv6(host)) => base == host,
            _ => false,
        }
    }

    fn serialize(&self) -> String {
        match self {
            Host::Domain(d) => d.clone(),
            Host::Ipv4(v4) => v4.to_string(),
            Host::Ipv6(v6) => format!("[{v6}]"),
        }
    }
}

fn is_forbidden_host_char(c: char) -> bool {
    c.is_whitespace()
        || c.is_control()
        || matches!(
            c,
            '<' | '>' | '"' | '{' | '}' | '|' | '\\' | '^' | '`' | '%' | '[' | ']' | '/' | '?' | '#' | '@'
        )
}

/// A parsed origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Origin {
    scheme: String,
    host: Option<Host>,
    port: Option<u16>,
}

impl Origin {
    /// Parses anything URL-shaped, discarding path, query, fragment and
    /// credentials. Returns `None` when there is no usable scheme or host.
    pub(crate) fn parse(input: &str) -> Option<Self> {
        let (scheme, rest) = input.split_once(':')?;
        let mut chars = scheme.chars();
        let first = chars.next()?;
        if !first.is_ascii_alphabetic()
            || !chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        {
            return None;
        }
        let scheme = scheme.to_ascii_lowercase();
        let rest = rest.strip_prefix("//")?;

        if scheme == "file" {
            return Some(Self {
                scheme,
                host: None,
                port: None,
            });
        }

        let authority_end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
        let authority = &rest[..authority_end];
        let host_port = authority.rsplit_once('@').map_or(authority, |(_, hp)| hp);

        let (host_str, port) = split_port(host_port)?;
        let host = Host::parse(host_str)?;
        let port = port.filter(|p| Some(*p) != default_port(&scheme));
        Some(Self {
            scheme,
            host: Some(host),
            port,
        })
    }

    pub(crate) fn into_host(self) -> Option<Host> {
        self.host
    }

    /// The canonical `scheme://host[:port]` string.
    pub(crate) fn serialize(&self) -> String {
        match (&self.host, self.port) {
            (None, _) => format!("{}://", self.scheme),
            (Some(host), None) => format!("{}://{}", self.scheme, host.serialize()),
            (Some(host), Some(port)) => format!("{}://{}:{port}", self.scheme, host.serialize()),
        }
    }
}

/// Splits `host[:port]`, leaving bracketed IPv6 literals intact.
fn split_port(host_port: &str) -> Option<(&str, Option<u16>)> {
    let port_sep = if host_port.starts_with('[') {
        let close = host_port.find(']')?;
        host_port[close..].find(':').map(|i| close + i)
    } else {
        host_port.rfind(':')
    };
    match port_sep {
        None => Some((host_port, None)),
        Some(idx) => {
            let port_str = &host_port[idx + 1..];
            if port_str.is_empty() {
                return Some((&host_port[..idx], None));
            }
            let port = port_str.parse::<u16>().ok()?;
            Some((&host_port[..idx], Some(port)))
        }
    }
}

fn default_port(scheme: &str) -> Option<u16> {
    match scheme {
        "http" | "ws" => Some(80),
        "https" | "wss" => Some(443),
        "ftp" => Some(21),
        _ => None,
    }
}

/// Extracts the host of a stored origin.
#[must_use]
pub fn origin_host(origin: &str) -> Option<Host> {
    Origin::parse(origin).and_then(Origin::into_host)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_everything_but_the_origin() {
        let o = Origin::parse("HTTPS://user:pw@Example.COM:443/path?q=1#frag").unwrap();
        assert_eq!(o.serialize(), "https://example.com");
    }

    #[test]
    fn keeps_non_default_port() {
        let o = Origin::parse("http://example.com:8080/").unwrap();
        assert_eq!(o.serialize(), "http://example.com:8080");
    }

    #[test]
    fn ipv6_literal_round_trips() {
        let o = Origin::parse("http://[::1]:8080/x").unwrap();
        assert_eq!(o.serialize(), "http://[::1]:8080");
        assert_eq!(o.into_host(), Some(Host::Ipv6("::1".parse().unwrap())));
    }

    #[test]
    fn origin_host_drops_scheme_and_port() {
        assert_eq!(
            origin_host("https://Sub.Example.com:8443"),
            Some(Host::Domain("sub.example.com".into()))
        );
        assert_eq!(origin_host("file:///etc/passwd"), None);
        assert_eq!(origin_host("not an origin"), None);
    }

    #[test]
    fn file_urls_collapse() {
        assert_eq!(Origin::parse("file:///etc/passwd").unwrap().serialize(), "file://");
    }

    #[test]
    fn rejects_garbage() {
        assert!(Origin::parse("example.com").is_none());
        assert!(Origin::parse("https://").is_none());
        assert!(Origin::parse("https://exa mple.com").is_none());
        assert!(Origin::parse("1https://example.com").is_none());
        assert!(Origin::parse("https://example.com:99999").is_none());
    }

    #[test]
    fn subdomain_matching() {
        let base = Host::parse("example.com").unwrap();
        assert!(Host::parse("example.com").unwrap().is_within(&base));
        assert!(Host::parse("www.example.com").unwrap().is_within(&base));
        assert!(!Host::parse("badexample.com").unwrap().is_within(&base));
        assert!(!Host::parse("example.com.evil").unwrap().is_within(&base));
    }

    #[test]
    fn ip_hosts_match_exactly() {
        let base = Host::parse("127.0.0.1").unwrap();
        assert!(Host::parse("127.0.0.1").unwrap().is_within(&base));
        assert!(!Host::parse("27.0.0.1").unwrap().is_within(&base));
        assert!(!Host::parse("localhost").unwrap().is_within(&base));
    }
}
