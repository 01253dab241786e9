use std::{fmt, str::FromStr};
use thiserror::Error;

const SPIFFE_SCHEME: &str = "spiffe";

/// The authenticated identity of a connection's remote peer, as verified
/// during the TLS handshake.
///
/// Identities are either SPIFFE IDs
/// (`spiffe://<trust-domain>/ns/<namespace>/sa/<service-account>`) or proxy
/// DNS identities
/// (`<service-account>.<namespace>.serviceaccount.identity.<control-plane-namespace>.<trust-domain>`).
/// The components of either form are extracted when the identity is parsed;
/// other well-formed identities only provide a principal.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct ClientId {
    principal: String,
    trust_domain: Option<String>,
    namespace: Option<String>,
    service_account: Option<String>,
}

#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum InvalidClientId {
    #[error("identity is empty")]
    Empty,

    #[error("invalid identity URI: {0}")]
    Uri(String),

    #[error("unsupported identity URI scheme: {0}")]
    Scheme(String),

    #[error("invalid identity DNS name: {0}")]
    DnsName(String),
}

// === impl ClientId ===

impl ClientId {
    /// The full identity string.
    pub fn principal(&self) -> &str {
        &self.principal
    }

    pub fn trust_domain(&self) -> Option<&str> {
        self.trust_domain.as_deref()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn service_account(&self) -> Option<&str> {
        self.service_account.as_deref()
    }

    fn parse_uri(s: &str) -> Result<Self, InvalidClientId> {
        let uri = s
            .parse::<http::Uri>()
            .map_err(|e| InvalidClientId::Uri(e.to_string()))?;
        match uri.scheme_str() {
            Some(scheme) if scheme.eq_ignore_ascii_case(SPIFFE_SCHEME) => {}
            scheme => return Err(InvalidClientId::Scheme(scheme.unwrap_or_default().to_string())),
        }
        let trust_domain = match uri.host() {
            Some(host) if !host.is_empty() => host.to_ascii_lowercase(),
            _ => return Err(InvalidClientId::Uri(s.to_string())),
        };

        // Workload paths are `/ns/<namespace>/sa/<service-account>`.
        let mut namespace = None;
        let mut service_account = None;
        let mut segments = uri.path().split('/').filter(|s| !s.is_empty());
        while let (Some(k), Some(v)) = (segments.next(), segments.next()) {
            match k {
                "ns" => namespace = Some(v.to_string()),
                "sa" => service_account = Some(v.to_string()),
                _ => {}
            }
        }

        Ok(Self {
            principal: s.to_string(),
            trust_domain: Some(trust_domain),
            namespace,
            service_account,
        })
    }

    fn parse_dns(s: &str) -> Result<Self, InvalidClientId> {
        // SNI hostnames are implicitly absolute.
        if s.ends_with('.') {
            return Err(InvalidClientId::DnsName(s.to_string()));
        }
        let labels = s.split('.').collect::<Vec<_>>();
        let valid = labels.iter().all(|l| {
            !l.is_empty() && l.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        });
        if !valid {
            return Err(InvalidClientId::DnsName(s.to_string()));
        }

        let mut id = Self {
            principal: s.to_ascii_lowercase(),
            trust_domain: None,
            namespace: None,
            service_account: None,
        };
        if let [sa, ns, "serviceaccount", "identity", _control_plane, td @ ..] = &labels[..] {
            if !td.is_empty() {
                id.service_account = Some(sa.to_ascii_lowercase());
                id.namespace = Some(ns.to_ascii_lowercase());
                id.trust_domain = Some(td.join(".").to_ascii_lowercase());
            }
        }
        Ok(id)
    }
}

impl FromStr for ClientId {
    type Err = InvalidClientId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(InvalidClientId::Empty);
        }
        if s.contains("://") {
            Self::parse_uri(s)
        } else {
            Self::parse_dns(s)
        }
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.principal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spiffe_id() {
        let id = "spiffe://cluster.local/ns/emojivoto/sa/web"
            .parse::<ClientId>()
            .expect("must parse");
        assert_eq!(id.principal(), "spiffe://cluster.local/ns/emojivoto/sa/web");
        assert_eq!(id.trust_domain(), Some("cluster.local"));
        assert_eq!(id.namespace(), Some("emojivoto"));
        assert_eq!(id.service_account(), Some("web"));
    }

    #[test]
    fn spiffe_id_without_workload_path() {
        let id = "spiffe://example.org/some-system/some-component"
            .parse::<ClientId>()
            .expect("must parse");
        assert_eq!(id.trust_domain(), Some("example.org"));
        assert_eq!(id.namespace(), None);
        assert_eq!(id.service_account(), None);
    }

    #[test]
    fn dns_id() {
        let id = "web.emojivoto.serviceaccount.identity.linkerd.cluster.local"
            .parse::<ClientId>()
            .expect("must parse");
        assert_eq!(
            id.principal(),
            "web.emojivoto.serviceaccount.identity.linkerd.cluster.local"
        );
        assert_eq!(id.trust_domain(), Some("cluster.local"));
        assert_eq!(id.namespace(), Some("emojivoto"));
        assert_eq!(id.service_account(), Some("web"));
    }

    #[test]
    fn opaque_dns_id() {
        let id = "foo.example.com".parse::<ClientId>().expect("must parse");
        assert_eq!(id.principal(), "foo.example.com");
        assert_eq!(id.trust_domain(), None);
        assert_eq!(id.namespace(), None);
    }

    #[test]
    fn invalid() {
        assert_eq!("".parse::<ClientId>(), Err(InvalidClientId::Empty));
        assert!(matches!(
            "https://example.com/ns/foo".parse::<ClientId>(),
            Err(InvalidClientId::Scheme(_))
        ));
        assert!(matches!(
            "foo.example.com.".parse::<ClientId>(),
            Err(InvalidClientId::DnsName(_))
        ));
        assert!(matches!(
            "foo..example.com".parse::<ClientId>(),
            Err(InvalidClientId::DnsName(_))
        ));
        assert!(matches!(
            "foo_bar.example.com".parse::<ClientId>(),
            Err(InvalidClientId::DnsName(_))
        ));
    }
}
