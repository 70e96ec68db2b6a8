use crate::k8s::{duration::GoDuration, CertificateRequest, ResourceId};
use std::{
    collections::BTreeMap,
    fmt,
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
    str::FromStr,
    time::Duration,
};
use x509_parser::{
    certification_request::X509CertificationRequest,
    extensions::{GeneralName, ParsedExtension},
    prelude::FromDer,
    public_key::PublicKey as ParsedKey,
};

/// cert-manager's default certificate lifetime.
pub const DEFAULT_DURATION: Duration = Duration::from_secs(2160 * 60 * 60);

/// Key usages cert-manager applies when a request leaves them unset.
pub const DEFAULT_USAGES: [&str; 2] = ["digital signature", "key encipherment"];

const ED25519_OID: &str = "1.3.101.112";
const SERVICE_ACCOUNT_PREFIX: &str = "system:serviceaccount:";

/// A signing request as seen by approvers: who asked, for which issuer, and
/// for what.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Request {
    pub id: ResourceId,
    pub identity: Identity,
    pub issuer: Issuer,
    pub attributes: Attributes,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Identity {
    pub username: String,
    pub uid: Option<String>,
    pub groups: Vec<String>,
    pub extra: BTreeMap<String, Vec<String>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Issuer {
    pub name: String,
    pub kind: String,
    pub group: String,
}

/// The X.509 attributes requested.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attributes {
    pub common_name: Option<String>,
    pub organizations: Vec<String>,
    pub dns_names: Vec<String>,
    pub ip_addresses: Vec<IpAddr>,
    pub uris: Vec<String>,
    pub email_addresses: Vec<String>,
    pub is_ca: bool,
    pub usages: Vec<String>,
    pub duration: Duration,
    pub public_key: Option<PublicKey>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PublicKey {
    pub algorithm: KeyAlgorithm,
    pub size: u32,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum KeyAlgorithm {
    Rsa,
    Ecdsa,
    Ed25519,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("invalid PEM: {0}")]
    Pem(String),

    #[error("invalid certificate signing request: {0}")]
    Csr(String),

    #[error("invalid duration {duration:?}: {error}")]
    Duration {
        duration: String,
        error: crate::k8s::duration::ParseError,
    },
}

// === impl Request ===

impl Request {
    /// Decodes the request's CSR and merges in the attributes cert-manager
    /// carries on the resource itself.
    pub fn from_resource(cr: &CertificateRequest) -> Result<Self, DecodeError> {
        let spec = &cr.spec;
        let mut attributes = decode_csr(&spec.request.0)?;

        attributes.is_ca |= spec.is_ca;
        attributes.usages = match spec.usages.as_ref() {
            Some(usages) if !usages.is_empty() => usages.clone(),
            _ => DEFAULT_USAGES.iter().map(|u| u.to_string()).collect(),
        };
        attributes.duration = match spec.duration.as_deref() {
            Some(d) => d
                .parse::<GoDuration>()
                .map_err(|error| DecodeError::Duration {
                    duration: d.to_string(),
                    error,
                })?
                .into(),
            None => DEFAULT_DURATION,
        };

        Ok(Self {
            id: ResourceId::of(cr),
            identity: Identity {
                username: spec.username.clone().unwrap_or_default(),
                uid: spec.uid.clone(),
                groups: spec.groups.clone().unwrap_or_default(),
                extra: spec.extra.clone().unwrap_or_default(),
            },
            issuer: Issuer {
                name: spec.issuer_ref.name.clone(),
                kind: spec.issuer_ref.kind().to_string(),
                group: spec.issuer_ref.group().to_string(),
            },
            attributes,
        })
    }
}

// === impl Identity ===

impl Identity {
    /// Returns the `(namespace, name)` of the service account this identity
    /// represents, if any.
    pub fn service_account(&self) -> Option<(&str, &str)> {
        let rest = self.username.strip_prefix(SERVICE_ACCOUNT_PREFIX)?;
        let (ns, name) = rest.split_once(':')?;
        if ns.is_empty() || name.is_empty() || name.contains(':') {
            return None;
        }
        Some((ns, name))
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.username)
    }
}

// === impl Attributes ===

impl Default for Attributes {
    fn default() -> Self {
        Self {
            common_name: None,
            organizations: vec![],
            dns_names: vec![],
            ip_addresses: vec![],
            uris: vec![],
            email_addresses: vec![],
            is_ca: false,
            usages: DEFAULT_USAGES.iter().map(|u| u.to_string()).collect(),
            duration: DEFAULT_DURATION,
            public_key: None,
        }
    }
}

// === impl KeyAlgorithm ===

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Rsa => "RSA",
            Self::Ecdsa => "ECDSA",
            Self::Ed25519 => "Ed25519",
        })
    }
}

impl FromStr for KeyAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("rsa") {
            Ok(Self::Rsa)
        } else if s.eq_ignore_ascii_case("ecdsa") {
            Ok(Self::Ecdsa)
        } else if s.eq_ignore_ascii_case("ed25519") {
            Ok(Self::Ed25519)
        } else {
            Err(format!(
                "unsupported algorithm {s:?}; expected one of RSA, ECDSA, Ed25519"
            ))
        }
    }
}

fn decode_csr(pem: &[u8]) -> Result<Attributes, DecodeError> {
    let (_, pem) =
        x509_parser::pem::parse_x509_pem(pem).map_err(|e| DecodeError::Pem(e.to_string()))?;
    let (_, csr) = X509CertificationRequest::from_der(&pem.contents)
        .map_err(|e| DecodeError::Csr(e.to_string()))?;
    let info = &csr.certification_request_info;

    let mut attrs = Attributes {
        common_name: info
            .subject
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .map(str::to_string),
        organizations: info
            .subject
            .iter_organization()
            .filter_map(|o| o.as_str().ok())
            .map(str::to_string)
            .collect(),
        ..Default::default()
    };

    for ext in csr.requested_extensions().into_iter().flatten() {
        match ext {
            ParsedExtension::SubjectAlternativeName(san) => {
                for name in san.general_names.iter() {
                    match name {
                        GeneralName::DNSName(n) => attrs.dns_names.push(n.to_string()),
                        GeneralName::RFC822Name(n) => attrs.email_addresses.push(n.to_string()),
                        GeneralName::URI(n) => attrs.uris.push(n.to_string()),
                        GeneralName::IPAddress(bytes) => {
                            let ip = ip_from_bytes(bytes).ok_or_else(|| {
                                DecodeError::Csr(format!("malformed IP SAN: {bytes:?}"))
                            })?;
                            attrs.ip_addresses.push(ip);
                        }
                        _ => {}
                    }
                }
            }
            ParsedExtension::BasicConstraints(bc) => attrs.is_ca |= bc.ca,
            _ => {}
        }
    }

    attrs.public_key = match info.subject_pki.parsed() {
        Ok(ParsedKey::RSA(rsa)) => Some(PublicKey {
            algorithm: KeyAlgorithm::Rsa,
            size: rsa.key_size() as u32,
        }),
        Ok(ParsedKey::EC(ec)) => Some(PublicKey {
            algorithm: KeyAlgorithm::Ecdsa,
            size: ec.key_size() as u32,
        }),
        _ if info.subject_pki.algorithm.algorithm.to_id_string() == ED25519_OID => {
            Some(PublicKey {
                algorithm: KeyAlgorithm::Ed25519,
                size: 256,
            })
        }
        _ => None,
    };

    Ok(attrs)
}

fn ip_from_bytes(bytes: &[u8]) -> Option<IpAddr> {
    if let Ok(octets) = <[u8; 4]>::try_from(bytes) {
        return Some(Ipv4Addr::from(octets).into());
    }
    if let Ok(octets) = <[u8; 16]>::try_from(bytes) {
        return Some(Ipv6Addr::from(octets).into());
    }
    None
}
