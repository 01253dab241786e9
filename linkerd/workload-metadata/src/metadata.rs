use crate::ClientId;
use linkerd_baggage::{Baggage, Entry};
use linkerd_filter_state::Object;
use std::{borrow::Cow, fmt, net::IpAddr, str::FromStr};
use tracing::debug;

/// Baggage keys that describe a workload.
///
/// Each field has a canonical key, used when rendering metadata back into
/// baggage, and may be set by a number of aliases following the
/// OpenTelemetry Kubernetes resource conventions.
pub mod keys {
    pub const WORKLOAD_NAME: &str = "workload.name";
    pub const WORKLOAD_TYPE: &str = "workload.type";
    pub const WORKLOAD_INSTANCE: &str = "workload.instance";
    pub const WORKLOAD_IP: &str = "workload.ip";
    pub const CLUSTER_ID: &str = "cluster.id";
    pub const SERVICE_NAME: &str = "service.name";
    pub const SERVICE_VERSION: &str = "service.version";
    pub const APP_NAME: &str = "app.name";
    pub const APP_VERSION: &str = "app.version";
    pub const WORKLOAD_NAMESPACE: &str = "workload.namespace";
    pub const WORKLOAD_SERVICE_ACCOUNT: &str = "workload.service_account";
    pub const TRUST_DOMAIN: &str = "identity.trust_domain";
    pub const PRINCIPAL: &str = "identity.principal";

    pub const K8S_DEPLOYMENT_NAME: &str = "k8s.deployment.name";
    pub const K8S_JOB_NAME: &str = "k8s.job.name";
    pub const K8S_CRONJOB_NAME: &str = "k8s.cronjob.name";
    pub const K8S_POD_NAME: &str = "k8s.pod.name";
    pub const K8S_POD_IP: &str = "k8s.pod.ip";
    pub const K8S_CLUSTER_NAME: &str = "k8s.cluster.name";
    pub const K8S_NAMESPACE_NAME: &str = "k8s.namespace.name";
    pub const K8S_SERVICE_ACCOUNT_NAME: &str = "k8s.serviceaccount.name";
}

/// Describes the workload that originated a request.
///
/// Descriptive fields are taken from the request's baggage.
///
/// The trust domain and principal are security-sensitive: they are only ever
/// taken from the connection's verified peer identity. Values a client
/// asserts about itself under `identity.*` keys are ignored, so a plaintext
/// client has neither.
///
/// The namespace and service account are descriptive, but the peer identity
/// replaces the baggage values whenever it encodes them.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct WorkloadMetadata {
    workload_name: Option<String>,
    workload_type: Option<WorkloadType>,
    instance_name: Option<String>,
    instance_ip: Option<IpAddr>,
    cluster_id: Option<String>,
    canonical_name: Option<String>,
    canonical_revision: Option<String>,
    app_name: Option<String>,
    app_version: Option<String>,
    namespace: Option<String>,
    service_account: Option<String>,
    trust_domain: Option<String>,
    principal: Option<String>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum WorkloadType {
    Pod,
    Deployment,
    Job,
    CronJob,
    Unknown,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Field {
    WorkloadName,
    WorkloadType,
    InstanceName,
    InstanceIp,
    ClusterId,
    CanonicalName,
    CanonicalRevision,
    AppName,
    AppVersion,
    Namespace,
    ServiceAccount,
    TrustDomain,
    Principal,
}

// === impl WorkloadMetadata ===

impl WorkloadMetadata {
    /// Builds metadata from a request's baggage and its connection's peer
    /// identity.
    ///
    /// Members are applied in order, so the last occurrence of a field wins.
    /// Unrecognized keys, empty values and unparseable values are ignored.
    pub fn from_baggage(baggage: &Baggage, peer: Option<&ClientId>) -> Self {
        let mut md = Self::default();
        for entry in baggage {
            md.apply(entry);
        }

        // A bare pod is its own workload.
        if md.workload_name.is_none() && md.workload_type.is_none() {
            if let Some(pod) = &md.instance_name {
                md.workload_name = Some(pod.clone());
                md.workload_type = Some(WorkloadType::Pod);
            }
        }

        if let Some(peer) = peer {
            verified(Field::Principal, &mut md.principal, Some(peer.principal()));
            verified(Field::TrustDomain, &mut md.trust_domain, peer.trust_domain());
            verified(Field::Namespace, &mut md.namespace, peer.namespace());
            verified(
                Field::ServiceAccount,
                &mut md.service_account,
                peer.service_account(),
            );
        }

        md
    }

    fn apply(&mut self, entry: &Entry) {
        let (key, value) = (entry.key(), entry.value());
        let (field, workload_type) = match Field::from_key(key) {
            Some(f) => f,
            None => return,
        };
        if value.is_empty() {
            debug!(%key, "Ignoring empty baggage value");
            return;
        }
        if field.is_security_sensitive() {
            debug!(%key, %value, "Ignoring identity asserted in baggage");
            return;
        }

        if let Some(wt) = workload_type {
            self.workload_type = Some(wt);
        }
        let value = value.to_string();
        match field {
            Field::WorkloadName => self.workload_name = Some(value),
            Field::WorkloadType => {
                self.workload_type = Some(value.parse().unwrap_or(WorkloadType::Unknown))
            }
            Field::InstanceName => self.instance_name = Some(value),
            Field::InstanceIp => match value.parse() {
                Ok(ip) => self.instance_ip = Some(ip),
                Err(error) => debug!(%key, %value, %error, "Ignoring invalid IP address"),
            },
            Field::ClusterId => self.cluster_id = Some(value),
            Field::CanonicalName => self.canonical_name = Some(value),
            Field::CanonicalRevision => self.canonical_revision = Some(value),
            Field::AppName => self.app_name = Some(value),
            Field::AppVersion => self.app_version = Some(value),
            Field::Namespace => self.namespace = Some(value),
            Field::ServiceAccount => self.service_account = Some(value),
            Field::TrustDomain | Field::Principal => {}
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn workload_name(&self) -> Option<&str> {
        self.workload_name.as_deref()
    }

    pub fn workload_type(&self) -> Option<WorkloadType> {
        self.workload_type
    }

    pub fn instance_name(&self) -> Option<&str> {
        self.instance_name.as_deref()
    }

    pub fn instance_ip(&self) -> Option<IpAddr> {
        self.instance_ip
    }

    pub fn cluster_id(&self) -> Option<&str> {
        self.cluster_id.as_deref()
    }

    pub fn canonical_name(&self) -> Option<&str> {
        self.canonical_name.as_deref()
    }

    pub fn canonical_revision(&self) -> Option<&str> {
        self.canonical_revision.as_deref()
    }

    pub fn app_name(&self) -> Option<&str> {
        self.app_name.as_deref()
    }

    pub fn app_version(&self) -> Option<&str> {
        self.app_version.as_deref()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn service_account(&self) -> Option<&str> {
        self.service_account.as_deref()
    }

    pub fn trust_domain(&self) -> Option<&str> {
        self.trust_domain.as_deref()
    }

    pub fn principal(&self) -> Option<&str> {
        self.principal.as_deref()
    }

    /// Looks up a field by any of its baggage keys.
    ///
    /// This supports access log and header templates that refer to fields by
    /// name.
    pub fn field(&self, key: &str) -> Option<Cow<'_, str>> {
        let (field, _) = Field::from_key(key)?;
        self.get(field)
    }

    fn get(&self, field: Field) -> Option<Cow<'_, str>> {
        let s = match field {
            Field::WorkloadName => &self.workload_name,
            Field::WorkloadType => {
                return self.workload_type.map(|t| Cow::Borrowed(t.as_str()));
            }
            Field::InstanceName => &self.instance_name,
            Field::InstanceIp => return self.instance_ip.map(|ip| Cow::Owned(ip.to_string())),
            Field::ClusterId => &self.cluster_id,
            Field::CanonicalName => &self.canonical_name,
            Field::CanonicalRevision => &self.canonical_revision,
            Field::AppName => &self.app_name,
            Field::AppVersion => &self.app_version,
            Field::Namespace => &self.namespace,
            Field::ServiceAccount => &self.service_account,
            Field::TrustDomain => &self.trust_domain,
            Field::Principal => &self.principal,
        };
        s.as_deref().map(Cow::Borrowed)
    }

    /// Renders the populated fields as baggage, using each field's canonical
    /// key.
    pub fn to_baggage(&self) -> Baggage {
        Field::ALL
            .iter()
            .filter_map(|&f| {
                let value = self.get(f)?;
                Some(Entry::new(f.canonical_key(), value))
            })
            .collect()
    }
}

impl Object for WorkloadMetadata {
    fn serialize_as_string(&self) -> Option<String> {
        Some(self.to_baggage().to_string())
    }
}

/// Replaces a self-asserted value with the one from the peer's verified
/// identity, if there is one.
fn verified(field: Field, value: &mut Option<String>, peer: Option<&str>) {
    let peer = match peer {
        Some(peer) => peer,
        None => return,
    };
    if let Some(asserted) = value.as_deref() {
        if asserted != peer {
            debug!(
                key = field.canonical_key(),
                %asserted,
                verified = %peer,
                "Baggage value overridden by peer identity"
            );
        }
    }
    *value = Some(peer.to_string());
}

// === impl Field ===

impl Field {
    /// Fields in rendering order.
    const ALL: [Field; 13] = [
        Field::WorkloadName,
        Field::WorkloadType,
        Field::InstanceName,
        Field::InstanceIp,
        Field::ClusterId,
        Field::CanonicalName,
        Field::CanonicalRevision,
        Field::AppName,
        Field::AppVersion,
        Field::Namespace,
        Field::ServiceAccount,
        Field::TrustDomain,
        Field::Principal,
    ];

    fn from_key(key: &str) -> Option<(Self, Option<WorkloadType>)> {
        use self::keys::*;

        let workload = |t| Some((Field::WorkloadName, Some(t)));
        let field = match key {
            WORKLOAD_NAME => Field::WorkloadName,
            K8S_DEPLOYMENT_NAME => return workload(WorkloadType::Deployment),
            K8S_JOB_NAME => return workload(WorkloadType::Job),
            K8S_CRONJOB_NAME => return workload(WorkloadType::CronJob),
            WORKLOAD_TYPE => Field::WorkloadType,
            WORKLOAD_INSTANCE | K8S_POD_NAME => Field::InstanceName,
            WORKLOAD_IP | K8S_POD_IP => Field::InstanceIp,
            CLUSTER_ID | K8S_CLUSTER_NAME => Field::ClusterId,
            SERVICE_NAME => Field::CanonicalName,
            SERVICE_VERSION => Field::CanonicalRevision,
            APP_NAME => Field::AppName,
            APP_VERSION => Field::AppVersion,
            WORKLOAD_NAMESPACE | K8S_NAMESPACE_NAME => Field::Namespace,
            WORKLOAD_SERVICE_ACCOUNT | K8S_SERVICE_ACCOUNT_NAME => Field::ServiceAccount,
            TRUST_DOMAIN => Field::TrustDomain,
            PRINCIPAL => Field::Principal,
            _ => return None,
        };
        Some((field, None))
    }

    fn canonical_key(self) -> &'static str {
        use self::keys::*;

        match self {
            Field::WorkloadName => WORKLOAD_NAME,
            Field::WorkloadType => WORKLOAD_TYPE,
            Field::InstanceName => WORKLOAD_INSTANCE,
            Field::InstanceIp => WORKLOAD_IP,
            Field::ClusterId => CLUSTER_ID,
            Field::CanonicalName => SERVICE_NAME,
            Field::CanonicalRevision => SERVICE_VERSION,
            Field::AppName => APP_NAME,
            Field::AppVersion => APP_VERSION,
            Field::Namespace => WORKLOAD_NAMESPACE,
            Field::ServiceAccount => WORKLOAD_SERVICE_ACCOUNT,
            Field::TrustDomain => TRUST_DOMAIN,
            Field::Principal => PRINCIPAL,
        }
    }

    fn is_security_sensitive(self) -> bool {
        matches!(self, Field::TrustDomain | Field::Principal)
    }
}

// === impl WorkloadType ===

impl WorkloadType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pod => "pod",
            Self::Deployment => "deployment",
            Self::Job => "job",
            Self::CronJob => "cronjob",
            Self::Unknown => "unknown",
        }
    }
}

impl FromStr for WorkloadType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = match s.to_ascii_lowercase().as_str() {
            "pod" => Self::Pod,
            "deployment" => Self::Deployment,
            "job" => Self::Job,
            "cronjob" => Self::CronJob,
            _ => Self::Unknown,
        };
        Ok(t)
    }
}

impl fmt::Display for WorkloadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
