//! The dataplane network-policy CRD this agent materializes: a minimal,
//! hand-written analogue of Cilium's `CiliumNetworkPolicy` — plain serde
//! structs plus a manual `Resource`/`Metadata` implementation, rather than
//! the `CustomResource` derive macro, for a CRD type this crate doesn't own.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::{Metadata, Resource};
use serde_with::skip_serializing_none;

/// # NetworkPolicy
///
/// Cluster resource consumed by the eBPF dataplane. `metadata.name` is
/// either an ASG `guid` or `"c2c-" + source.id`; `specs` is never empty for
/// an object the agent has written (see [`TranslateError::NoSpecs`]).
///
/// [`TranslateError::NoSpecs`]: crate::error::TranslateError::NoSpecs
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct NetworkPolicy {
    pub metadata: ObjectMeta,
    pub specs: Vec<NetworkPolicySpec>,
}

impl Resource for NetworkPolicy {
    const API_VERSION: &'static str = "cilium.io/v2";
    const GROUP: &'static str = "cilium.io";
    const KIND: &'static str = "CiliumNetworkPolicy";
    const VERSION: &'static str = "v2";
    const URL_PATH_SEGMENT: &'static str = "ciliumnetworkpolicies";
    type Scope = k8s_openapi::NamespaceResourceScope;
}

impl Metadata for NetworkPolicy {
    type Ty = ObjectMeta;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

/// One endpoint selector bound to the egress rules it governs.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct NetworkPolicySpec {
    pub endpoint_selector: EndpointSelector,
    #[serde(default)]
    pub egress: Vec<EgressRule>,
}

/// A label selector over workload labels. `match_labels` is an equality
/// match on every entry; `match_expressions` supports `In`/`NotIn` over a
/// value set.
#[skip_serializing_none]
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct EndpointSelector {
    pub match_labels: Option<BTreeMap<String, String>>,
    pub match_expressions: Option<Vec<LabelSelectorRequirement>>,
}

impl EndpointSelector {
    pub fn match_labels(labels: BTreeMap<String, String>) -> Self {
        Self {
            match_labels: Some(labels),
            match_expressions: None,
        }
    }

    pub fn match_expressions(reqs: Vec<LabelSelectorRequirement>) -> Self {
        Self {
            match_labels: None,
            match_expressions: Some(reqs),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct LabelSelectorRequirement {
    pub key: String,
    pub operator: LabelSelectorOperator,
    pub values: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LabelSelectorOperator {
    In,
    NotIn,
}

/// One egress rule: a destination (CIDRs or endpoint selectors) plus the
/// L4/ICMP filtering applied to traffic toward it.
#[skip_serializing_none]
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct EgressRule {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub to_cidr: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub to_endpoints: Vec<EndpointSelector>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub to_ports: Vec<PortRule>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub icmps: Vec<IcmpRule>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PortRule {
    pub ports: Vec<PortProtocol>,
}

#[skip_serializing_none]
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PortProtocol {
    /// Base-10 port number, stored as text (cilium's own port field is
    /// itself a string). Always a validated integer by the time a
    /// [`PortProtocol`] is constructed; tokens that fail to parse are
    /// dropped before this type is built (see `translator::to_ports`).
    pub port: String,
    pub end_port: Option<i32>,
    pub protocol: L4Proto,
}

/// The L4 protocol an egress rule's ports apply to. Cilium's own `L4Proto`
/// is just a string type, not a closed enum, so this carries the upstream
/// protocol through verbatim (uppercased) rather than coercing anything
/// outside `tcp`/`udp` into one of those two values.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(transparent)]
pub struct L4Proto(pub String);

impl L4Proto {
    pub fn tcp() -> Self {
        Self("TCP".to_string())
    }

    pub fn udp() -> Self {
        Self("UDP".to_string())
    }

    /// Wraps an already-uppercased protocol string as-is.
    pub fn new(protocol: impl Into<String>) -> Self {
        Self(protocol.into())
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct IcmpRule {
    pub fields: Vec<IcmpField>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct IcmpField {
    pub family: IcmpFamily,
    #[serde(rename = "type")]
    pub type_: i32,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum IcmpFamily {
    IPv4,
    IPv6,
}
