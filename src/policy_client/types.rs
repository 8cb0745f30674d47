//! Wire types for the upstream policy service. These mirror the upstream
//! JSON schema as-is, with no added fields, and are otherwise unremarkable
//! plain `serde` structs.

/// An Application Security Group: an ordered rule list plus the scoping
/// metadata used to synthesize endpoint selectors (see
/// `translator::endpoint_selectors`).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
pub struct SecurityGroup {
    pub guid: String,
    pub name: String,
    #[serde(default)]
    pub rules: Vec<SecurityGroupRule>,
    #[serde(default)]
    pub staging_default: bool,
    #[serde(default)]
    pub running_default: bool,
    #[serde(default)]
    pub staging_space_guids: Vec<String>,
    #[serde(default)]
    pub running_space_guids: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
pub struct SecurityGroupRule {
    pub destination: String,
    pub protocol: String,
    #[serde(default)]
    pub ports: String,
    /// Signed ICMP type; `-1` means "all standard types". Ignored for
    /// protocols other than `icmp`/`icmpv6`.
    #[serde(rename = "type", default)]
    pub icmp_type: i32,
}

/// One allowed east-west flow from `source.id` to `destination.id`.
/// Aggregated per `(source.id, destination.id)` before translation
/// (see `translator::c2c::aggregate`).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Policy {
    pub source: Source,
    pub destination: Destination,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Source {
    pub id: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Destination {
    pub id: String,
    pub protocol: String,
    pub ports: Ports,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ports {
    pub start: u16,
    pub end: u16,
}
