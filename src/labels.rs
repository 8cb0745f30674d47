//! Well-known label keys/values shared between the runtime boundary, the
//! translator and the reconciler.

/// Carried by workloads; scopes ASGs and C2C selectors to a platform space.
pub const SPACE_GUID_LABEL_KEY: &str = "cloudfoundry.org/space-guid";

/// Carried by workloads; `"STG"` marks a staging workload, anything else
/// (including absence) is treated as running.
pub const SOURCE_TYPE_LABEL_KEY: &str = "cloudfoundry.org/source-type";
pub const SOURCE_TYPE_STAGING_VALUE: &str = "STG";

/// Carried by workloads; the platform application identifier used by C2C
/// endpoint selectors.
pub const APP_GUID_LABEL_KEY: &str = "cloudfoundry.org/app-guid";

/// Ownership label on every network policy this agent manages.
pub const NETWORK_POLICY_APP_LABEL_KEY: &str = "app";
pub const NETWORK_POLICY_APP_LABEL_VALUE: &str = "policy-agent";

/// Carried by ASG-derived network policies; mirrors the ASG's human name.
pub const NETWORK_POLICY_RULE_NAME_LABEL_KEY: &str = "rule-name";

/// Name prefix for the aggregated C2C network policy of a source application.
pub const C2C_NAME_PREFIX: &str = "c2c-";

pub fn c2c_policy_name(source_id: &str) -> String {
    format!("{C2C_NAME_PREFIX}{source_id}")
}
