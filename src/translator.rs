//! Pure translation from upstream policy shapes into [`crate::crd`] types.
//! Nothing here talks to Kubernetes or the policy service;
//! every function is a total, side-effect-free mapping so the reconciler can
//! unit test translation without a fake of anything.

use std::collections::BTreeMap;

use tracing::warn;

use crate::crd::{
    EgressRule, EndpointSelector, IcmpField, IcmpFamily, IcmpRule, L4Proto, LabelSelectorOperator,
    LabelSelectorRequirement, NetworkPolicy, NetworkPolicySpec, PortProtocol, PortRule,
};
use crate::error::TranslateError;
use crate::labels::{
    self, APP_GUID_LABEL_KEY, NETWORK_POLICY_APP_LABEL_KEY, NETWORK_POLICY_APP_LABEL_VALUE,
    NETWORK_POLICY_RULE_NAME_LABEL_KEY, SOURCE_TYPE_LABEL_KEY, SOURCE_TYPE_STAGING_VALUE,
    SPACE_GUID_LABEL_KEY,
};
use crate::policy_client::{Destination, SecurityGroup, SecurityGroupRule};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// Builds the `NetworkPolicy` for one ASG. Fails if the ASG's scoping
/// fields (`staging_default`/`running_default`/the two space-guid lists)
/// produce zero endpoint selectors — an object with no specs would allow
/// all egress for nobody, which is never useful and always a
/// misconfiguration upstream.
pub fn translate_asg(asg: &SecurityGroup, namespace: &str) -> Result<NetworkPolicy, TranslateError> {
    let egress = egress_rules_from_asg(&asg.rules);
    let selectors = endpoint_selectors_from_asg(asg);

    if selectors.is_empty() {
        return Err(TranslateError::NoSpecs {
            guid: asg.guid.clone(),
        });
    }

    let specs = selectors
        .into_iter()
        .map(|endpoint_selector| NetworkPolicySpec {
            endpoint_selector,
            egress: egress.clone(),
        })
        .collect();

    let mut object_labels = BTreeMap::new();
    object_labels.insert(
        NETWORK_POLICY_APP_LABEL_KEY.to_string(),
        NETWORK_POLICY_APP_LABEL_VALUE.to_string(),
    );
    object_labels.insert(
        NETWORK_POLICY_RULE_NAME_LABEL_KEY.to_string(),
        asg.name.clone(),
    );

    Ok(NetworkPolicy {
        metadata: ObjectMeta {
            name: Some(asg.guid.clone()),
            namespace: Some(namespace.to_string()),
            labels: Some(object_labels),
            ..Default::default()
        },
        specs,
    })
}

/// Builds the aggregated `NetworkPolicy` for one C2C source application.
/// `destinations` maps destination app guid to every `Destination` a policy
/// named for that pair, and is walked in key order so the egress rule list
/// (and therefore the serialized object) is deterministic across runs.
pub fn translate_c2c(
    source_id: &str,
    destinations: &BTreeMap<String, Vec<Destination>>,
    namespace: &str,
) -> NetworkPolicy {
    let egress = destinations
        .iter()
        .map(|(destination_id, dests)| egress_rule_for_c2c_destination(destination_id, dests))
        .collect();

    let mut source_selector_labels = BTreeMap::new();
    source_selector_labels.insert(APP_GUID_LABEL_KEY.to_string(), source_id.to_string());

    let mut object_labels = BTreeMap::new();
    object_labels.insert(
        NETWORK_POLICY_APP_LABEL_KEY.to_string(),
        NETWORK_POLICY_APP_LABEL_VALUE.to_string(),
    );

    NetworkPolicy {
        metadata: ObjectMeta {
            name: Some(labels::c2c_policy_name(source_id)),
            namespace: Some(namespace.to_string()),
            labels: Some(object_labels),
            ..Default::default()
        },
        specs: vec![NetworkPolicySpec {
            endpoint_selector: EndpointSelector::match_labels(source_selector_labels),
            egress,
        }],
    }
}

fn egress_rule_for_c2c_destination(destination_id: &str, destinations: &[Destination]) -> EgressRule {
    let mut to_endpoint_labels = BTreeMap::new();
    to_endpoint_labels.insert(APP_GUID_LABEL_KEY.to_string(), destination_id.to_string());

    let ports = destinations
        .iter()
        .map(|dest| PortProtocol {
            port: dest.ports.start.to_string(),
            end_port: Some(i32::from(dest.ports.end)),
            protocol: c2c_l4_proto(&dest.protocol),
        })
        .collect();

    EgressRule {
        to_endpoints: vec![EndpointSelector::match_labels(to_endpoint_labels)],
        to_ports: vec![PortRule { ports }],
        ..Default::default()
    }
}

/// Uppercases the upstream protocol verbatim rather than coercing anything
/// besides `tcp`/`udp` into TCP — cilium's own `L4Proto` is just a string,
/// so an unrecognized value still reaches the CRD, surfaced instead of
/// silently mislabeled.
fn c2c_l4_proto(protocol: &str) -> L4Proto {
    L4Proto::new(protocol.to_ascii_uppercase())
}

/// Translates every ASG rule into zero or one egress rule each. A rule with
/// no valid destination, or an unsupported protocol, is dropped with a
/// warning rather than failing the whole ASG — this mirrors the upstream
/// agent, which never lets one bad rule block the rest of a security group.
pub fn egress_rules_from_asg(rules: &[SecurityGroupRule]) -> Vec<EgressRule> {
    rules
        .iter()
        .filter_map(egress_rule_from_asg_rule)
        .collect()
}

fn egress_rule_from_asg_rule(rule: &SecurityGroupRule) -> Option<EgressRule> {
    let to_cidr: Vec<String> = rule
        .destination
        .split(',')
        .map(str::trim)
        .filter_map(|destination| match to_cidrs(destination) {
            Ok(cidrs) => Some(cidrs),
            Err(reason) => {
                warn!(destination, reason, "invalid destination, rule will be ignored");
                None
            }
        })
        .flatten()
        .collect();

    if to_cidr.is_empty() {
        warn!(
            destination = rule.destination,
            "no valid destination found, rule will be ignored"
        );
        return None;
    }

    let mut egress = EgressRule {
        to_cidr,
        ..Default::default()
    };

    match rule.protocol.as_str() {
        "tcp" => egress.to_ports = to_ports(&rule.ports, L4Proto::tcp()),
        "udp" => egress.to_ports = to_ports(&rule.ports, L4Proto::udp()),
        "icmp" => egress.icmps = vec![icmp_rule(rule.icmp_type, IcmpFamily::IPv4)],
        "icmpv6" => egress.icmps = vec![icmp_rule(rule.icmp_type, IcmpFamily::IPv6)],
        "all" => {}
        other => {
            warn!(protocol = other, "unsupported protocol, rule will be ignored");
            return None;
        }
    }

    Some(egress)
}

/// Expands a `"80,443"`-style port list into one `PortRule` per token, each
/// holding a single `start-end` `PortProtocol`. An empty list means "all
/// ports". A token whose bounds don't parse as integers is dropped — it
/// does not fail the surrounding rule.
pub fn to_ports(port_str: &str, protocol: L4Proto) -> Vec<PortRule> {
    let port_str = if port_str.is_empty() { "1-65535" } else { port_str };

    port_str
        .split(',')
        .filter_map(|token| {
            let token = token.trim();
            let (start, end) = match token.split_once('-') {
                Some((start, end)) => (start, end),
                None => (token, token),
            };

            let start: i32 = start.parse().ok()?;
            let end: i32 = end.parse().ok()?;

            Some(PortRule {
                ports: vec![PortProtocol {
                    port: start.to_string(),
                    end_port: Some(end),
                    protocol: protocol.clone(),
                }],
            })
        })
        .collect()
}

fn icmp_rule(icmp_type: i32, family: IcmpFamily) -> IcmpRule {
    let fields = if icmp_type == -1 {
        icmp_types(family)
            .iter()
            .map(|&type_| IcmpField { family, type_ })
            .collect()
    } else {
        vec![IcmpField {
            family,
            type_: icmp_type,
        }]
    };

    IcmpRule { fields }
}

/// The ICMP type numbers covered by "all standard types" (`icmp_type ==
/// -1`). Matches the well-known IANA type registry entries, not every
/// possible 8-bit value.
pub fn icmp_types(family: IcmpFamily) -> &'static [i32] {
    match family {
        IcmpFamily::IPv4 => &[0, 3, 5, 8, 9, 10, 11, 12, 13, 14, 40, 42, 43],
        IcmpFamily::IPv6 => &[
            1, 2, 3, 4, 128, 129, 130, 131, 132, 133, 134, 135, 136, 137, 138, 139, 140, 141, 142,
            144, 145, 146, 147, 157, 158, 160, 161,
        ],
    }
}

/// Parses one destination token (a bare IP, a CIDR, or an IPv4 range) into
/// its minimal covering set of CIDR strings.
fn to_cidrs(destination: &str) -> Result<Vec<String>, &'static str> {
    if destination.is_empty() {
        return Err("empty destination");
    }

    if destination.contains('/') {
        return Ok(vec![destination.to_string()]);
    }

    if destination.contains('-') {
        return ip_range_to_cidrs(destination);
    }

    Ok(vec![format!("{destination}/32")])
}

fn ip_range_to_cidrs(ip_range: &str) -> Result<Vec<String>, &'static str> {
    let (start, end) = ip_range.split_once('-').ok_or("invalid IP range format")?;

    let start: std::net::Ipv4Addr = start.trim().parse().map_err(|_| "invalid IP addresses in range")?;
    let end: std::net::Ipv4Addr = end.trim().parse().map_err(|_| "invalid IP addresses in range")?;

    let start = u32::from(start);
    let end = u32::from(end);

    if start > end {
        return Err("start IP is greater than end IP");
    }

    Ok(range_to_cidrs(start, end))
}

/// Finds the largest CIDR block aligned at `start` that still fits within
/// `[start, end]`, emits it, then recurses on the remainder. Produces the
/// minimal set of CIDRs covering the range.
fn range_to_cidrs(mut start: u32, end: u32) -> Vec<String> {
    let mut cidrs = Vec::new();

    while start <= end {
        let max_prefix_len = if start == 0 { 32 } else { start.trailing_zeros() };
        let range_size = u64::from(end) - u64::from(start) + 1;

        let mut prefix_len = 32;
        for p in (0..=max_prefix_len).rev() {
            let block_size = 1u64 << p;
            if block_size <= range_size {
                prefix_len = 32 - p;
                break;
            }
        }

        cidrs.push(format!("{}/{}", std::net::Ipv4Addr::from(start), prefix_len));

        if prefix_len == 0 {
            break;
        }

        let block_size = 1u32 << (32 - prefix_len);
        match start.checked_add(block_size) {
            Some(next) => start = next,
            None => break,
        }
    }

    cidrs
}

/// Synthesizes the endpoint selectors that scope an ASG's egress rules to
/// the workloads it applies to. Order follows the upstream agent exactly:
/// staging-default, then running-default, then running space guids, then
/// staging space guids — each only present when the corresponding ASG field
/// is set.
pub fn endpoint_selectors_from_asg(asg: &SecurityGroup) -> Vec<EndpointSelector> {
    let mut selectors = Vec::new();

    if asg.staging_default {
        selectors.push(EndpointSelector::match_expressions(vec![
            source_type_requirement(LabelSelectorOperator::In, SOURCE_TYPE_STAGING_VALUE),
        ]));
    }

    if asg.running_default {
        selectors.push(EndpointSelector::match_expressions(vec![
            source_type_requirement(LabelSelectorOperator::NotIn, SOURCE_TYPE_STAGING_VALUE),
        ]));
    }

    if !asg.running_space_guids.is_empty() {
        selectors.push(EndpointSelector::match_expressions(vec![
            space_guid_requirement(&asg.running_space_guids),
            source_type_requirement(LabelSelectorOperator::NotIn, SOURCE_TYPE_STAGING_VALUE),
        ]));
    }

    if !asg.staging_space_guids.is_empty() {
        selectors.push(EndpointSelector::match_expressions(vec![
            space_guid_requirement(&asg.staging_space_guids),
            source_type_requirement(LabelSelectorOperator::In, SOURCE_TYPE_STAGING_VALUE),
        ]));
    }

    selectors
}

fn source_type_requirement(operator: LabelSelectorOperator, value: &str) -> LabelSelectorRequirement {
    LabelSelectorRequirement {
        key: SOURCE_TYPE_LABEL_KEY.to_string(),
        operator,
        values: vec![value.to_string()],
    }
}

fn space_guid_requirement(guids: &[String]) -> LabelSelectorRequirement {
    LabelSelectorRequirement {
        key: SPACE_GUID_LABEL_KEY.to_string(),
        operator: LabelSelectorOperator::In,
        values: guids.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(destination: &str, protocol: &str, ports: &str) -> SecurityGroupRule {
        SecurityGroupRule {
            destination: destination.to_string(),
            protocol: protocol.to_string(),
            ports: ports.to_string(),
            icmp_type: 0,
        }
    }

    #[test]
    fn tcp_rule_creates_one_port_rule_per_port() {
        let rules = vec![rule("10.0.0.1", "tcp", "80,443")];
        let egress = egress_rules_from_asg(&rules);
        assert_eq!(egress.len(), 1);
        assert_eq!(egress[0].to_cidr, vec!["10.0.0.1/32"]);
        assert_eq!(egress[0].to_ports.len(), 2);
        assert_eq!(egress[0].to_ports[0].ports[0].port, "80");
        assert_eq!(egress[0].to_ports[0].ports[0].protocol, L4Proto::tcp());
        assert_eq!(egress[0].to_ports[1].ports[0].port, "443");
    }

    #[test]
    fn icmp_without_all_types_carries_single_field() {
        let mut r = rule("10.0.0.8", "icmp", "");
        r.icmp_type = 8;
        let egress = egress_rules_from_asg(&[r]);
        assert_eq!(egress.len(), 1);
        assert!(egress[0].to_ports.is_empty());
        assert_eq!(
            egress[0].icmps,
            vec![IcmpRule {
                fields: vec![IcmpField {
                    family: IcmpFamily::IPv4,
                    type_: 8,
                }],
            }]
        );
    }

    #[test]
    fn icmp_all_types_expands_to_standard_list() {
        let mut r = rule("10.0.0.8", "icmpv6", "");
        r.icmp_type = -1;
        let egress = egress_rules_from_asg(&[r]);
        assert_eq!(egress[0].icmps[0].fields.len(), icmp_types(IcmpFamily::IPv6).len());
        for &type_ in icmp_types(IcmpFamily::IPv6) {
            assert!(egress[0].icmps[0]
                .fields
                .contains(&IcmpField { family: IcmpFamily::IPv6, type_ }));
        }
    }

    #[test]
    fn all_protocol_sets_only_cidrs() {
        let egress = egress_rules_from_asg(&[rule("10.0.0.9/24", "all", "")]);
        assert_eq!(egress[0].to_cidr, vec!["10.0.0.9/24"]);
        assert!(egress[0].to_ports.is_empty());
        assert!(egress[0].icmps.is_empty());
    }

    #[test]
    fn unknown_protocol_drops_rule() {
        assert!(egress_rules_from_asg(&[rule("10.0.0.3", "foo", "1234")]).is_empty());
    }

    #[test]
    fn empty_destination_drops_rule() {
        assert!(egress_rules_from_asg(&[rule("", "tcp", "80")]).is_empty());
    }

    #[test]
    fn empty_ports_defaults_to_full_range() {
        let egress = egress_rules_from_asg(&[rule("10.0.0.4", "tcp", "")]);
        assert_eq!(
            egress[0].to_ports,
            vec![PortRule {
                ports: vec![PortProtocol {
                    port: "1".to_string(),
                    end_port: Some(65535),
                    protocol: L4Proto::tcp(),
                }],
            }]
        );
    }

    #[test]
    fn whitespace_around_ports_is_trimmed() {
        let egress = egress_rules_from_asg(&[rule("10.0.0.9", "tcp", " 81 ,  82")]);
        assert_eq!(egress[0].to_ports[0].ports[0].port, "81");
        assert_eq!(egress[0].to_ports[1].ports[0].port, "82");
    }

    #[test]
    fn comma_delimited_destinations_aggregate_into_one_rule() {
        let egress = egress_rules_from_asg(&[rule(
            "10.0.0.0,10.0.1.0/24,10.0.2.0-10.0.2.127",
            "tcp",
            "80",
        )]);
        assert_eq!(egress.len(), 1);
        assert_eq!(
            egress[0].to_cidr,
            vec!["10.0.0.0/32", "10.0.1.0/24", "10.0.2.0/25"]
        );
    }

    #[test]
    fn whitespace_after_comma_in_destination_is_trimmed() {
        let egress = egress_rules_from_asg(&[rule("10.0.0.1, 10.0.0.2", "tcp", "80")]);
        assert_eq!(egress[0].to_cidr, vec!["10.0.0.1/32", "10.0.0.2/32"]);
    }

    #[test]
    fn ip_range_small_within_a_24() {
        assert_eq!(
            range_to_cidrs(u32::from(std::net::Ipv4Addr::new(10, 0, 0, 0)), u32::from(std::net::Ipv4Addr::new(10, 0, 0, 7))),
            vec!["10.0.0.0/29"]
        );
    }

    #[test]
    fn ip_range_complex() {
        let start = u32::from(std::net::Ipv4Addr::new(192, 168, 1, 0));
        let end = u32::from(std::net::Ipv4Addr::new(192, 168, 1, 10));
        assert_eq!(
            range_to_cidrs(start, end),
            vec!["192.168.1.0/29", "192.168.1.8/31", "192.168.1.10/32"]
        );
    }

    #[test]
    fn ip_range_large() {
        let start = u32::from(std::net::Ipv4Addr::new(169, 255, 0, 0));
        let end = u32::from(std::net::Ipv4Addr::new(172, 15, 255, 255));
        assert_eq!(
            range_to_cidrs(start, end),
            vec!["169.255.0.0/16", "170.0.0.0/7", "172.0.0.0/12"]
        );
    }

    #[test]
    fn ip_range_stops_at_broadcast() {
        let start = u32::from(std::net::Ipv4Addr::new(255, 255, 255, 250));
        let end = u32::from(std::net::Ipv4Addr::new(255, 255, 255, 255));
        assert_eq!(
            range_to_cidrs(start, end),
            vec!["255.255.255.250/31", "255.255.255.252/30"]
        );
    }

    #[test]
    fn ip_range_maximal() {
        assert_eq!(range_to_cidrs(0, u32::MAX), vec!["0.0.0.0/0"]);
    }

    #[test]
    fn ip_range_invalid_ip_ignored() {
        assert!(egress_rules_from_asg(&[rule("10.0.0.256-10.0.0.257", "tcp", "80")]).is_empty());
    }

    #[test]
    fn ip_range_reversed_ignored() {
        assert!(egress_rules_from_asg(&[rule("10.0.0.10-10.0.0.5", "tcp", "80")]).is_empty());
    }

    #[test]
    fn selectors_for_staging_default() {
        let asg = SecurityGroup {
            staging_default: true,
            ..Default::default()
        };
        let selectors = endpoint_selectors_from_asg(&asg);
        assert_eq!(selectors.len(), 1);
        assert_eq!(
            selectors[0].match_expressions.as_ref().unwrap()[0].operator,
            LabelSelectorOperator::In
        );
    }

    #[test]
    fn selectors_for_differing_running_and_staging_spaces() {
        let asg = SecurityGroup {
            running_space_guids: vec!["guid1".to_string()],
            staging_space_guids: vec!["guid1".to_string(), "guid2".to_string()],
            ..Default::default()
        };
        let selectors = endpoint_selectors_from_asg(&asg);
        assert_eq!(selectors.len(), 2);
    }

    #[test]
    fn translate_asg_fails_without_any_selector() {
        let asg = SecurityGroup {
            guid: "asg-1".to_string(),
            ..Default::default()
        };
        let err = translate_asg(&asg, "cf-workloads").unwrap_err();
        assert!(matches!(err, TranslateError::NoSpecs { guid } if guid == "asg-1"));
    }

    #[test]
    fn translate_c2c_builds_one_egress_rule_per_destination() {
        let mut destinations = BTreeMap::new();
        destinations.insert(
            "dest-a".to_string(),
            vec![Destination {
                id: "dest-a".to_string(),
                protocol: "tcp".to_string(),
                ports: crate::policy_client::Ports { start: 8080, end: 8080 },
            }],
        );
        destinations.insert(
            "dest-b".to_string(),
            vec![Destination {
                id: "dest-b".to_string(),
                protocol: "udp".to_string(),
                ports: crate::policy_client::Ports { start: 53, end: 53 },
            }],
        );

        let np = translate_c2c("source-1", &destinations, "cf-workloads");
        assert_eq!(np.metadata.name.as_deref(), Some("c2c-source-1"));
        assert_eq!(np.specs.len(), 1);
        assert_eq!(np.specs[0].egress.len(), 2);
    }

    #[test]
    fn c2c_protocol_outside_tcp_udp_passes_through_uppercased() {
        let mut destinations = BTreeMap::new();
        destinations.insert(
            "dest-a".to_string(),
            vec![Destination {
                id: "dest-a".to_string(),
                protocol: "sctp".to_string(),
                ports: crate::policy_client::Ports { start: 80, end: 80 },
            }],
        );

        let np = translate_c2c("source-1", &destinations, "cf-workloads");
        assert_eq!(
            np.specs[0].egress[0].to_ports[0].ports[0].protocol,
            L4Proto::new("SCTP")
        );
    }
}
