//! Drives the desired state of owned `NetworkPolicy` objects from the
//! upstream ASG and C2C feeds: delete what's no longer desired, then
//! create-or-update every ASG and aggregated C2C policy.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, error, info};

use crate::crd::NetworkPolicy;
use crate::error::ReconcileError;
use crate::labels;
use crate::policy_client::{Policy, SecurityGroup};
use crate::runtime::PolicyStore;
use crate::translator;

/// Reconciles the cluster's owned `NetworkPolicy` objects against the
/// given security groups and C2C policies. A single translation failure
/// (currently only an ASG producing zero endpoint selectors) aborts the
/// whole pass without touching any other object, mirroring the upstream
/// agent's all-or-nothing behavior for a reconcile cycle.
pub async fn reconcile(
    store: &dyn PolicyStore,
    namespace: &str,
    security_groups: &[SecurityGroup],
    c2c_policies: &[Policy],
) -> Result<(), ReconcileError> {
    let aggregated = aggregate_c2c(c2c_policies);
    let desired_names = desired_names(security_groups, &aggregated);

    remove_obsolete(store, &desired_names).await?;

    for asg in security_groups {
        let desired = translator::translate_asg(asg, namespace)?;
        create_or_update(store, desired).await?;
    }

    for (source_id, destinations) in &aggregated {
        let desired = translator::translate_c2c(source_id, destinations, namespace);
        create_or_update(store, desired).await?;
    }

    Ok(())
}

/// Groups C2C policies by `(source.id, destination.id)`, using a
/// `BTreeMap` so both the source and destination iteration order are
/// deterministic — required for the derived `PartialEq` change detection
/// in [`create_or_update`] to be stable across reconcile passes.
fn aggregate_c2c(policies: &[Policy]) -> BTreeMap<String, BTreeMap<String, Vec<crate::policy_client::Destination>>> {
    let mut aggregated: BTreeMap<String, BTreeMap<String, Vec<crate::policy_client::Destination>>> =
        BTreeMap::new();

    for policy in policies {
        aggregated
            .entry(policy.source.id.clone())
            .or_default()
            .entry(policy.destination.id.clone())
            .or_default()
            .push(policy.destination.clone());
    }

    aggregated
}

fn desired_names(
    security_groups: &[SecurityGroup],
    aggregated: &BTreeMap<String, BTreeMap<String, Vec<crate::policy_client::Destination>>>,
) -> BTreeSet<String> {
    security_groups
        .iter()
        .map(|asg| asg.guid.clone())
        .chain(aggregated.keys().map(|source_id| labels::c2c_policy_name(source_id)))
        .collect()
}

async fn remove_obsolete(store: &dyn PolicyStore, desired_names: &BTreeSet<String>) -> Result<(), ReconcileError> {
    let owned = store.list_owned_network_policies().await?;

    for policy in owned {
        let name = policy.metadata.name.clone().unwrap_or_default();
        if !desired_names.contains(&name) {
            store.delete_network_policy(&name).await?;
            info!(network_policy = name, "deleted obsolete network policy");
        }
    }

    Ok(())
}

async fn create_or_update(store: &dyn PolicyStore, mut desired: NetworkPolicy) -> Result<(), ReconcileError> {
    let name = desired.metadata.name.clone().unwrap_or_default();

    match store.get_network_policy(&name).await? {
        None => {
            store.create_network_policy(&desired).await?;
            info!(network_policy = name, "created network policy");
        }
        Some(existing) => {
            desired.metadata.resource_version = existing.metadata.resource_version.clone();

            if existing.specs == desired.specs {
                debug!(network_policy = name, "unchanged network policy, no update necessary");
                return Ok(());
            }

            store.update_network_policy(&desired).await?;
            debug!(network_policy = name, "updated network policy");
        }
    }

    Ok(())
}

/// Logs a reconcile failure with the context an operator needs to find the
/// offending upstream object, without changing the `Result` the caller sees.
pub fn log_failure(err: &ReconcileError) {
    error!(error = %err, "reconcile failed");
}
