//! # policy-agent
//!
//! Reconciles Application Security Group (ASG) and container-to-container
//! (C2C) policy, published by the platform policy service, into
//! `CiliumNetworkPolicy` objects consumed by the cluster's eBPF dataplane.
//!
//! The crate is split leaf-first along its component boundaries:
//! [`translator`] (pure ASG/C2C → CRD mapping), [`reconciler`] (desired-state
//! diffing against the cluster), [`agent`] (the poll loop that drives one
//! tick), and the two runtime boundaries it depends on, [`runtime`] (cluster
//! client + caches) and [`policy_client`] (upstream mTLS client).

#[macro_use]
extern crate serde;
#[macro_use]
extern crate serde_derive;
extern crate k8s_openapi;

pub mod agent;
pub mod config;
pub mod crd;
pub mod error;
pub mod labels;
pub mod policy_client;
pub mod reconciler;
pub mod runtime;
pub mod translator;
