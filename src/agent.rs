//! The poll loop: one reconcile pass immediately on start, then one pass
//! per tick of a fixed interval, until cancelled.

use std::sync::Arc;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::Config;
use crate::policy_client::PolicyServerClient;
use crate::reconciler::{self, log_failure};
use crate::runtime::{PolicyStore, WorkloadSpaces};

pub struct Agent<S> {
    store: Arc<S>,
    policy_client: Arc<dyn PolicyServerClient>,
    namespace: String,
    poll_interval: std::time::Duration,
}

impl<S> Agent<S>
where
    S: PolicyStore + WorkloadSpaces,
{
    pub fn new(store: Arc<S>, policy_client: Arc<dyn PolicyServerClient>, config: &Config) -> Self {
        Self {
            store,
            policy_client,
            namespace: config.namespace.clone(),
            poll_interval: config.poll_interval,
        }
    }

    /// Runs until `cancellation` fires. Never returns an error: a failed
    /// pass (upstream fetch or reconcile) is logged and skipped, leaving
    /// the cluster in whatever state the last successful pass left it in.
    pub async fn run(&self, cancellation: CancellationToken) {
        info!(poll_interval = ?self.poll_interval, namespace = self.namespace, "policy-agent started");

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            self.reconcile_once().await;

            tokio::select! {
                _ = ticker.tick() => continue,
                _ = cancellation.cancelled() => {
                    info!("policy-agent stopped");
                    return;
                }
            }
        }
    }

    async fn reconcile_once(&self) {
        let c2c_policies = match self.policy_client.list_c2c_policies().await {
            Ok(policies) => policies,
            Err(err) => {
                error!(error = %err, "error fetching C2C policies");
                return;
            }
        };

        let space_guids: Vec<String> = self.store.space_guids().await.into_iter().collect();
        let security_groups = match self
            .policy_client
            .list_security_groups_for_spaces(&space_guids)
            .await
        {
            Ok(groups) => groups,
            Err(err) => {
                error!(error = %err, "error fetching security groups");
                return;
            }
        };

        if let Err(err) = reconciler::reconcile(
            self.store.as_ref(),
            &self.namespace,
            &security_groups,
            &c2c_policies,
        )
        .await
        {
            log_failure(&err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientError;
    use crate::policy_client::{Destination, Policy, Ports, SecurityGroup, SecurityGroupRule, Source};
    use crate::runtime::FakePolicyStore;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FakeClient {
        policies: Vec<Policy>,
        security_groups: Vec<SecurityGroup>,
        security_group_calls: Mutex<u32>,
    }

    #[async_trait]
    impl PolicyServerClient for FakeClient {
        async fn list_c2c_policies(&self) -> Result<Vec<Policy>, ClientError> {
            Ok(self.policies.clone())
        }

        async fn list_security_groups_for_spaces(
            &self,
            _space_guids: &[String],
        ) -> Result<Vec<SecurityGroup>, ClientError> {
            *self.security_group_calls.lock().unwrap() += 1;
            Ok(self.security_groups.clone())
        }
    }

    #[async_trait]
    impl WorkloadSpaces for FakePolicyStore {
        async fn space_guids(&self) -> std::collections::BTreeSet<String> {
            std::collections::BTreeSet::from(["test-space-guid-123".to_string()])
        }
    }

    #[tokio::test]
    async fn processes_security_groups_and_c2c_policies() {
        let store = Arc::new(FakePolicyStore::new());
        let client = Arc::new(FakeClient {
            policies: vec![Policy {
                source: Source {
                    id: "app-guid-1".to_string(),
                },
                destination: Destination {
                    id: "app-guid-2".to_string(),
                    protocol: "tcp".to_string(),
                    ports: Ports { start: 8080, end: 8080 },
                },
            }],
            security_groups: vec![SecurityGroup {
                guid: "test-sg-guid-123".to_string(),
                name: "test-sg-name".to_string(),
                rules: vec![SecurityGroupRule {
                    protocol: "tcp".to_string(),
                    destination: "1.1.1.1/32".to_string(),
                    ports: "80".to_string(),
                    icmp_type: 0,
                }],
                staging_default: true,
                ..Default::default()
            }],
            security_group_calls: Mutex::new(0),
        });

        let config = Config {
            policy_server_url: "https://example.com".to_string(),
            namespace: "default".to_string(),
            poll_interval: std::time::Duration::from_millis(10),
            per_page_security_groups: 100,
            tls_cert_path: String::new(),
            tls_key_path: String::new(),
            tls_ca_path: String::new(),
        };

        let agent = Agent::new(store.clone(), client.clone(), &config);
        let cancellation = CancellationToken::new();
        let run_token = cancellation.clone();

        let handle = tokio::spawn(async move { agent.run(run_token).await });

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        cancellation.cancel();
        handle.await.unwrap();

        let names = store.names();
        assert!(names.contains("test-sg-guid-123"));
        assert!(names.contains("c2c-app-guid-1"));
        assert!(*client.security_group_calls.lock().unwrap() > 0);
    }
}
