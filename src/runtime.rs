//! The Kubernetes runtime boundary: a label-filtered, watcher-backed view
//! of owned `NetworkPolicy` objects and workload pods,
//! plus direct writes for create/update/delete. This is the crate's one
//! concrete adapter onto `kube` — the reconciler and agent only ever see
//! the [`PolicyStore`]/[`WorkloadSpaces`] traits, never a `kube::Client`.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::runtime::reflector::{self, Store};
use kube::runtime::watcher;
use kube::{Client, ResourceExt};
use tracing::warn;

use crate::crd::NetworkPolicy;
use crate::error::StoreError;
use crate::labels::{NETWORK_POLICY_APP_LABEL_KEY, NETWORK_POLICY_APP_LABEL_VALUE, SPACE_GUID_LABEL_KEY};

#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Every `NetworkPolicy` this agent owns, identified by the
    /// `app=policy-agent` label. Used to compute which previously-written
    /// objects are now obsolete.
    async fn list_owned_network_policies(&self) -> Result<Vec<NetworkPolicy>, StoreError>;

    async fn get_network_policy(&self, name: &str) -> Result<Option<NetworkPolicy>, StoreError>;

    async fn create_network_policy(&self, policy: &NetworkPolicy) -> Result<(), StoreError>;

    /// `policy.metadata.resource_version` must carry the version read by a
    /// prior [`PolicyStore::get_network_policy`] call, for optimistic
    /// concurrency.
    async fn update_network_policy(&self, policy: &NetworkPolicy) -> Result<(), StoreError>;

    async fn delete_network_policy(&self, name: &str) -> Result<(), StoreError>;
}

/// Enumerates the set of platform space guids currently running workloads
/// in the watched namespace, used to scope `ListSecurityGroupsForSpaces`.
#[async_trait]
pub trait WorkloadSpaces: Send + Sync {
    async fn space_guids(&self) -> BTreeSet<String>;
}

/// Production adapter: a `kube::Client` plus two background-refreshed
/// reflector caches (pods carrying a space guid, owned network policies),
/// with writes going straight through `kube::Api`.
pub struct KubeRuntime {
    network_policies: Api<NetworkPolicy>,
    pods_store: Store<Pod>,
    network_policies_store: Store<NetworkPolicy>,
}

impl KubeRuntime {
    /// Blocks until both reflector caches have completed their initial list,
    /// so the agent's immediate first reconcile pass never runs against a
    /// half-populated view (one cache synced, the other still empty) and
    /// mistakes live objects for obsolete ones.
    pub async fn new(client: Client, namespace: &str) -> Self {
        let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);
        let network_policies: Api<NetworkPolicy> = Api::namespaced(client, namespace);

        let pods_store = spawn_watch(pods, ListParams::default().labels(SPACE_GUID_LABEL_KEY));
        let network_policies_store = spawn_watch(
            network_policies.clone(),
            ListParams::default().labels(&format!(
                "{NETWORK_POLICY_APP_LABEL_KEY}={NETWORK_POLICY_APP_LABEL_VALUE}"
            )),
        );

        pods_store
            .wait_until_ready()
            .await
            .expect("pod cache writer was dropped before it became ready");
        network_policies_store
            .wait_until_ready()
            .await
            .expect("network policy cache writer was dropped before it became ready");

        Self {
            network_policies,
            pods_store,
            network_policies_store,
        }
    }
}

/// Spawns a background task that keeps `store` in sync with the apiserver
/// and returns its read-only handle. Watch errors are logged and retried by
/// the underlying stream; they never propagate to callers reading the
/// cache, which simply see stale data until the watch recovers.
fn spawn_watch<K>(api: Api<K>, list_params: ListParams) -> Store<K>
where
    K: kube::Resource + Clone + std::fmt::Debug + serde::de::DeserializeOwned + Send + Sync + 'static,
    K::DynamicType: Default + Eq + std::hash::Hash + Clone,
{
    let (store, writer) = reflector::store();
    tokio::spawn(async move {
        let mut writer = writer;
        let stream = watcher::watcher(api, list_params);
        futures::pin_mut!(stream);
        while let Some(event) = stream.next().await {
            match event {
                Ok(event) => writer.apply_watcher_event(&event),
                Err(err) => warn!(error = %err, "watch stream error, will retry"),
            }
        }
    });
    store
}

#[async_trait]
impl PolicyStore for KubeRuntime {
    async fn list_owned_network_policies(&self) -> Result<Vec<NetworkPolicy>, StoreError> {
        Ok(self
            .network_policies_store
            .state()
            .iter()
            .map(|policy| (**policy).clone())
            .collect())
    }

    async fn get_network_policy(&self, name: &str) -> Result<Option<NetworkPolicy>, StoreError> {
        match self.network_policies.get(name).await {
            Ok(policy) => Ok(Some(policy)),
            Err(kube::Error::Api(err)) if err.code == 404 => Ok(None),
            Err(source) => Err(StoreError::Get {
                name: name.to_string(),
                source,
            }),
        }
    }

    async fn create_network_policy(&self, policy: &NetworkPolicy) -> Result<(), StoreError> {
        self.network_policies
            .create(&PostParams::default(), policy)
            .await
            .map_err(|source| StoreError::Create {
                name: policy.name_any(),
                source,
            })?;
        Ok(())
    }

    async fn update_network_policy(&self, policy: &NetworkPolicy) -> Result<(), StoreError> {
        let name = policy.name_any();
        self.network_policies
            .replace(&name, &PostParams::default(), policy)
            .await
            .map_err(|source| StoreError::Update { name, source })?;
        Ok(())
    }

    async fn delete_network_policy(&self, name: &str) -> Result<(), StoreError> {
        self.network_policies
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|source| StoreError::Delete {
                name: name.to_string(),
                source,
            })?;
        Ok(())
    }
}

#[async_trait]
impl WorkloadSpaces for KubeRuntime {
    async fn space_guids(&self) -> BTreeSet<String> {
        self.pods_store
            .state()
            .iter()
            .filter_map(|pod| pod.labels().get(SPACE_GUID_LABEL_KEY).cloned())
            .collect()
    }
}

/// In-memory fake used by reconciler/agent unit tests, keyed by object
/// name. Behaves like a single-namespace store with no concurrency control
/// beyond the mutex, which is all a test needs.
#[derive(Default, Clone)]
pub struct FakePolicyStore {
    objects: Arc<std::sync::Mutex<std::collections::BTreeMap<String, NetworkPolicy>>>,
}

impl FakePolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, policy: NetworkPolicy) {
        self.objects.lock().unwrap().insert(policy.name_any(), policy);
    }

    pub fn names(&self) -> BTreeSet<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }
}

#[async_trait]
impl PolicyStore for FakePolicyStore {
    async fn list_owned_network_policies(&self) -> Result<Vec<NetworkPolicy>, StoreError> {
        Ok(self.objects.lock().unwrap().values().cloned().collect())
    }

    async fn get_network_policy(&self, name: &str) -> Result<Option<NetworkPolicy>, StoreError> {
        Ok(self.objects.lock().unwrap().get(name).cloned())
    }

    async fn create_network_policy(&self, policy: &NetworkPolicy) -> Result<(), StoreError> {
        self.objects
            .lock()
            .unwrap()
            .insert(policy.name_any(), policy.clone());
        Ok(())
    }

    async fn update_network_policy(&self, policy: &NetworkPolicy) -> Result<(), StoreError> {
        self.objects
            .lock()
            .unwrap()
            .insert(policy.name_any(), policy.clone());
        Ok(())
    }

    async fn delete_network_policy(&self, name: &str) -> Result<(), StoreError> {
        self.objects.lock().unwrap().remove(name);
        Ok(())
    }
}
