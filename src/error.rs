use thiserror::Error;

/// Errors raised while talking to the upstream policy service.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("building mTLS client: {0}")]
    Tls(#[source] reqwest::Error),

    #[error("request to policy service failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("decoding policy service response: {0}")]
    Decode(#[source] reqwest::Error),

    #[error("reading TLS material from {path}: {source}")]
    ReadTlsMaterial {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised translating one ASG into zero-or-more dataplane specs.
#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("no specs created for ASG {guid:?}")]
    NoSpecs { guid: String },
}

/// Errors raised by the `PolicyStore` boundary (cluster reads/writes).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("listing owned network policies: {0}")]
    List(#[source] kube::Error),

    #[error("fetching network policy {name:?}: {source}")]
    Get {
        name: String,
        #[source]
        source: kube::Error,
    },

    #[error("creating network policy {name:?}: {source}")]
    Create {
        name: String,
        #[source]
        source: kube::Error,
    },

    #[error("updating network policy {name:?}: {source}")]
    Update {
        name: String,
        #[source]
        source: kube::Error,
    },

    #[error("deleting network policy {name:?}: {source}")]
    Delete {
        name: String,
        #[source]
        source: kube::Error,
    },
}

/// Errors that can abort a single reconcile pass.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Translate(#[from] TranslateError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
