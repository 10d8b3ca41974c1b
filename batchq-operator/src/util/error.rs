#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Kubernetes reported error: {source}")]
    Kube {
        #[from]
        source: kube::Error,
    },

    #[error("invalid user input: {0}")]
    UserInput(String),

    #[error("invalid resource quantity: {0}")]
    Quantity(String),

    #[error("Json error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    #[error("ClusterQueue spec is invalid: {0}")]
    SchemaViolation(String),

    #[error("optimistic concurrency conflict, will retry")]
    Conflict,
}
