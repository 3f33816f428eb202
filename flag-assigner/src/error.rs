use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Any coordination-store failure: transport, serialization, bad state.
    #[error("coordination store unavailable: {0}")]
    StoreUnavailable(#[from] assignment_coordination::error::Error),

    #[error("key not found: {0}")]
    NotFound(String),

    #[error("partition {partition_id} is already assigned")]
    AlreadyAssigned { partition_id: String },

    #[error("failed to list flag assignments: {0}")]
    ListingFailed(#[source] Box<Error>),

    #[error("failed to parse root from path template {template:?} of partition {partition_id}")]
    MalformedTemplate {
        partition_id: String,
        template: String,
    },

    #[error("partition id {partition_id} is reused for a second root {root}")]
    DuplicatePartition { partition_id: String, root: String },

    #[error("worker {worker_id} must have a positive weight")]
    InvalidWeight { worker_id: String },
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::StoreUnavailable(e.into())
    }
}

impl From<etcd_client::Error> for Error {
    fn from(e: etcd_client::Error) -> Self {
        Self::StoreUnavailable(e.into())
    }
}

impl Error {
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::StoreUnavailable(assignment_coordination::error::Error::InvalidState(
            msg.into(),
        ))
    }

    pub fn listing_failed(source: Error) -> Self {
        Self::ListingFailed(Box::new(source))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
