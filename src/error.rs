use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("unexpected HTTP status {0}")]
    Status(reqwest::StatusCode),
    #[error("feed parsing error: {0}")]
    Parse(#[from] feed_rs::parser::ParseFeedError),
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("an ingestion run is already in progress")]
    RunInProgress,
    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),
}
