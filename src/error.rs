use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Fetch failed with status {status} - {excerpt}")]
    Fetch { status: u16, excerpt: String },

    #[error("Fetch failed before a response arrived: {0}")]
    FetchTransport(#[source] reqwest::Error),

    #[error("The page body is empty, nothing to extract.")]
    EmptyInput,

    #[error("{0} new offers found but no notification destinations are configured")]
    EmptyDestination(usize),

    #[error("Analytics write failed: {0}")]
    AnalyticsWrite(String),

    #[error("Ledger store error: {0}")]
    Store(String),

    #[error("Invalid invocation input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("The selector you are trying to scrape for is invalid. Selector: {0}")]
    InvalidSelector(String),

    #[error("Io Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Tokio Join Error, couldn't await a task! {0}")]
    RuntimeJoin(#[from] tokio::task::JoinError),

    #[error("Url Error: {0}")]
    Url(#[from] url::ParseError),

    #[error("Json Error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Email Error: {0}")]
    Email(#[from] lettre::error::Error),

    #[error("Email Address Error: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("Smtp Error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}
