use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type composing every subsystem's error kind.
///
/// Mirrors the source system's exception hierarchy with a tagged sum type
/// instead: each boundary raises its own variant, and callers match on the
/// kind they care about rather than catching a class hierarchy.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Invalid(#[from] InvalidInputError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Strategy(#[from] StrategyError),

    #[error(transparent)]
    Backtest(#[from] BacktestError),
}

/// User-visible fatal errors: bad configuration, missing columns.
#[derive(Debug, Error)]
pub enum InvalidInputError {
    #[error("missing required column(s): {0:?}")]
    MissingColumns(Vec<&'static str>),

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Store-layer faults, possibly retryable. Batch writes retry unprocessed
/// keys internally; this variant represents final failure after retries.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("throttled by store after retries: {0}")]
    Throttling(String),

    #[error("validation rejected by store: {0}")]
    Validation(String),

    #[error("transient store failure: {0}")]
    Transient(String),
}

/// A single upstream source is unavailable. Soft failure — the orchestrator
/// advances to the next source in the chain rather than failing the symbol.
#[derive(Debug, Error)]
#[error("provider '{provider_source}' failed for symbol '{symbol}' (attempt {attempt}): {message}")]
pub struct ProviderError {
    pub provider_source: String,
    pub symbol: String,
    pub attempt: u32,
    pub message: String,
}

/// Fatal for the run: the strategy cannot operate given the supplied context.
#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("strategy error: {0}")]
    Other(String),
}

/// Fatal for the run: configuration, schedule, or data precondition violated.
#[derive(Debug, Error)]
pub enum BacktestError {
    #[error("{0}")]
    Invalid(String),

    #[error("no price data found within the requested window")]
    EmptyPriceHistory,

    #[error("requested price fields are not present in price history")]
    MissingPriceFields,

    #[error("price history must be indexed by (date, symbol)")]
    BadPriceHistoryShape,

    #[error("universe is empty; provide symbols or a universe provider")]
    EmptyUniverse,

    #[error("unsupported rebalance frequency: {0}")]
    UnsupportedFrequency(String),
}
