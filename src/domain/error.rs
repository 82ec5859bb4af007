//! Domain error types.

/// Top-level error type for chainrisk.
#[derive(Debug, thiserror::Error)]
pub enum ChainRiskError {
    #[error("unknown computation method: {method}")]
    UnknownMethod { method: String },

    #[error("unknown plan tag: {tag}")]
    UnknownTag { tag: String },

    #[error("unsupported as_of {as_of}: expected a timezone-aware timestamp or an end-of-day date")]
    UnsupportedAsOf { as_of: String },

    #[error("unsupported artifact {artifact}: no per-block pricing computation")]
    UnsupportedArtifact { artifact: String },

    #[error("rolling_interval undefined for VaR scenario generation")]
    UndefinedRollingInterval,

    #[error("invalid position {position}: {reason}")]
    InvalidPosition { position: String, reason: String },

    #[error("invalid span '{input}': {reason}")]
    InvalidSpan { input: String, reason: String },

    #[error("plan '{tag}' requires parameter '{name}'")]
    MissingPlanParameter { tag: String, name: String },

    #[error("no market data for target {key}")]
    MissingMarketData { key: String },

    #[error("missing value for column {column} at block {block_number}")]
    MissingField { column: String, block_number: u64 },

    #[error("unexpected computation result: {reason}")]
    UnexpectedResult { reason: String },

    #[error("computation failed: {reason}")]
    Computation { reason: String },

    #[error("cache store error: {reason}")]
    CacheStore { reason: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<&ChainRiskError> for std::process::ExitCode {
    fn from(err: &ChainRiskError) -> Self {
        let code: u8 = match err {
            ChainRiskError::Io(_) | ChainRiskError::CacheStore { .. } => 1,
            ChainRiskError::ConfigParse { .. }
            | ChainRiskError::ConfigMissing { .. }
            | ChainRiskError::ConfigInvalid { .. } => 2,
            ChainRiskError::Computation { .. }
            | ChainRiskError::UnexpectedResult { .. }
            | ChainRiskError::UnknownMethod { .. } => 3,
            ChainRiskError::UnknownTag { .. }
            | ChainRiskError::UnsupportedAsOf { .. }
            | ChainRiskError::UnsupportedArtifact { .. }
            | ChainRiskError::UndefinedRollingInterval
            | ChainRiskError::InvalidPosition { .. }
            | ChainRiskError::InvalidSpan { .. }
            | ChainRiskError::MissingPlanParameter { .. } => 4,
            ChainRiskError::MissingMarketData { .. } | ChainRiskError::MissingField { .. } => 5,
        };
        std::process::ExitCode::from(code)
    }
}
