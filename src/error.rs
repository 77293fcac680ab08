use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("invalid interval '{interval}': {reason}")]
    InvalidInterval { interval: String, reason: String },

    #[error("could not parse date '{0}'")]
    DateParse(String),

    #[error("growth rate undefined: window low price is zero")]
    ZeroLowPrice,

    #[error("symbol list has no usable symbols")]
    EmptySymbolList,

    #[error("binance API error (code {code}): {msg}")]
    BinanceApi { code: i64, msg: String },

    #[error("rate limited by exchange (HTTP {status})")]
    RateLimited { status: u16 },

    #[error("HTTP status {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ScanError {
    /// Configuration errors abort the scan loop; everything else skips a symbol.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InvalidInterval { .. } | Self::EmptySymbolList)
    }

    /// Whether the request that produced this error is worth repeating.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::HttpStatus { status, .. } => *status >= 500,
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }
}
