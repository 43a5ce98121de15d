use thiserror::Error;

/// Errors raised while encoding or decoding IPFIX messages.
#[derive(Error, Debug)]
pub enum IpfixError {
    /// Bad version, impossible length, or sets that don't tile the message body
    #[error("malformed message header: {0}")]
    MalformedHeader(String),

    /// Template record that can't be interpreted; fatal to the containing set
    #[error("malformed template: {0}")]
    MalformedTemplate(String),

    /// Data set for a template that isn't active in the domain
    #[error("unknown template {template_id} in domain {domain_id}")]
    UnknownTemplate { domain_id: u32, template_id: u16 },

    /// Not enough bytes left for a declared field
    #[error("truncated record: need {need} bytes, have {have}")]
    TruncatedRecord { need: usize, have: usize },

    /// Value can't be written at the requested length or type
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Bytes were present but carry an illegal value
    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("unknown data type: {0}")]
    UnknownType(String),

    #[error("invalid information element spec: {0}")]
    InvalidSpec(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl IpfixError {
    /// Whether a byte stream can't continue after this error.
    ///
    /// A stream has no message boundaries other than the header length field,
    /// so a bad header means we've lost framing.
    pub fn is_fatal_to_stream(&self) -> bool {
        matches!(self, IpfixError::MalformedHeader(_) | IpfixError::Io(_))
    }

    pub(crate) fn truncated(need: usize, have: usize) -> Self {
        IpfixError::TruncatedRecord { need, have }
    }
}

pub type Result<T> = std::result::Result<T, IpfixError>;
