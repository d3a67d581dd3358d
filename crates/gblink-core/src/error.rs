//! Error types for the wire-format codecs.

use thiserror::Error;

/// Result type used throughout gblink-core.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors surfaced by the MANSCDP, SDP and MANSRTSP codecs.
#[derive(Debug, Clone, Error)]
pub enum CodecError {
    /// The XML body could not be parsed at all.
    #[error("malformed XML: {message}")]
    MalformedXml {
        /// Parser diagnostic
        message: String,
    },

    /// The document root does not name a known MANSCDP root.
    #[error("unknown root element: {tag}")]
    UnknownRoot {
        /// The offending tag
        tag: String,
    },

    /// A field the command schema requires was absent or unparsable.
    #[error("missing or invalid field {field} in {command}")]
    MissingField {
        /// Element name
        field: String,
        /// Command the field belongs to
        command: String,
    },

    /// Serialization was requested before root/command were set.
    #[error("message is not addressed: root and command must be set before serialization")]
    NotAddressed,

    /// Charset conversion failed or is unsupported by the installed transcoder.
    #[error("charset conversion {from} -> {to} failed: {message}")]
    Charset {
        /// Source charset label
        from: &'static str,
        /// Target charset label
        to: &'static str,
        /// Transcoder diagnostic
        message: String,
    },

    /// An SDP body violated the line grammar.
    #[error("invalid SDP: {message}")]
    Sdp {
        /// Parser diagnostic
        message: String,
    },

    /// A MANSRTSP control body violated the line grammar.
    #[error("invalid MANSRTSP: {message}")]
    Rtsp {
        /// Parser diagnostic
        message: String,
    },
}

impl CodecError {
    pub fn malformed_xml(message: impl Into<String>) -> Self {
        Self::MalformedXml { message: message.into() }
    }

    pub fn missing_field(field: impl Into<String>, command: impl Into<String>) -> Self {
        Self::MissingField { field: field.into(), command: command.into() }
    }

    pub fn sdp(message: impl Into<String>) -> Self {
        Self::Sdp { message: message.into() }
    }

    pub fn rtsp(message: impl Into<String>) -> Self {
        Self::Rtsp { message: message.into() }
    }
}
