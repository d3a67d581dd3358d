//! Message charsets and the transcoding collaborator boundary.
//!
//! GB/T 28181 deployments declare their body encoding in the XML prolog;
//! GB2312 and GBK bodies must be converted to UTF-8 before parsing and back
//! after serialization. The conversion itself is not this crate's concern:
//! callers install a [`Transcoder`] and the codecs treat it as a black box.

use crate::error::{CodecError, CodecResult};

/// Charset a MANSCDP message declares in its XML prolog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
pub enum Charset {
    /// UTF-8, the internal representation
    #[default]
    Utf8,
    /// GB2312 (the 2016 edition default)
    Gb2312,
    /// GBK
    Gbk,
}

impl Charset {
    /// Label used in the `encoding="..."` prolog attribute.
    pub fn label(&self) -> &'static str {
        match self {
            Charset::Utf8 => "UTF-8",
            Charset::Gb2312 => "GB2312",
            Charset::Gbk => "GBK",
        }
    }

    /// Parse a prolog label, case-insensitively. Unknown labels map to None.
    pub fn from_label(label: &str) -> Option<Charset> {
        match label.trim().to_ascii_uppercase().as_str() {
            "UTF-8" | "UTF8" => Some(Charset::Utf8),
            "GB2312" => Some(Charset::Gb2312),
            "GBK" => Some(Charset::Gbk),
            _ => None,
        }
    }
}

impl std::fmt::Display for Charset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Charset conversion collaborator.
///
/// Implementations convert a byte buffer between two charsets. The codecs call
/// this on the receive path (declared charset -> UTF-8) and the send path
/// (UTF-8 -> message charset). A conversion where `from == to` must be the
/// identity.
pub trait Transcoder: Send + Sync {
    fn convert(&self, input: &[u8], from: Charset, to: Charset) -> CodecResult<Vec<u8>>;
}

/// Transcoder for UTF-8-only deployments.
///
/// Passes UTF-8 through unchanged and rejects any real conversion. Useful as
/// a default and in tests; production peers that speak GB2312/GBK need a real
/// converter installed.
#[derive(Debug, Default, Clone, Copy)]
pub struct Utf8Transcoder;

impl Transcoder for Utf8Transcoder {
    fn convert(&self, input: &[u8], from: Charset, to: Charset) -> CodecResult<Vec<u8>> {
        if from == to {
            return Ok(input.to_vec());
        }
        Err(CodecError::Charset {
            from: from.label(),
            to: to.label(),
            message: "Utf8Transcoder cannot convert between charsets".into(),
        })
    }
}
