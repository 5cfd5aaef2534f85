//! Segment compression. `zstd` and `lz4` are cargo features; asking for a
//! codec that was not compiled in fails when the first segment is written.
//!
//! Replay buffers are never compressed, only sorted-run segments.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Stored as one byte in every segment header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Codec {
    None = 0,
    Zstd = 1,
    Lz4 = 2,
}

#[cfg(feature = "zstd")]
const ZSTD_LEVEL: i32 = 3;

impl Codec {
    pub fn from_u8(tag: u8) -> Result<Self> {
        [Codec::None, Codec::Zstd, Codec::Lz4]
            .into_iter()
            .find(|c| *c as u8 == tag)
            .ok_or_else(|| Error::UnknownCodec(format!("#{tag}")))
    }

    /// Parse the engine config spelling (`none`, `zstd`, `lz4`).
    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(Codec::None),
            "zstd" => Ok(Codec::Zstd),
            "lz4" => Ok(Codec::Lz4),
            other => Err(Error::UnknownCodec(other.to_string())),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Codec::None => "none",
            Codec::Zstd => "zstd",
            Codec::Lz4 => "lz4",
        }
    }

    pub fn compress(self, input: &[u8]) -> Result<Vec<u8>> {
        match self {
            Codec::None => Ok(input.to_vec()),
            #[cfg(feature = "zstd")]
            Codec::Zstd => zstd::bulk::compress(input, ZSTD_LEVEL).map_err(|e| self.failed(e)),
            #[cfg(feature = "lz4")]
            Codec::Lz4 => Ok(lz4_flex::compress_prepend_size(input)),
            #[allow(unreachable_patterns)]
            disabled => Err(Error::CodecDisabled(disabled.name())),
        }
    }

    pub fn decompress(self, input: &[u8], expected_len: usize) -> Result<Vec<u8>> {
        let out = match self {
            Codec::None => input.to_vec(),
            #[cfg(feature = "zstd")]
            Codec::Zstd => zstd::bulk::decompress(input, expected_len).map_err(|e| self.failed(e))?,
            #[cfg(feature = "lz4")]
            Codec::Lz4 => lz4_flex::decompress_size_prepended(input).map_err(|e| self.failed(e))?,
            #[allow(unreachable_patterns)]
            disabled => return Err(Error::CodecDisabled(disabled.name())),
        };
        if out.len() != expected_len {
            return Err(Error::Codec {
                codec: self.name(),
                msg: format!("decoded {} bytes, header says {expected_len}", out.len()),
            });
        }
        Ok(out)
    }

    #[cfg(any(feature = "zstd", feature = "lz4"))]
    fn failed(self, e: impl std::fmt::Display) -> Error {
        Error::Codec {
            codec: self.name(),
            msg: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(feature = "lz4"))]
    #[test]
    fn disabled_codec_names_the_feature() {
        let err = Codec::Lz4.compress(b"x").unwrap_err();
        assert!(err.to_string().contains("'lz4' feature"), "{err}");
    }

    #[test]
    fn none_codec_checks_length() {
        let data = b"spilled records".to_vec();
        let packed = Codec::None.compress(&data).unwrap();
        assert_eq!(Codec::None.decompress(&packed, data.len()).unwrap(), data);
        assert!(Codec::None.decompress(&packed, data.len() + 1).is_err());
    }

    #[cfg(feature = "zstd")]
    #[test]
    fn zstd_shrinks_repetitive_chunks() {
        let data = br#"[[1,"aaaa"],[1,"aaaa"],[1,"aaaa"]]"#.repeat(50);
        let packed = Codec::Zstd.compress(&data).unwrap();
        assert!(packed.len() < data.len());
        assert_eq!(Codec::Zstd.decompress(&packed, data.len()).unwrap(), data);
    }

    #[test]
    fn parse_config_names() {
        assert_eq!(Codec::parse("NONE").unwrap(), Codec::None);
        assert_eq!(Codec::parse("lz4").unwrap(), Codec::Lz4);
        assert_eq!(Codec::from_u8(1).unwrap(), Codec::Zstd);
        assert!(matches!(Codec::parse("snappy"), Err(Error::UnknownCodec(n)) if n == "snappy"));
        assert!(Codec::from_u8(9).is_err());
    }
}
