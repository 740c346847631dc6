//! Parser trait and winnow helpers for typed netlink responses.

use winnow::binary::le_u16;
use winnow::error::{ContextError, ErrMode};
use winnow::prelude::*;
use winnow::token::take;

use crate::error::{Error, Result};

/// Result type for winnow parsers.
pub type PResult<T> = core::result::Result<T, ErrMode<ContextError>>;

/// Types that can be parsed from the payload of a netlink message.
pub trait FromNetlink: Sized {
    /// Parse from a mutable byte slice reference, advancing past consumed bytes.
    fn parse(input: &mut &[u8]) -> PResult<Self>;

    /// Parse from a complete payload.
    fn from_bytes(data: &[u8]) -> Result<Self> {
        Self::parse
            .parse(data)
            .map_err(|e| Error::Parse(format!("{}", e)))
    }

    /// Write the fixed header a dump request for this type needs.
    fn write_dump_header(buf: &mut Vec<u8>);
}

/// Fail the current parse without backtracking.
pub fn cut<T>() -> PResult<T> {
    Err(ErrMode::Cut(ContextError::new()))
}

/// Take a fixed-size header of `size` bytes.
pub fn header<'a>(input: &mut &'a [u8], size: usize) -> PResult<&'a [u8]> {
    if input.len() < size {
        return cut();
    }
    take(size).parse_next(input)
}

/// Parse the next attribute, returning its flag-stripped type and payload.
///
/// Returns `None` once fewer than a header's worth of bytes remain or the
/// next header is malformed; trailing garbage is ignored the way the kernel
/// tools ignore it.
pub fn next_attr<'a>(input: &mut &'a [u8]) -> PResult<Option<(u16, &'a [u8])>> {
    if input.len() < 4 {
        return Ok(None);
    }

    let len = le_u16.parse_next(input)? as usize;
    let attr_type = le_u16.parse_next(input)?;

    let payload_len = len.saturating_sub(4);
    if len < 4 || input.len() < payload_len {
        *input = &[];
        return Ok(None);
    }

    let data: &[u8] = take(payload_len).parse_next(input)?;

    let padding = ((len + 3) & !3) - len;
    let padding = padding.min(input.len());
    let _: &[u8] = take(padding).parse_next(input)?;

    Ok(Some((attr_type & 0x3FFF, data)))
}

/// Decode a possibly NUL-terminated string attribute.
pub fn parse_string_from_bytes(data: &[u8]) -> String {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    String::from_utf8_lossy(&data[..end]).into_owned()
}

/// Decode a native-endian u32 attribute.
pub fn parse_u32_ne(data: &[u8]) -> Option<u32> {
    data.get(..4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_ne_bytes)
}
