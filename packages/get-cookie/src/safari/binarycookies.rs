//! Decoder for Safari's `Cookies.binarycookies` store.
//!
//! Layout (big-endian file header, little-endian thereafter):
//!
//! ```text
//! "cook"            magic, 4 bytes
//! page count N      u32 BE
//! N × page size     u32 BE
//! N × page:
//!   00 00 01 00     page header
//!   cookie count c  u32 LE
//!   c × offset      u32 LE, relative to the page start
//!   00 00 00 00     trailer
//!   c × record:
//!     total length  u32 LE at 0
//!     flags         u32 LE at 8   (bit 0 = secure, bit 2 = httpOnly)
//!     url offset    u32 LE at 16
//!     name offset   u32 LE at 20
//!     path offset   u32 LE at 24
//!     value offset  u32 LE at 28
//!     expiry        f64 LE at 40, seconds since 2001-01-01
//! ```
//!
//! String fields are NUL-terminated UTF-8 slices running up to the next
//! known field or the end of the record.

use std::path::Path;

use thiserror::Error;

use crate::cookie::{CookieMeta, CookieRow};

const MAGIC: &[u8; 4] = b"cook";
const PAGE_HEADER: &[u8; 4] = &[0x00, 0x00, 0x01, 0x00];

/// Seconds between 2001-01-01 (Safari's epoch) and 1970-01-01.
pub const MAC_EPOCH_OFFSET_SECONDS: i64 = 978_307_200;

const FLAG_SECURE: u32 = 1;
const FLAG_HTTP_ONLY: u32 = 1 << 2;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BinaryCookiesError {
    #[error("bad magic, not a binarycookies file")]
    BadMagic,

    #[error("bad page header at page {0}")]
    BadPageHeader(usize),

    #[error("bad page trailer at page {0}")]
    BadPageTrailer(usize),

    #[error("file truncated while reading {0}")]
    Truncated(&'static str),
}

/// Decode a cookies file into raw rows. A missing file yields an empty
/// list; a present but malformed file is an error.
pub(crate) fn decode_binary_cookies(path: &Path) -> Result<Vec<CookieRow>, BinaryCookiesError> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(_) => return Err(BinaryCookiesError::Truncated("file")),
    };

    let mut rows = decode_buffer(&data)?;
    for row in &mut rows {
        row.meta.file = path.to_path_buf();
    }
    Ok(rows)
}

pub(crate) fn decode_buffer(data: &[u8]) -> Result<Vec<CookieRow>, BinaryCookiesError> {
    if data.get(..4) != Some(MAGIC.as_slice()) {
        return Err(BinaryCookiesError::BadMagic);
    }

    let page_count = read_u32_be(data, 4).ok_or(BinaryCookiesError::Truncated("page count"))? as usize;

    let mut page_sizes = Vec::with_capacity(page_count);
    let mut cursor = 8;
    for _ in 0..page_count {
        let size = read_u32_be(data, cursor).ok_or(BinaryCookiesError::Truncated("page size"))?;
        page_sizes.push(size as usize);
        cursor += 4;
    }

    let mut rows = Vec::new();
    for (index, page_size) in page_sizes.into_iter().enumerate() {
        let page = data
            .get(cursor..cursor + page_size)
            .ok_or(BinaryCookiesError::Truncated("page"))?;
        decode_page(page, index, &mut rows)?;
        cursor += page_size;
    }

    Ok(rows)
}

fn decode_page(page: &[u8], index: usize, rows: &mut Vec<CookieRow>) -> Result<(), BinaryCookiesError> {
    if page.get(..4) != Some(PAGE_HEADER.as_slice()) {
        return Err(BinaryCookiesError::BadPageHeader(index));
    }

    let cookie_count = read_u32_le(page, 4).ok_or(BinaryCookiesError::Truncated("cookie count"))? as usize;

    let mut offsets = Vec::with_capacity(cookie_count);
    let mut cursor = 8;
    for _ in 0..cookie_count {
        let offset = read_u32_le(page, cursor).ok_or(BinaryCookiesError::Truncated("cookie offset"))?;
        offsets.push(offset as usize);
        cursor += 4;
    }

    let trailer = read_u32_le(page, cursor).ok_or(BinaryCookiesError::Truncated("page trailer"))?;
    if trailer != 0 {
        return Err(BinaryCookiesError::BadPageTrailer(index));
    }

    for offset in offsets {
        rows.push(decode_record(page, offset)?);
    }

    Ok(())
}

fn decode_record(page: &[u8], offset: usize) -> Result<CookieRow, BinaryCookiesError> {
    let record_len =
        read_u32_le(page, offset).ok_or(BinaryCookiesError::Truncated("record length"))? as usize;
    let record = page
        .get(offset..offset + record_len)
        .ok_or(BinaryCookiesError::Truncated("record"))?;
    if record.len() < 48 {
        return Err(BinaryCookiesError::Truncated("record header"));
    }

    let flags = read_u32_le(record, 8).ok_or(BinaryCookiesError::Truncated("flags"))?;
    let url_offset = read_u32_le(record, 16).ok_or(BinaryCookiesError::Truncated("url offset"))? as usize;
    let name_offset = read_u32_le(record, 20).ok_or(BinaryCookiesError::Truncated("name offset"))? as usize;
    let path_offset = read_u32_le(record, 24).ok_or(BinaryCookiesError::Truncated("path offset"))? as usize;
    let value_offset = read_u32_le(record, 28).ok_or(BinaryCookiesError::Truncated("value offset"))? as usize;

    let expiry_2001 = read_f64_le(record, 40).ok_or(BinaryCookiesError::Truncated("expiry"))?;
    let expiry_ms = (expiry_2001 as i64 + MAC_EPOCH_OFFSET_SECONDS) * 1_000;

    let field_offsets = [url_offset, name_offset, path_offset, value_offset, record.len()];
    let read_field = |start: usize| read_string(record, start, &field_offsets);

    let domain = read_field(url_offset)?;
    let name = read_field(name_offset)?;
    let path = read_field(path_offset)?;
    let value = read_field(value_offset)?;

    Ok(CookieRow {
        name,
        domain,
        value: value.into_bytes(),
        expiry_ms: Some(expiry_ms),
        meta: CookieMeta {
            file: Default::default(),
            browser: Some("Safari".to_string()),
            path: Some(path),
            secure: Some(flags & FLAG_SECURE != 0),
            http_only: Some(flags & FLAG_HTTP_ONLY != 0),
            decrypted: None,
        },
    })
}

/// A field runs from its offset to the next known field (or the record
/// end), NUL-terminated; embedded NULs are stripped.
fn read_string(
    record: &[u8],
    start: usize,
    field_offsets: &[usize; 5],
) -> Result<String, BinaryCookiesError> {
    if start >= record.len() {
        return Err(BinaryCookiesError::Truncated("string field"));
    }

    let end = field_offsets
        .iter()
        .copied()
        .filter(|&o| o > start && o <= record.len())
        .min()
        .unwrap_or(record.len());

    let bytes: Vec<u8> = record[start..end].iter().copied().filter(|&b| b != 0).collect();
    String::from_utf8(bytes).map_err(|_| BinaryCookiesError::Truncated("utf-8 field"))
}

fn read_u32_be(data: &[u8], offset: usize) -> Option<u32> {
    data.get(offset..offset + 4)
        .map(|b| u32::from_be_bytes(b.try_into().expect("4-byte slice")))
}

fn read_u32_le(data: &[u8], offset: usize) -> Option<u32> {
    data.get(offset..offset + 4)
        .map(|b| u32::from_le_bytes(b.try_into().expect("4-byte slice")))
}

fn read_f64_le(data: &[u8], offset: usize) -> Option<f64> {
    data.get(offset..offset + 8)
        .map(|b| f64::from_le_bytes(b.try_into().expect("8-byte slice")))
}
