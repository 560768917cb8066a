//! Output functions for the plain listing modes. The rendered formats
//! (merged lines, Netscape) live in the library's render module.

use std::io::{self, Write};

use get_cookie::ExportedCookie;
use serde_json::{Map, Value};

fn json_error(err: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}

/// One cookie value per line, the default output.
pub(crate) fn values<W: Write>(cookies: &[ExportedCookie], writer: &mut W) -> io::Result<()> {
    for cookie in cookies {
        writeln!(writer, "{}", cookie.value)?;
    }
    Ok(())
}

/// The result list as compact JSON.
pub(crate) fn json<W: Write>(cookies: &[ExportedCookie], writer: &mut W) -> io::Result<()> {
    serde_json::to_writer(&mut *writer, cookies).map_err(json_error)?;
    writeln!(writer)
}

/// The full result structure, pretty-printed.
pub(crate) fn dump<W: Write>(cookies: &[ExportedCookie], writer: &mut W) -> io::Result<()> {
    serde_json::to_writer_pretty(&mut *writer, cookies).map_err(json_error)?;
    writeln!(writer)
}

/// The results grouped by source file, pretty-printed.
pub(crate) fn dump_grouped<W: Write>(cookies: &[ExportedCookie], writer: &mut W) -> io::Result<()> {
    let mut groups: Map<String, Value> = Map::new();
    for cookie in cookies {
        let key = cookie.meta.file.display().to_string();
        let entry = groups.entry(key).or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(list) = entry {
            list.push(serde_json::to_value(cookie).map_err(json_error)?);
        }
    }

    serde_json::to_writer_pretty(&mut *writer, &groups).map_err(json_error)?;
    writeln!(writer)
}
