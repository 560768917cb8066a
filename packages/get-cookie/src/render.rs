//! Rendering of result sets into `Cookie` header strings and the Netscape
//! cookies.txt format recognized by curl and wget.

use std::io::{self, Write};
use std::path::PathBuf;

use itertools::Itertools;

use crate::cookie::{Expiry, ExportedCookie};

fn expiry_rank(expiry: &Expiry) -> i64 {
    match expiry {
        Expiry::Infinity => i64::MAX,
        Expiry::Date(ms) => *ms,
        Expiry::Session => i64::MIN,
    }
}

/// One `name=value; …` line. Cookies sharing a name are collapsed to the
/// one expiring last; name order follows first appearance.
pub fn render_merged(cookies: &[ExportedCookie]) -> String {
    let mut order: Vec<&str> = Vec::new();
    let mut best: std::collections::HashMap<&str, &ExportedCookie> = std::collections::HashMap::new();

    for cookie in cookies {
        match best.get(cookie.name.as_str()) {
            None => {
                order.push(&cookie.name);
                best.insert(&cookie.name, cookie);
            }
            Some(current) if expiry_rank(&cookie.expiry) > expiry_rank(&current.expiry) => {
                best.insert(&cookie.name, cookie);
            }
            Some(_) => {}
        }
    }

    order
        .iter()
        .filter_map(|name| best.get(name))
        .map(|c| format!("{}={}", c.name, c.value))
        .join("; ")
}

/// One merged line per source file, in first-appearance order of the files.
pub fn render_grouped(cookies: &[ExportedCookie]) -> Vec<(PathBuf, String)> {
    let mut order: Vec<PathBuf> = Vec::new();
    for cookie in cookies {
        if !order.contains(&cookie.meta.file) {
            order.push(cookie.meta.file.clone());
        }
    }

    order
        .into_iter()
        .map(|file| {
            let group: Vec<ExportedCookie> = cookies
                .iter()
                .filter(|c| c.meta.file == file)
                .cloned()
                .collect();
            let line = render_merged(&group);
            (file, line)
        })
        .collect()
}

/// Output cookies in Netscape (cookies.txt) format.
pub fn netscape<W: Write>(cookies: &[ExportedCookie], writer: &mut W) -> io::Result<()> {
    const NETSCAPE_HEADER: &str = "# Netscape HTTP Cookie File\n";

    fn bool_to_uppercase(b: bool) -> &'static str {
        if b {
            "TRUE"
        } else {
            "FALSE"
        }
    }

    writer.write_all(NETSCAPE_HEADER.as_bytes())?;

    let body = cookies
        .iter()
        .map(|cookie| {
            format!(
                "{domain}\t{flag}\t{path}\t{secure}\t{expiration}\t{name}\t{value}",
                domain = cookie.domain,
                flag = bool_to_uppercase(cookie.domain.starts_with('.')),
                path = cookie.meta.path.as_deref().unwrap_or("/"),
                secure = bool_to_uppercase(cookie.meta.secure.unwrap_or(false)),
                expiration = cookie.expiry.unix_ms().map(|ms| ms / 1_000).unwrap_or(0),
                name = cookie.name,
                value = cookie.value,
            )
        })
        .join("\n");

    writer.write_all(body.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cookie::CookieMeta;

    fn cookie(name: &str, value: &str, expiry: Expiry, file: &str) -> ExportedCookie {
        ExportedCookie {
            name: name.into(),
            domain: ".example.com".into(),
            value: value.into(),
            expiry,
            meta: CookieMeta {
                file: PathBuf::from(file),
                ..Default::default()
            },
        }
    }

    #[test]
    fn merged_line_joins_name_value_pairs() {
        let cookies = vec![
            cookie("sid", "abc", Expiry::Session, "a"),
            cookie("tok", "xyz", Expiry::Session, "a"),
        ];
        assert_eq!(render_merged(&cookies), "sid=abc; tok=xyz");
    }

    #[test]
    fn duplicate_names_collapse_to_the_latest_expiry() {
        let cookies = vec![
            cookie("sid", "older", Expiry::Date(1_000), "a"),
            cookie("sid", "newer", Expiry::Date(2_000), "b"),
            cookie("sid", "session", Expiry::Session, "c"),
        ];
        assert_eq!(render_merged(&cookies), "sid=newer");
    }

    #[test]
    fn grouped_rendering_is_per_file() {
        let cookies = vec![
            cookie("a", "1", Expiry::Session, "/profiles/one/Cookies"),
            cookie("b", "2", Expiry::Session, "/profiles/two/Cookies"),
            cookie("c", "3", Expiry::Session, "/profiles/one/Cookies"),
        ];
        let groups = render_grouped(&cookies);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, PathBuf::from("/profiles/one/Cookies"));
        assert_eq!(groups[0].1, "a=1; c=3");
        assert_eq!(groups[1].1, "b=2");
    }

    #[test]
    fn netscape_format_has_seven_fields() {
        let mut c = cookie("sid", "abc", Expiry::Date(978_307_200_000), "a");
        c.meta.secure = Some(true);
        c.meta.path = Some("/app".into());

        let mut out = Vec::new();
        netscape(&[c], &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("# Netscape HTTP Cookie File"));
        assert_eq!(
            lines.next(),
            Some(".example.com\tTRUE\t/app\tTRUE\t978307200\tsid\tabc")
        );
    }
}
