use std::net::Ipv4Addr;
use std::str::FromStr;

use get_cookie::CookieSpec;
use http::Uri;

/// The registrable base of a hostname: the last two labels. IP addresses
/// and bracketed IPv6 hosts have no base domain.
pub(crate) fn base_domain(uri: &Uri) -> Option<String> {
    uri.host().filter(|host| is_domain(host)).and_then(|host| {
        let mut parts = host.rsplitn(3, '.');
        let ext = parts.next()?;
        let base = parts.next()?;
        Some([base, ext].join("."))
    })
}

fn is_domain(host: &str) -> bool {
    !host.starts_with('[') && Ipv4Addr::from_str(host).is_err()
}

/// The specs a URL stands for: the exact hostname, any subdomain of the
/// base domain, and the base domain itself.
pub(crate) fn specs_from_uri(uri: &Uri, name: &str) -> Vec<CookieSpec> {
    let mut specs = Vec::new();
    if let Some(host) = uri.host() {
        specs.push(CookieSpec::new(name, host));
    }
    if let Some(base) = base_domain(uri) {
        specs.push(CookieSpec::new(name, format!("%.{base}")));
        if uri.host() != Some(base.as_str()) {
            specs.push(CookieSpec::new(name, base));
        }
    }
    specs
}
