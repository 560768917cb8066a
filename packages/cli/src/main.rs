#![deny(unsafe_code)]

use std::process::ExitCode;
use std::str::FromStr;

use bpaf::Bpaf;
use color_eyre::Result;
use get_cookie::Browser;
use tracing_subscriber::EnvFilter;

use app::App;

mod app;
mod url;

#[derive(Debug, Clone, Copy)]
enum OutputFormat {
    Json,
    Netscape,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(OutputFormat::Json),
            "netscape" => Ok(OutputFormat::Netscape),
            _ => Err(format!(
                "'{s}' is not one of the supported output formats (json, netscape)"
            )),
        }
    }
}

#[derive(Debug, Clone, Bpaf)]
#[bpaf(options, version)]
/// Query cookies from the browsers installed on this machine.
struct Args {
    /// Raise the log level to debug
    #[bpaf(short('v'), long)]
    verbose: bool,

    /// Emit the full result structure as JSON
    #[bpaf(short('d'), long)]
    dump: bool,

    /// Emit results grouped by source file as JSON
    #[bpaf(short('D'), long)]
    dump_grouped: bool,

    /// Emit one "name=value; …" line (last-expiry-wins per name)
    #[bpaf(short('r'), long("render"), long("render-merged"))]
    render: bool,

    /// Render one line per source file
    #[bpaf(short('R'), long)]
    render_grouped: bool,

    /// Derive the cookie specs from a URL
    #[bpaf(short('u'), long, argument("URL"))]
    url: Option<String>,

    /// HTTP GET the URL with matching cookies attached
    #[bpaf(short('F'), long, argument("URL"))]
    fetch: Option<String>,

    /// Extra request header for --fetch ("Key: Value"), repeatable
    #[bpaf(short('H'), long("header"), argument("HEADER"))]
    headers: Vec<String>,

    /// Print the response headers from --fetch
    #[bpaf(long)]
    dump_response_headers: bool,

    /// Print the response body from --fetch
    #[bpaf(long)]
    dump_response_body: bool,

    /// Restrict the query to one browser
    ///
    /// Supported browsers: chrome, firefox, safari
    #[bpaf(long, argument("BROWSER"))]
    browser: Option<Browser>,

    /// Keep only values that decode as an unexpired JWT
    #[bpaf(long)]
    require_jwt: bool,

    /// Keep only the first result
    #[bpaf(long)]
    single: bool,

    /// Output format for the plain listing
    ///
    /// Supported formats: json, netscape
    #[bpaf(long, argument("FORMAT"))]
    output: Option<OutputFormat>,

    /// Cookie name, % matches any
    #[bpaf(positional("NAME"))]
    name: Option<String>,

    /// Cookie domain, % matches any
    #[bpaf(positional("DOMAIN"))]
    domain: Option<String>,
}

/// Environment toggles are truthy when set to 1/true/yes/on.
fn env_truthy(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

fn init_tracing(verbose: bool) {
    let filter = if verbose || env_truthy("VERBOSE") {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env("LOG_LEVEL").unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &'static [&'static str]) -> Args {
        args().run_inner(bpaf::Args::from(argv)).unwrap()
    }

    #[test]
    fn positionals_and_flags_parse() {
        let parsed = parse(&["-d", "sid", "example.com"]);
        assert!(parsed.dump);
        assert_eq!(parsed.name.as_deref(), Some("sid"));
        assert_eq!(parsed.domain.as_deref(), Some("example.com"));
    }

    #[test]
    fn positionals_are_optional() {
        let parsed = parse(&["-r"]);
        assert!(parsed.render);
        assert!(parsed.name.is_none());
        assert!(parsed.domain.is_none());
    }

    #[test]
    fn render_merged_is_an_alias_for_render() {
        assert!(parse(&["--render-merged"]).render);
        assert!(parse(&["--render"]).render);
        assert!(parse(&["-r"]).render);
    }

    #[test]
    fn fetch_headers_accumulate() {
        let parsed = parse(&[
            "-F",
            "https://example.com",
            "-H",
            "X-A: 1",
            "-H",
            "X-B: 2",
        ]);
        assert_eq!(parsed.fetch.as_deref(), Some("https://example.com"));
        assert_eq!(parsed.headers, vec!["X-A: 1", "X-B: 2"]);
    }

    #[test]
    fn browser_and_output_parse() {
        let parsed = parse(&["--browser", "firefox", "--output", "json"]);
        assert_eq!(parsed.browser, Some(Browser::Firefox));
        assert!(matches!(parsed.output, Some(OutputFormat::Json)));

        let netscape = parse(&["--output", "netscape"]);
        assert!(matches!(netscape.output, Some(OutputFormat::Netscape)));
    }

    #[test]
    fn unknown_browser_is_rejected() {
        assert!(args()
            .run_inner(bpaf::Args::from(&["--browser", "netscape"][..]))
            .is_err());
    }

    #[test]
    fn env_truthy_accepts_the_usual_spellings() {
        for (value, expected) in [
            ("1", true),
            ("true", true),
            ("YES", true),
            ("on", true),
            ("0", false),
            ("false", false),
            ("", false),
        ] {
            std::env::set_var("GET_COOKIE_TEST_TRUTHY", value);
            assert_eq!(env_truthy("GET_COOKIE_TEST_TRUTHY"), expected, "value {value:?}");
        }
        std::env::remove_var("GET_COOKIE_TEST_TRUTHY");
        assert!(!env_truthy("GET_COOKIE_TEST_TRUTHY"));
    }
}

fn main() -> Result<ExitCode> {
    color_eyre::install()?;
    let args = args().run();
    init_tracing(args.verbose);

    let outcome = App::new(args).run();
    get_cookie::shutdown();

    match outcome {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(err) => {
            eprintln!("{err}");
            let code: u8 = match err.downcast_ref::<get_cookie::Error>() {
                Some(
                    get_cookie::Error::InvalidUrl(_)
                    | get_cookie::Error::InvalidSpec(_)
                    | get_cookie::Error::InvalidQuery(_),
                ) => 2,
                _ => 1,
            };
            Ok(ExitCode::from(code))
        }
    }
}
