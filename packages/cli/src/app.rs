use std::io::{self, Write};

use color_eyre::{eyre::Context, Result};
use get_cookie::cookie::dedupe_cookies;
use get_cookie::render::{netscape, render_grouped, render_merged};
use get_cookie::{
    fetch_with_cookies, query_cookies, Browser, CookieQueryOptions, CookieSpec, Error,
    ExportedCookie, FetchOptions,
};

use crate::url::specs_from_uri;
use crate::{env_truthy, Args, OutputFormat};

mod output;

pub struct App {
    args: Args,
}

impl App {
    pub(crate) fn new(args: Args) -> Self {
        Self { args }
    }

    /// The specs this invocation asks for: URL-derived when `-u`/`-F` is
    /// given, otherwise the positional name/domain pair (wildcards when
    /// absent).
    fn specs(&self) -> Result<Vec<CookieSpec>> {
        let name = self.args.name.clone().unwrap_or_else(|| "%".into());

        if let Some(url) = self.args.url.as_deref().or(self.args.fetch.as_deref()) {
            let uri = get_cookie::fetch::parse_url(url)?;
            return Ok(specs_from_uri(&uri, &name));
        }

        let domain = self.args.domain.clone().unwrap_or_else(|| "%".into());
        Ok(vec![CookieSpec::new(name, domain)])
    }

    /// Flag options merged with the environment toggles.
    fn query_options(&self) -> CookieQueryOptions {
        let mut browser = self.args.browser;
        if browser.is_none() {
            if env_truthy("CHROME_ONLY") {
                browser = Some(Browser::Chrome);
            } else if env_truthy("FIREFOX_ONLY") {
                browser = Some(Browser::Firefox);
            }
        }

        CookieQueryOptions {
            browser,
            remove_expired: env_truthy("IGNORE_EXPIRED"),
            require_jwt: self.args.require_jwt || env_truthy("REQUIRE_JWT"),
            single: self.args.single || env_truthy("SINGLE"),
            ..Default::default()
        }
    }

    pub fn run(self) -> Result<()> {
        let specs = self.specs()?;
        let options = self.query_options();

        let mut cookies = Vec::new();
        for spec in &specs {
            cookies.extend(query_cookies(spec, &options)?);
        }
        let mut cookies = dedupe_cookies(cookies);
        if options.single {
            cookies.truncate(1);
        }

        if let Some(url) = self.args.fetch.clone() {
            return self.run_fetch(&url, &cookies);
        }

        let mut stream = io::stdout().lock();
        self.write_output(&cookies, &mut stream)
            .or_else(|e| match e {
                e if e.kind() == io::ErrorKind::BrokenPipe => Ok(()),
                _ => Err(e),
            })
            .wrap_err("Could not output cookies to the provided stream")
    }

    fn write_output<W: Write>(&self, cookies: &[ExportedCookie], stream: &mut W) -> io::Result<()> {
        if self.args.dump {
            output::dump(cookies, stream)
        } else if self.args.dump_grouped {
            output::dump_grouped(cookies, stream)
        } else if self.args.render {
            writeln!(stream, "{}", render_merged(cookies))
        } else if self.args.render_grouped {
            for (file, line) in render_grouped(cookies) {
                writeln!(stream, "{}: {line}", file.display())?;
            }
            Ok(())
        } else {
            match self.args.output {
                Some(OutputFormat::Json) => output::json(cookies, stream),
                Some(OutputFormat::Netscape) => {
                    netscape(cookies, stream)?;
                    writeln!(stream)
                }
                None => output::values(cookies, stream),
            }
        }
    }

    fn run_fetch(&self, url: &str, cookies: &[ExportedCookie]) -> Result<()> {
        let headers = self
            .args
            .headers
            .iter()
            .map(|raw| {
                raw.split_once(':')
                    .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
                    .ok_or_else(|| Error::InvalidHeader(raw.clone()))
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let store = get_cookie::memory::global_store();
        let result = fetch_with_cookies(
            url,
            cookies,
            &FetchOptions {
                headers,
                ..Default::default()
            },
            Some(&store),
        )?;

        let mut stream = io::stdout().lock();
        if self.args.dump_response_headers {
            for (name, value) in &result.headers {
                writeln!(stream, "{name}: {value}")?;
            }
        }
        if self.args.dump_response_body {
            writeln!(stream, "{}", result.body)?;
        }
        if !self.args.dump_response_headers && !self.args.dump_response_body {
            writeln!(stream, "{} {url}", result.status)?;
        }

        Ok(())
    }
}
