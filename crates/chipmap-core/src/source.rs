//! Where chip results come from.
//!
//! A source answers `Ok(None)` when a chip simply has no results; that is not
//! an error and the chip is still mapped with zero coverage.

use std::fs;
use std::io;
use std::path::PathBuf;

use crate::error::Result;
use crate::grid::{Chip, GridSpec};
use crate::payload::ChipPayload;

pub trait ResultSource: Send + Sync {
    fn fetch(&self, chip: &Chip) -> Result<Option<ChipPayload>>;
}

/// File name of a chip's results: `H05V02_-1815585_3014805.json`.
pub fn chip_file_name(chip: &Chip) -> String {
    format!(
        "H{:02}V{:02}_{}_{}.json",
        chip.tile.h,
        chip.tile.v,
        chip.ulx.round() as i64,
        chip.uly.round() as i64
    )
}

// ── Directory ─────────────────────────────────────────────────────────────────

/// Chip documents previously saved to a directory.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    dir: PathBuf,
    grid: GridSpec,
}

impl DirectorySource {
    pub fn new(dir: impl Into<PathBuf>, grid: GridSpec) -> Self {
        Self { dir: dir.into(), grid }
    }

    pub fn path_for(&self, chip: &Chip) -> PathBuf {
        self.dir.join(chip_file_name(chip))
    }
}

impl ResultSource for DirectorySource {
    fn fetch(&self, chip: &Chip) -> Result<Option<ChipPayload>> {
        let bytes = match fs::read(self.path_for(chip)) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        ChipPayload::parse(&bytes, chip, &self.grid).map(Some)
    }
}

// ── HTTP ──────────────────────────────────────────────────────────────────────

#[cfg(feature = "http")]
pub use http::HttpSource;

#[cfg(feature = "http")]
mod http {
    use std::time::Duration;

    use reqwest::blocking::Client;
    use reqwest::StatusCode;

    use super::ResultSource;
    use crate::error::Result;
    use crate::grid::{Chip, GridSpec};
    use crate::logging::LogContext;
    use crate::payload::ChipPayload;
    use crate::retry::RetryPolicy;

    /// Results served at `{host}/{algorithm}/{x}/{y}`.
    pub struct HttpSource {
        client: Client,
        host: String,
        algorithm: String,
        grid: GridSpec,
        retry: RetryPolicy,
        log: LogContext,
    }

    impl std::fmt::Debug for HttpSource {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("HttpSource")
                .field("host", &self.host)
                .field("algorithm", &self.algorithm)
                .finish_non_exhaustive()
        }
    }

    impl HttpSource {
        pub fn new(
            host: &str,
            algorithm: &str,
            grid: GridSpec,
            retry: RetryPolicy,
            log: LogContext,
        ) -> Result<Self> {
            let client = Client::builder().timeout(Duration::from_secs(120)).build()?;
            Ok(Self::with_client(client, host, algorithm, grid, retry, log))
        }

        pub fn with_client(
            client: Client,
            host: &str,
            algorithm: &str,
            grid: GridSpec,
            retry: RetryPolicy,
            log: LogContext,
        ) -> Self {
            Self {
                client,
                host: host.trim_end_matches('/').to_string(),
                algorithm: algorithm.to_string(),
                grid,
                retry,
                log,
            }
        }

        pub fn url_for(&self, chip: &Chip) -> String {
            format!(
                "{}/{}/{}/{}",
                self.host,
                self.algorithm,
                chip.ulx.round() as i64,
                chip.uly.round() as i64
            )
        }

        fn get(&self, url: &str) -> Result<Option<Vec<u8>>> {
            let resp = self.client.get(url).send()?;
            if resp.status() == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            let body = resp.error_for_status()?.bytes()?;
            Ok(Some(body.to_vec()))
        }
    }

    impl ResultSource for HttpSource {
        fn fetch(&self, chip: &Chip) -> Result<Option<ChipPayload>> {
            let url = self.url_for(chip);
            let Some(bytes) = self.retry.run(&self.log, &url, || self.get(&url))? else {
                return Ok(None);
            };
            ChipPayload::parse(&bytes, chip, &self.grid).map(Some)
        }
    }

    #[cfg(test)]
    mod tests {
        use std::io::{BufRead, BufReader, Write};
        use std::net::TcpListener;
        use std::thread;

        use super::*;
        use crate::config::DEFAULT_ALGORITHM;
        use crate::grid::TileId;

        /// Answer one request per entry of `responses`, in order, then stop.
        fn serve(responses: Vec<(&'static str, String)>) -> String {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let addr = listener.local_addr().unwrap();
            thread::spawn(move || {
                for (status, body) in responses {
                    let (stream, _) = listener.accept().unwrap();
                    let mut reader = BufReader::new(stream);
                    let mut line = String::new();
                    while reader.read_line(&mut line).unwrap() > 0 && line != "\r\n" {
                        line.clear();
                    }
                    let mut stream = reader.into_inner();
                    write!(
                        stream,
                        "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                        body.len()
                    )
                    .unwrap();
                }
            });
            format!("http://{addr}")
        }

        fn source(host: &str, retry: RetryPolicy) -> HttpSource {
            let client = Client::builder().no_proxy().timeout(Duration::from_secs(10)).build().unwrap();
            HttpSource::with_client(client, host, DEFAULT_ALGORITHM, GridSpec::default(), retry, LogContext::new("test"))
        }

        fn chip() -> Chip {
            GridSpec::default().chips(TileId::new(5, 2))[0]
        }

        #[test]
        fn not_found_is_missing_data() {
            let host = serve(vec![("404 Not Found", String::new())]);
            let fetched = source(&host, RetryPolicy::once()).fetch(&chip()).unwrap();
            assert!(fetched.is_none());
        }

        #[test]
        fn server_error_is_retried() {
            let chip = chip();
            let doc = format!(
                r#"[{{"x": {x}, "y": {y}, "result_ok": true,
                     "result": {{"change_models": [{{"start_day": 724000, "end_day": 730000, "curve_qa": 4}}]}}}}]"#,
                x = chip.ulx,
                y = chip.uly,
            );
            let host = serve(vec![("500 Internal Server Error", String::new()), ("200 OK", doc)]);
            let payload = source(&host, RetryPolicy::new(2, Duration::ZERO)).fetch(&chip).unwrap().unwrap();
            assert_eq!(payload.pixels[0][0].quality, 4);
        }

        #[test]
        fn retries_are_bounded() {
            let host = serve(vec![
                ("503 Service Unavailable", String::new()),
                ("503 Service Unavailable", String::new()),
            ]);
            assert!(source(&host, RetryPolicy::new(2, Duration::ZERO)).fetch(&chip()).is_err());
        }

        #[test]
        fn url_uses_integer_chip_corner() {
            let source = source("http://example.test/results/", RetryPolicy::once());
            assert_eq!(
                source.url_for(&chip()),
                "http://example.test/results/lcmap-pyccd:1.1.0/-1815585/3014805"
            );
        }
    }
}
