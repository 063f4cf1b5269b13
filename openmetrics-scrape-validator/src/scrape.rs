use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Collected, Empty};
use hyper::{StatusCode, Uri};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use openmetrics_validator::{ErrorLevel, Validator};
use thiserror::Error;
use tracing::{debug, error, info};

/// Errors that can occur while fetching an exposition.
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// The HTTP request could not be sent.
    #[error("failed to send request to endpoint: {0}")]
    Request(#[from] hyper_util::client::legacy::Error),

    /// The response body could not be read.
    #[error("failed to read response body: {0}")]
    Body(#[from] hyper::Error),

    /// The endpoint answered with a non-success status.
    #[error("unexpected status {0} from endpoint")]
    BadStatus(StatusCode),
}

/// Fetches exposition bytes from a target.
///
/// The HTTP implementation is [`HttpScraper`]; tests substitute scripted
/// implementations.
pub trait Scraper {
    /// Fetches one exposition body.
    fn scrape(&self) -> impl Future<Output = Result<Bytes, ScrapeError>> + Send;
}

/// [`Scraper`] that issues an HTTP GET against a fixed endpoint.
pub struct HttpScraper {
    client: Client<hyper_rustls::HttpsConnector<HttpConnector>, Empty<Bytes>>,
    endpoint: Uri,
}

impl HttpScraper {
    /// Creates a scraper for the given endpoint.  Plain `http` and `https`
    /// endpoints are both supported.
    pub fn new(endpoint: Uri) -> HttpScraper {
        let https = hyper_rustls::HttpsConnectorBuilder::new()
            .with_native_roots()
            .expect("no native root CA certificates found")
            .https_or_http()
            .enable_http1()
            .build();
        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(30))
            .build(https);
        HttpScraper { client, endpoint }
    }
}

impl Scraper for HttpScraper {
    async fn scrape(&self) -> Result<Bytes, ScrapeError> {
        let response = self.client.get(self.endpoint.clone()).await?;
        if !response.status().is_success() {
            return Err(ScrapeError::BadStatus(response.status()));
        }
        let body = response.into_body().collect().await.map(Collected::to_bytes)?;
        Ok(body)
    }
}

/// Builder for [`ScrapeLoop`], mirroring the driver's command line options.
pub struct ScrapeLoopBuilder {
    interval: Duration,
    timeout: Duration,
    level: ErrorLevel,
    kill_after: Option<Duration>,
}

impl Default for ScrapeLoopBuilder {
    fn default() -> Self {
        ScrapeLoopBuilder {
            interval: Duration::from_secs(10),
            timeout: Duration::from_secs(8),
            level: ErrorLevel::Should,
            kill_after: None,
        }
    }
}

impl ScrapeLoopBuilder {
    /// Creates a builder with the default interval (10s), timeout (8s), and
    /// error level (`should`).
    pub fn new() -> ScrapeLoopBuilder {
        ScrapeLoopBuilder::default()
    }

    /// Sets the time between scrapes.
    pub fn with_scrape_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sets the timeout applied to each scrape.  A scrape exceeding it is
    /// abandoned at the HTTP layer; the validator is not invoked.
    pub fn with_scrape_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the lowest rule category that counts as a validation failure.
    pub fn with_error_level(mut self, level: ErrorLevel) -> Self {
        self.level = level;
        self
    }

    /// Stops the loop after the given duration.
    pub fn with_kill_after(mut self, kill_after: Duration) -> Self {
        self.kill_after = kill_after.into();
        self
    }

    /// Builds a loop scraping the given endpoint over HTTP.
    pub fn build(self, endpoint: Uri) -> ScrapeLoop<HttpScraper> {
        let scraper = HttpScraper::new(endpoint);
        self.build_with_scraper(scraper)
    }

    fn build_with_scraper<S: Scraper>(self, scraper: S) -> ScrapeLoop<S> {
        ScrapeLoop {
            scraper,
            validator: Validator::new(self.level),
            interval: self.interval,
            timeout: self.timeout,
            kill_after: self.kill_after,
            failed: false,
        }
    }
}

/// Periodically scrapes an endpoint and validates each exposition.
///
/// The first scrape happens immediately, then one every interval.  Scrape
/// failures (timeouts, connection errors, bad statuses) are logged and
/// skipped; validation failures are logged and remembered for the final
/// verdict.  A validation result containing a parse error additionally
/// resets the validator, so a corrupt exposition cannot poison comparisons
/// against later scrapes.
pub struct ScrapeLoop<S> {
    scraper: S,
    validator: Validator,
    interval: Duration,
    timeout: Duration,
    kill_after: Option<Duration>,
    failed: bool,
}

impl<S: Scraper> ScrapeLoop<S> {
    /// Runs scrape-and-validate cycles until the `kill-after` watchdog (if
    /// any) fires.  Returns `true` when no validation error was observed.
    pub async fn run(&mut self) -> bool {
        match self.kill_after {
            Some(kill_after) => {
                let _ = tokio::time::timeout(kill_after, self.run_cycles()).await;
            }
            None => self.run_cycles().await,
        }
        !self.failed
    }

    async fn run_cycles(&mut self) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            self.run_once().await;
        }
    }

    async fn run_once(&mut self) {
        let body = match tokio::time::timeout(self.timeout, self.scraper.scrape()).await {
            Err(_) => {
                error!(timeout = ?self.timeout, "scrape timed out");
                return;
            }
            Ok(Err(err)) => {
                error!(error = %err, "scrape failed");
                return;
            }
            Ok(Ok(body)) => body,
        };
        debug!(bytes = body.len(), "scraped successfully");

        match self.validator.validate(&body) {
            Ok(()) => info!("validated successfully"),
            Err(errors) => {
                self.failed = true;
                if errors.has_parse_error() {
                    self.validator.reset();
                }
                error!(error = %errors, "validation failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use bytes::Bytes;
    use openmetrics_validator::ErrorLevel;

    use super::{ScrapeError, ScrapeLoopBuilder, Scraper};

    /// Replays a scripted sequence of exposition bodies.
    struct SequenceScraper {
        bodies: Mutex<VecDeque<&'static str>>,
    }

    impl SequenceScraper {
        fn new(bodies: &[&'static str]) -> SequenceScraper {
            SequenceScraper { bodies: Mutex::new(bodies.iter().copied().collect()) }
        }
    }

    impl Scraper for SequenceScraper {
        async fn scrape(&self) -> Result<Bytes, ScrapeError> {
            let mut bodies = self.bodies.lock().unwrap();
            let body = bodies.pop_front().expect("scripted bodies exhausted");
            Ok(Bytes::from(body))
        }
    }

    /// Never completes; used to exercise the scrape timeout.
    struct StalledScraper;

    impl Scraper for StalledScraper {
        async fn scrape(&self) -> Result<Bytes, ScrapeError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_decreasing_counter_fails_the_run() {
        let scraper = SequenceScraper::new(&[
            "# TYPE a counter\na_total 2\n# EOF",
            "# TYPE a counter\na_total 1\n# EOF",
        ]);
        let mut scrape_loop = ScrapeLoopBuilder::new()
            .with_error_level(ErrorLevel::Must)
            .build_with_scraper(scraper);

        scrape_loop.run_once().await;
        assert!(!scrape_loop.failed);
        scrape_loop.run_once().await;
        assert!(scrape_loop.failed);
    }

    #[tokio::test]
    async fn test_parse_error_resets_validator() {
        let scraper = SequenceScraper::new(&[
            "# TYPE a counter\na_total 1\n# EOF",
            // Truncated exposition: terminator is missing.
            "# TYPE a counter\na_total 2\n",
            "# TYPE b counter\nb_total 1\n# EOF",
        ]);
        let mut scrape_loop = ScrapeLoopBuilder::new()
            .with_error_level(ErrorLevel::Should)
            .build_with_scraper(scraper);

        scrape_loop.run_once().await;
        assert!(!scrape_loop.failed);

        scrape_loop.run_once().await;
        assert!(scrape_loop.failed);

        // The reset after the parse error dropped family `a` from the
        // baseline, so its absence in the next scrape is not flagged.
        scrape_loop.failed = false;
        scrape_loop.run_once().await;
        assert!(!scrape_loop.failed);
    }

    #[tokio::test]
    async fn test_validation_errors_do_not_reset_history() {
        let scraper = SequenceScraper::new(&[
            "# TYPE a counter\na_total 2\n# EOF",
            // NaN total: a MUST violation, but the exposition still parses
            // and rolls forward.
            "# TYPE a counter\na_total NaN\n# TYPE b counter\nb_total 1\n# EOF",
            "# TYPE b counter\nb_total 2\n# EOF",
        ]);
        let mut scrape_loop = ScrapeLoopBuilder::new()
            .with_error_level(ErrorLevel::Should)
            .build_with_scraper(scraper);

        scrape_loop.run_once().await;
        scrape_loop.run_once().await;
        assert!(scrape_loop.failed);

        // Family `a` disappears in the third scrape; because the second
        // exposition rolled forward, the disappearance is reported.
        scrape_loop.failed = false;
        scrape_loop.run_once().await;
        assert!(scrape_loop.failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scrape_timeout_skips_validation() {
        let mut scrape_loop = ScrapeLoopBuilder::new()
            .with_scrape_timeout(Duration::from_secs(1))
            .build_with_scraper(StalledScraper);

        scrape_loop.run_once().await;
        assert!(!scrape_loop.failed);
    }
}
