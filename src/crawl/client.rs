//! Blocking HTTP client with a jittered politeness delay before every request and
//! bounded retries with jittered backoff.

use super::error::CrawlError;
use rand::Rng;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{debug, info, warn};

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko)";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_REDIRECTS: usize = 10;

/// Default number of attempts per URL (initial plus retries).
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Politeness delay slept before every attempt, including the first.
pub const DEFAULT_POLITENESS_DELAY: DelayRange =
    DelayRange::new(Duration::from_secs(1), Duration::from_secs(3));
/// Backoff slept between a failed attempt and the next one.
pub const DEFAULT_RETRY_BACKOFF: DelayRange =
    DelayRange::new(Duration::from_secs(2), Duration::from_secs(4));

/// Source of raw page content. The crawl controller only sees this trait.
pub trait PageFetcher {
    /// Fetch `url`, retrying transient failures. Any error means "no content this time".
    fn fetch(&mut self, url: &str) -> Result<String, CrawlError>;
}

/// Closed interval of durations sampled uniformly at millisecond granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayRange {
    min: Duration,
    max: Duration,
}

impl DelayRange {
    pub const ZERO: DelayRange = DelayRange::new(Duration::ZERO, Duration::ZERO);

    pub const fn new(min: Duration, max: Duration) -> Self {
        Self { min, max }
    }

    pub fn min(&self) -> Duration {
        self.min
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    /// Random duration in `[min, max]`; `min` when the range is empty or inverted.
    pub fn sample(&self) -> Duration {
        let lo = self.min.as_millis() as u64;
        let hi = self.max.as_millis() as u64;
        if hi <= lo {
            return self.min;
        }
        Duration::from_millis(rand::thread_rng().gen_range(lo..=hi))
    }
}

/// Blocking HTTP client that sleeps a random politeness delay before each request.
#[derive(Debug)]
pub struct PoliteClient {
    inner: reqwest::blocking::Client,
    max_retries: u32,
    politeness: DelayRange,
    backoff: DelayRange,
}

impl PoliteClient {
    pub fn builder() -> PoliteClientBuilder {
        PoliteClientBuilder::default()
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// GET `url` until it answers HTTP 200 or `max_retries` attempts are spent.
    ///
    /// Timeouts, connection errors, non-200 statuses and unreadable bodies all count as a
    /// failed attempt. The reason is logged per attempt; exhaustion returns
    /// [`CrawlError::RetriesExhausted`] wrapping the last failure.
    pub fn fetch_with_retry(&mut self, url: &str) -> Result<String, CrawlError> {
        let max_attempts = self.max_retries;
        let mut last_err: Option<CrawlError> = None;
        for attempt in 1..=max_attempts {
            std::thread::sleep(self.politeness.sample());
            match self.attempt(url) {
                Ok(body) => {
                    info!(url, attempt, "fetched page");
                    return Ok(body);
                }
                Err(e) => {
                    warn!(url, attempt, max_attempts, error = %e, "fetch attempt failed");
                    last_err = Some(e);
                }
            }
            if attempt < max_attempts {
                let backoff = self.backoff.sample();
                debug!(url, backoff_ms = backoff.as_millis() as u64, "backing off before retry");
                std::thread::sleep(backoff);
            }
        }
        let last = last_err.unwrap_or_else(|| CrawlError::HttpStatus {
            status: 0,
            url: url.to_string(),
        });
        warn!(url, attempts = max_attempts, "giving up on page");
        Err(CrawlError::RetriesExhausted {
            url: url.to_string(),
            attempts: max_attempts,
            last: Box::new(last),
        })
    }

    fn attempt(&self, url: &str) -> Result<String, CrawlError> {
        let response = self
            .inner
            .get(url)
            .send()
            .map_err(|e| CrawlError::from_send(url, e))?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(CrawlError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        response.text().map_err(|e| CrawlError::BodyRead {
            url: url.to_string(),
            source: e,
        })
    }
}

impl PageFetcher for PoliteClient {
    fn fetch(&mut self, url: &str) -> Result<String, CrawlError> {
        self.fetch_with_retry(url)
    }
}

/// Builder for PoliteClient with optional User-Agent, timeout, retry and delay settings.
#[derive(Debug)]
pub struct PoliteClientBuilder {
    user_agent: Option<String>,
    timeout_secs: u64,
    max_retries: u32,
    politeness: DelayRange,
    backoff: DelayRange,
}

impl Default for PoliteClientBuilder {
    fn default() -> Self {
        Self {
            user_agent: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
            politeness: DEFAULT_POLITENESS_DELAY,
            backoff: DEFAULT_RETRY_BACKOFF,
        }
    }
}

impl PoliteClientBuilder {
    /// Set a custom User-Agent. If not set, a browser-like default is used.
    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }

    /// Set request timeout in seconds. Default 30.
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Set number of attempts per URL (default 3, minimum 1).
    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = n.max(1);
        self
    }

    /// Override the pre-request politeness delay (default 1-3s).
    pub fn politeness_delay(mut self, range: DelayRange) -> Self {
        self.politeness = range;
        self
    }

    /// Override the backoff between attempts (default 2-4s).
    pub fn retry_backoff(mut self, range: DelayRange) -> Self {
        self.backoff = range;
        self
    }

    pub fn build(self) -> Result<PoliteClient, CrawlError> {
        let user_agent = self
            .user_agent
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
        let inner = reqwest::blocking::Client::builder()
            .cookie_store(true)
            .user_agent(user_agent)
            .timeout(Duration::from_secs(self.timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()
            .map_err(CrawlError::Client)?;
        Ok(PoliteClient {
            inner,
            max_retries: self.max_retries,
            politeness: self.politeness,
            backoff: self.backoff,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    /// Serve `responses` in order (status, body), repeating the last one, until dropped.
    fn spawn_server(responses: Vec<(u16, &'static str)>) -> (String, Arc<AtomicUsize>) {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start tiny_http server");
        let base = format!("http://{}", server.server_addr());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        thread::spawn(move || {
            for request in server.incoming_requests() {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let (status, body) = responses
                    .get(n)
                    .or_else(|| responses.last())
                    .copied()
                    .unwrap_or((500, ""));
                let _ = request
                    .respond(tiny_http::Response::from_string(body).with_status_code(status));
            }
        });
        (base, hits)
    }

    fn fast_client(max_retries: u32) -> PoliteClient {
        PoliteClient::builder()
            .max_retries(max_retries)
            .politeness_delay(DelayRange::ZERO)
            .retry_backoff(DelayRange::ZERO)
            .timeout_secs(5)
            .build()
            .expect("client builds")
    }

    #[test]
    fn delay_range_samples_within_bounds() {
        let range = DelayRange::new(Duration::from_millis(10), Duration::from_millis(20));
        for _ in 0..200 {
            let d = range.sample();
            assert!(d >= range.min() && d <= range.max(), "{:?} out of range", d);
        }
        assert_eq!(DelayRange::ZERO.sample(), Duration::ZERO);
        let inverted = DelayRange::new(Duration::from_millis(5), Duration::from_millis(1));
        assert_eq!(inverted.sample(), Duration::from_millis(5));
    }

    #[test]
    fn default_delays_match_politeness_policy() {
        assert_eq!(DEFAULT_POLITENESS_DELAY.min(), Duration::from_secs(1));
        assert_eq!(DEFAULT_POLITENESS_DELAY.max(), Duration::from_secs(3));
        assert_eq!(DEFAULT_RETRY_BACKOFF.min(), Duration::from_secs(2));
        assert_eq!(DEFAULT_RETRY_BACKOFF.max(), Duration::from_secs(4));
    }

    #[test]
    fn max_retries_is_at_least_one() {
        let client = PoliteClient::builder()
            .max_retries(0)
            .build()
            .expect("client builds");
        assert_eq!(client.max_retries(), 1);
    }

    #[test]
    fn returns_body_on_first_success() -> Result<(), CrawlError> {
        let (base, hits) = spawn_server(vec![(200, "<p>Hello</p>")]);
        let mut client = fast_client(3);
        let body = client.fetch(&format!("{}/chapter-1", base))?;
        assert_eq!(body, "<p>Hello</p>");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn retries_until_success() -> Result<(), CrawlError> {
        let (base, hits) = spawn_server(vec![(503, "busy"), (500, "oops"), (200, "ok")]);
        let mut client = fast_client(3);
        let body = client.fetch(&format!("{}/chapter-2", base))?;
        assert_eq!(body, "ok");
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        Ok(())
    }

    #[test]
    fn non_200_success_codes_count_as_failure() {
        let (base, hits) = spawn_server(vec![(204, "")]);
        let mut client = fast_client(2);
        let result = client.fetch(&format!("{}/chapter-3", base));
        assert!(matches!(
            result,
            Err(CrawlError::RetriesExhausted { attempts: 2, .. })
        ));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn exhaustion_reports_last_status() {
        let (base, hits) = spawn_server(vec![(404, "missing")]);
        let mut client = fast_client(3);
        match client.fetch(&format!("{}/chapter-4", base)) {
            Err(CrawlError::RetriesExhausted { attempts, last, .. }) => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, CrawlError::HttpStatus { status: 404, .. }));
            }
            other => panic!("expected RetriesExhausted, got {:?}", other),
        }
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    fn fixed(ms: u64) -> DelayRange {
        DelayRange::new(Duration::from_millis(ms), Duration::from_millis(ms))
    }

    #[test]
    fn politeness_delay_precedes_first_attempt() -> Result<(), CrawlError> {
        let (base, hits) = spawn_server(vec![(200, "ok")]);
        let mut client = PoliteClient::builder()
            .max_retries(1)
            .politeness_delay(fixed(200))
            .retry_backoff(fixed(1_000))
            .timeout_secs(5)
            .build()?;
        let started = std::time::Instant::now();
        client.fetch(&format!("{}/chapter-1", base))?;
        let elapsed = started.elapsed();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(elapsed >= Duration::from_millis(200), "{:?}", elapsed);
        // A single successful attempt never backs off.
        assert!(elapsed < Duration::from_millis(1_000), "{:?}", elapsed);
        Ok(())
    }

    #[test]
    fn backoff_only_between_attempts() {
        let (base, hits) = spawn_server(vec![(404, "missing")]);
        let mut client = PoliteClient::builder()
            .max_retries(2)
            .politeness_delay(fixed(300))
            .retry_backoff(fixed(500))
            .timeout_secs(5)
            .build()
            .expect("client builds");
        let started = std::time::Instant::now();
        let result = client.fetch(&format!("{}/chapter-4", base));
        let elapsed = started.elapsed();
        assert!(matches!(
            result,
            Err(CrawlError::RetriesExhausted { attempts: 2, .. })
        ));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        // Two politeness delays and one backoff: 2 x 300 + 500.
        assert!(elapsed >= Duration::from_millis(1_100), "{:?}", elapsed);
        // A trailing backoff would push this to 1600ms.
        assert!(elapsed < Duration::from_millis(1_550), "{:?}", elapsed);
    }

    #[test]
    fn connection_refused_is_a_network_failure() {
        // Bind then drop to get a port with nothing listening.
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .and_then(|l| l.local_addr())
            .map(|a| a.port())
            .expect("free port");
        let mut client = fast_client(1);
        match client.fetch(&format!("http://127.0.0.1:{}/chapter-1", port)) {
            Err(CrawlError::RetriesExhausted { last, .. }) => {
                assert!(matches!(*last, CrawlError::Network { .. }));
            }
            other => panic!("expected RetriesExhausted, got {:?}", other),
        }
    }
}
