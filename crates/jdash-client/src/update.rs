use futures_util::future::{self, BoxFuture, FutureExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

/// Snap store listing for the `juju` snap; the stable channels carry the
/// released versions.
pub const DEFAULT_RELEASE_FEED: &str = "https://api.snapcraft.io/v2/snaps/info/juju";

const FEED_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UpdateCheckError {
    #[error("no latest version known")]
    NoLatestVersion,
    #[error("unparseable version {0:?}")]
    BadVersion(String),
    #[error("release feed request failed: {0}")]
    Http(String),
    #[error("release feed lists no stable release")]
    NoStableRelease,
}

/// Decides whether a controller running `version` has an upgrade available.
pub trait UpdateChecker: Send + Sync {
    fn update_available<'a>(&'a self, version: &'a str) -> BoxFuture<'a, Result<bool, UpdateCheckError>>;
}

/// Compares against a fixed latest release, normally `latestJujuVersion`
/// from the runtime config.
#[derive(Debug, Clone, Default)]
pub struct LatestVersionChecker {
    latest: Option<String>,
}

impl LatestVersionChecker {
    pub fn new(latest: Option<String>) -> Self {
        Self { latest }
    }
}

impl UpdateChecker for LatestVersionChecker {
    fn update_available<'a>(&'a self, version: &'a str) -> BoxFuture<'a, Result<bool, UpdateCheckError>> {
        let result = self
            .latest
            .as_deref()
            .ok_or(UpdateCheckError::NoLatestVersion)
            .and_then(|latest| newer(latest, version));
        future::ready(result).boxed()
    }
}

#[derive(Debug, Deserialize)]
struct SnapInfo {
    #[serde(rename = "channel-map", default)]
    channel_map: Vec<ChannelEntry>,
}

#[derive(Debug, Deserialize)]
struct ChannelEntry {
    channel: Channel,
    #[serde(default)]
    version: String,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(default)]
    risk: String,
}

/// Looks the latest stable release up over HTTP once and compares every
/// controller against it.
pub struct ReleaseFeedChecker {
    http_client: reqwest::Client,
    feed_url: String,
    latest: OnceCell<String>,
}

impl ReleaseFeedChecker {
    pub fn new(feed_url: impl Into<String>) -> Result<Self, UpdateCheckError> {
        let http_client = reqwest::Client::builder()
            .timeout(FEED_TIMEOUT)
            .build()
            .map_err(|err| UpdateCheckError::Http(err.to_string()))?;
        Ok(Self {
            http_client,
            feed_url: feed_url.into(),
            latest: OnceCell::new(),
        })
    }

    /// The highest stable version in the feed. A failed lookup is retried
    /// on the next call.
    pub async fn latest(&self) -> Result<&str, UpdateCheckError> {
        self.latest
            .get_or_try_init(|| self.fetch_latest())
            .await
            .map(String::as_str)
    }

    async fn fetch_latest(&self) -> Result<String, UpdateCheckError> {
        let response = self
            .http_client
            .get(&self.feed_url)
            .header("Snap-Device-Series", "16")
            .send()
            .await
            .map_err(|err| UpdateCheckError::Http(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(UpdateCheckError::Http(format!("status {status}")));
        }
        let info: SnapInfo = response
            .json()
            .await
            .map_err(|err| UpdateCheckError::Http(err.to_string()))?;
        let latest = latest_stable(&info)?;
        debug!(event = "release_feed_loaded", url = %self.feed_url, latest = %latest);
        Ok(latest)
    }
}

impl UpdateChecker for ReleaseFeedChecker {
    fn update_available<'a>(&'a self, version: &'a str) -> BoxFuture<'a, Result<bool, UpdateCheckError>> {
        async move { newer(self.latest().await?, version) }.boxed()
    }
}

fn latest_stable(info: &SnapInfo) -> Result<String, UpdateCheckError> {
    info.channel_map
        .iter()
        .filter(|entry| entry.channel.risk == "stable")
        .filter_map(|entry| parse_version(&entry.version).ok().map(|parsed| (parsed, &entry.version)))
        .max_by_key(|(parsed, _)| *parsed)
        .map(|(_, version)| version.clone())
        .ok_or(UpdateCheckError::NoStableRelease)
}

/// The configured latest version wins; otherwise the release feed is used.
pub fn checker_for(latest_override: Option<String>, feed_url: &str) -> Arc<dyn UpdateChecker> {
    if latest_override.is_some() {
        return Arc::new(LatestVersionChecker::new(latest_override));
    }
    match ReleaseFeedChecker::new(feed_url) {
        Ok(checker) => Arc::new(checker),
        Err(err) => {
            warn!(event = "release_feed_unavailable", error = %err);
            Arc::new(LatestVersionChecker::default())
        }
    }
}

fn newer(latest: &str, version: &str) -> Result<bool, UpdateCheckError> {
    Ok(parse_version(latest)? > parse_version(version)?)
}

/// `3.1.6`, `3.2-beta1` and `3.1.6.1` all parse; pre-release suffixes are
/// ignored.
fn parse_version(raw: &str) -> Result<(u64, u64, u64), UpdateCheckError> {
    let bad = || UpdateCheckError::BadVersion(raw.to_string());
    let mut parts = raw.trim().split(['.', '-']);
    let mut next = |required: bool| -> Result<u64, UpdateCheckError> {
        match parts.next() {
            Some(part) => {
                let digits: String = part.chars().take_while(char::is_ascii_digit).collect();
                if digits.is_empty() {
                    if required {
                        Err(bad())
                    } else {
                        Ok(0)
                    }
                } else {
                    digits.parse().map_err(|_| bad())
                }
            }
            None if required => Err(bad()),
            None => Ok(0),
        }
    };
    Ok((next(true)?, next(true)?, next(false)?))
}

/// Check failures count as "no update".
pub async fn update_available_or_false(checker: &dyn UpdateChecker, version: Option<&str>) -> bool {
    match version {
        Some(version) => checker.update_available(version).await.unwrap_or(false),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Answers every HTTP request with `status` and `body`, counting them.
    async fn serve_feed(status: &'static str, body: String) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                let mut buf = vec![0u8; 4096];
                let _ = stream.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });
        (format!("http://{addr}/v2/snaps/info/juju"), hits)
    }

    fn feed_body() -> String {
        serde_json::json!({
            "channel-map": [
                {"channel": {"risk": "stable", "track": "3.1"}, "version": "3.1.8"},
                {"channel": {"risk": "stable", "track": "3.4"}, "version": "3.4.2"},
                {"channel": {"risk": "edge", "track": "3.5"}, "version": "3.5-beta2"},
            ],
        })
        .to_string()
    }

    #[tokio::test]
    async fn compares_against_latest_release() {
        let checker = LatestVersionChecker::new(Some("3.4.2".to_string()));
        assert_eq!(checker.update_available("3.1.6").await, Ok(true));
        assert_eq!(checker.update_available("3.4.2").await, Ok(false));
        assert_eq!(checker.update_available("3.5-beta1").await, Ok(false));
    }

    #[tokio::test]
    async fn failures_mean_no_update() {
        let unknown = LatestVersionChecker::default();
        assert_eq!(
            unknown.update_available("3.1.6").await,
            Err(UpdateCheckError::NoLatestVersion)
        );
        assert!(!update_available_or_false(&unknown, Some("3.1.6")).await);

        let checker = LatestVersionChecker::new(Some("3.4.2".to_string()));
        assert!(!update_available_or_false(&checker, Some("garbage")).await);
        assert!(!update_available_or_false(&checker, None).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn release_feed_uses_highest_stable_channel_once() {
        let (url, hits) = serve_feed("200 OK", feed_body()).await;
        let checker = ReleaseFeedChecker::new(url).expect("client");

        assert_eq!(checker.update_available("3.1.6").await, Ok(true));
        assert_eq!(checker.update_available("3.4.2").await, Ok(false));
        assert_eq!(checker.latest().await, Ok("3.4.2"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn release_feed_errors_are_reported_and_retried() {
        let (url, hits) = serve_feed("503 Service Unavailable", "{}".to_string()).await;
        let checker = ReleaseFeedChecker::new(url).expect("client");

        assert!(matches!(
            checker.update_available("3.1.6").await,
            Err(UpdateCheckError::Http(_))
        ));
        assert!(!update_available_or_false(&checker, Some("3.1.6")).await);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn feed_without_stable_channels_has_no_latest() {
        let info: SnapInfo = serde_json::from_value(serde_json::json!({
            "channel-map": [{"channel": {"risk": "edge"}, "version": "3.6-beta1"}],
        }))
        .expect("decode");
        assert_eq!(latest_stable(&info), Err(UpdateCheckError::NoStableRelease));
    }

    #[tokio::test]
    async fn configured_version_overrides_the_feed() {
        let checker = checker_for(Some("3.4.2".to_string()), "http://127.0.0.1:9/unused");
        assert_eq!(checker.update_available("3.1.6").await, Ok(true));
    }
}
