use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::extract::{self, Candidate};
use super::{DiscoveredBlog, DiscoveryError, EventSender};
use crate::config::Config;
use crate::feed::{parse_feed, sanitize_feed_bytes};
use crate::http::{build_client, read_limited_bytes};
use crate::util::{origin_of, validate_url};

/// Paths tried on a candidate's origin when its page advertises no feed.
const CONVENTIONAL_FEED_PATHS: [&str; 3] = ["/feed", "/rss.xml", "/atom.xml"];

const AUTODISCOVERY_SCORE: f64 = 0.9;
const CONVENTIONAL_PATH_SCORE: f64 = 0.6;
const BLOGROLL_BONUS: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Confirmation {
    /// The page declared the feed with `<link rel="alternate">`
    Autodiscovery,
    /// A well-known feed path answered with a parseable feed
    ConventionalPath,
}

fn score(confirmation: Confirmation, blogroll_hint: bool) -> f64 {
    let base = match confirmation {
        Confirmation::Autodiscovery => AUTODISCOVERY_SCORE,
        Confirmation::ConventionalPath => CONVENTIONAL_PATH_SCORE,
    };
    let bonus = if blogroll_hint { BLOGROLL_BONUS } else { 0.0 };
    (base + bonus).min(1.0)
}

/// Highest score first, stable on discovery order; repeated feed URLs keep
/// their first (best) occurrence.
fn rank(mut blogs: Vec<DiscoveredBlog>) -> Vec<DiscoveredBlog> {
    blogs.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut seen = HashSet::new();
    blogs.retain(|blog| seen.insert(blog.feed_url.clone()));
    blogs
}

struct FetchedPage {
    /// Final URL after redirects
    url: Url,
    body: Vec<u8>,
}

impl FetchedPage {
    fn summarize(&self) -> extract::PageSummary {
        extract::summarize_page(&String::from_utf8_lossy(&self.body), &self.url)
    }
}

/// Finds feeds on the sites a blog links to.
pub struct Crawler {
    client: reqwest::Client,
    page_timeout: Duration,
    max_page_bytes: usize,
    max_candidates: usize,
    probe_concurrency: usize,
    allow_private_hosts: bool,
}

impl Crawler {
    pub fn new(config: &Config) -> Result<Self, DiscoveryError> {
        let client = build_client(
            &config.user_agent,
            config.proxy_url.as_deref(),
            config.allow_private_hosts,
        )?;
        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: reqwest::Client, config: &Config) -> Self {
        Self {
            client,
            page_timeout: config.discovery.page_timeout(),
            max_page_bytes: config.discovery.max_page_bytes,
            max_candidates: config.discovery.max_candidates,
            probe_concurrency: config.discovery.probe_concurrency.max(1),
            allow_private_hosts: config.allow_private_hosts,
        }
    }

    /// Discover feeds linked from the homepage of the blog behind `feed_url`.
    ///
    /// The homepage is `homepage_hint` when non-empty, else the site link the
    /// feed declares, else the feed URL's origin. Results are sorted by
    /// descending score.
    ///
    /// When `cancel` fires the feeds confirmed so far are returned; that is not
    /// an error.
    ///
    /// # Errors
    ///
    /// Fails when no valid homepage URL can be derived or the homepage itself
    /// cannot be fetched (timeout, HTTP status, network, size).
    pub async fn discover_from_feed(
        &self,
        cancel: &CancellationToken,
        feed_url: &str,
        homepage_hint: &str,
        events: &EventSender,
    ) -> Result<Vec<DiscoveredBlog>, DiscoveryError> {
        let homepage = self.resolve_homepage(cancel, feed_url, homepage_hint).await?;

        events.progress(format!("Fetching homepage: {homepage}")).await;
        let page = match self.fetch_page(cancel, homepage.as_str()).await {
            Err(DiscoveryError::Cancelled) => {
                events.progress("Discovery cancelled before the homepage loaded").await;
                return Ok(Vec::new());
            }
            other => other?,
        };

        let site = page.url.clone();
        let summary = page.summarize();
        let mut seen = HashSet::new();
        let mut candidates = extract::candidate_links(&summary.anchors, &site, false, &mut seen);

        if let Some(friend_url) = extract::find_friend_page(&summary.anchors, &site) {
            events.progress(format!("Following friend links page: {friend_url}")).await;
            match self.fetch_page(cancel, friend_url.as_str()).await {
                Ok(friend_page) => {
                    let friend_summary = friend_page.summarize();
                    candidates.extend(extract::candidate_links(
                        &friend_summary.anchors,
                        &site,
                        true,
                        &mut seen,
                    ));
                }
                Err(DiscoveryError::Cancelled) => return Ok(Vec::new()),
                Err(e) => {
                    tracing::debug!(url = %friend_url, error = %e, "Friend links page unavailable");
                }
            }
        }

        if candidates.len() > self.max_candidates {
            tracing::debug!(
                found = candidates.len(),
                kept = self.max_candidates,
                "Capping discovery candidates"
            );
            candidates.truncate(self.max_candidates);
        }
        events
            .progress(format!("Found {} candidate sites", candidates.len()))
            .await;

        let confirmed = rank(self.probe_all(cancel, candidates, events).await);
        events
            .progress(format!("Confirmed {} feeds", confirmed.len()))
            .await;
        Ok(confirmed)
    }

    async fn resolve_homepage(
        &self,
        cancel: &CancellationToken,
        feed_url: &str,
        homepage_hint: &str,
    ) -> Result<Url, DiscoveryError> {
        let hint = homepage_hint.trim();
        if !hint.is_empty() {
            return self.validate(hint);
        }

        match self.fetch_page(cancel, feed_url).await {
            Ok(page) => {
                let declared = parse_feed(&sanitize_feed_bytes(&page.body), page.url.as_str())
                    .ok()
                    .and_then(|feed| feed.site_url)
                    .and_then(|site| self.validate(&site).ok());
                if let Some(site) = declared {
                    return Ok(site);
                }
            }
            Err(e) => {
                tracing::debug!(feed_url, error = %e, "Could not read feed to find its homepage");
            }
        }

        let origin = origin_of(feed_url).ok_or_else(|| DiscoveryError::InvalidUrl(feed_url.to_string()))?;
        self.validate(&origin)
    }

    /// Probe candidates with bounded concurrency.
    ///
    /// Probes finish in any order; results come back in candidate order so
    /// that equal scores rank by where the link appeared. On cancellation
    /// every probe that already confirmed a feed is kept.
    async fn probe_all(
        &self,
        cancel: &CancellationToken,
        candidates: Vec<Candidate>,
        events: &EventSender,
    ) -> Vec<DiscoveredBlog> {
        let total = candidates.len();
        let probes = stream::iter(candidates.into_iter().enumerate())
            .map(|(i, candidate)| async move {
                (i, self.probe(cancel, candidate, i + 1, total, events).await)
            })
            .buffer_unordered(self.probe_concurrency);
        let mut probes = std::pin::pin!(probes);

        let mut confirmed: Vec<(usize, DiscoveredBlog)> = Vec::new();
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    events
                        .progress(format!("Stopped early, keeping {} confirmed feeds", confirmed.len()))
                        .await;
                    break;
                }
                next = probes.next() => match next {
                    Some((i, Some(blog))) => confirmed.push((i, blog)),
                    Some((_, None)) => {}
                    None => break,
                },
            }
        }
        confirmed.sort_by_key(|(i, _)| *i);
        confirmed.into_iter().map(|(_, blog)| blog).collect()
    }

    async fn probe(
        &self,
        cancel: &CancellationToken,
        candidate: Candidate,
        position: usize,
        total: usize,
        events: &EventSender,
    ) -> Option<DiscoveredBlog> {
        if cancel.is_cancelled() {
            return None;
        }
        events
            .progress(format!("Checking {position}/{total}: {}", candidate.url))
            .await;

        let page = match self.fetch_page(cancel, candidate.url.as_str()).await {
            Ok(page) => page,
            Err(e) => {
                tracing::debug!(url = %candidate.url, error = %e, "Candidate unreachable");
                return None;
            }
        };

        let summary = page.summarize();
        let name = summary
            .title
            .or_else(|| candidate.text.clone())
            .or_else(|| candidate.url.host_str().map(str::to_string))
            .unwrap_or_default();

        let found = |feed_url: String, confirmation: Confirmation| DiscoveredBlog {
            name: name.clone(),
            homepage: candidate.url.to_string(),
            feed_url,
            score: score(confirmation, candidate.blogroll_hint),
        };

        if let Some(feed_link) = summary.feed_link {
            if self.validate(feed_link.as_str()).is_ok() {
                return Some(found(feed_link.to_string(), Confirmation::Autodiscovery));
            }
        }

        for path in CONVENTIONAL_FEED_PATHS {
            if cancel.is_cancelled() {
                return None;
            }
            let Ok(feed_url) = page.url.join(path) else {
                continue;
            };
            if self.is_parseable_feed(cancel, &feed_url).await {
                return Some(found(feed_url.to_string(), Confirmation::ConventionalPath));
            }
        }

        tracing::debug!(url = %candidate.url, "No feed found on candidate");
        None
    }

    async fn is_parseable_feed(&self, cancel: &CancellationToken, url: &Url) -> bool {
        let Ok(page) = self.fetch_page(cancel, url.as_str()).await else {
            return false;
        };
        parse_feed(&sanitize_feed_bytes(&page.body), page.url.as_str())
            .is_ok_and(|feed| feed.title.is_some() || !feed.articles.is_empty())
    }

    fn validate(&self, url: &str) -> Result<Url, DiscoveryError> {
        validate_url(url, self.allow_private_hosts).map_err(|e| DiscoveryError::InvalidUrl(e.to_string()))
    }

    /// GET one page under the page budget, raced against `cancel`.
    async fn fetch_page(&self, cancel: &CancellationToken, url: &str) -> Result<FetchedPage, DiscoveryError> {
        let url = self.validate(url)?;

        let request = async {
            let response = self.client.get(url).send().await?;
            if !response.status().is_success() {
                return Err(DiscoveryError::HttpStatus(response.status().as_u16()));
            }
            let final_url = response.url().clone();
            let body = read_limited_bytes(response, self.max_page_bytes).await?;
            Ok(FetchedPage {
                url: final_url,
                body,
            })
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(DiscoveryError::Cancelled),
            result = tokio::time::timeout(self.page_timeout, request) => {
                result.map_err(|_| DiscoveryError::Timeout)?
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const RSS: &str = r#"<?xml version="1.0"?><rss version="2.0"><channel><title>Y Feed</title>
<item><link>https://y.example/1</link><title>Post</title></item></channel></rss>"#;

    fn test_config() -> Config {
        let mut config = Config {
            allow_private_hosts: true,
            ..Config::default()
        };
        config.discovery.page_timeout_secs = 2;
        config
    }

    fn blog(feed_url: &str, score: f64) -> DiscoveredBlog {
        DiscoveredBlog {
            name: String::new(),
            homepage: String::new(),
            feed_url: feed_url.into(),
            score,
        }
    }

    async fn html_site(route: &str, html: String) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(html)
                    .insert_header("Content-Type", "text/html"),
            )
            .mount(&server)
            .await;
        server
    }

    #[test]
    fn test_score_values() {
        assert_eq!(score(Confirmation::Autodiscovery, false), 0.9);
        assert_eq!(score(Confirmation::ConventionalPath, false), 0.6);
        assert!((score(Confirmation::Autodiscovery, true) - 0.95).abs() < 1e-9);
        assert!(score(Confirmation::Autodiscovery, true) <= 1.0);
    }

    #[test]
    fn test_rank_is_stable_and_dedups() {
        let ranked = rank(vec![
            blog("a", 0.6),
            blog("b", 0.9),
            blog("c", 0.6),
            blog("b", 0.65),
            blog("d", 0.9),
        ]);
        let order: Vec<(&str, f64)> = ranked.iter().map(|b| (b.feed_url.as_str(), b.score)).collect();
        assert_eq!(order, vec![("b", 0.9), ("d", 0.9), ("a", 0.6), ("c", 0.6)]);
    }

    #[tokio::test]
    async fn test_discovers_autodiscovery_and_conventional_feeds() {
        let x = html_site(
            "/",
            r#"<html><head><title>Site X</title>
<link rel="alternate" type="application/rss+xml" href="/feed.xml"></head></html>"#
                .to_string(),
        )
        .await;

        let y = html_site("/", "<html><head><title>Site Y</title></head></html>".to_string()).await;
        Mock::given(method("GET"))
            .and(path("/rss.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(RSS))
            .mount(&y)
            .await;

        let z = html_site("/", "<html><title>No feed here</title></html>".to_string()).await;

        let home = html_site(
            "/",
            format!(
                r#"<html><body>
<a href="/about">About me</a>
<a href="{y}/">Y's place</a>
<a href="{x}/">X</a>
<a href="{z}/">Z</a>
<a href="{x}/logo.png">logo</a>
</body></html>"#,
                x = x.uri(),
                y = y.uri(),
                z = z.uri()
            ),
        )
        .await;

        let crawler = Crawler::new(&test_config()).unwrap();
        let found = crawler
            .discover_from_feed(
                &CancellationToken::new(),
                &format!("{}/feed.xml", home.uri()),
                &format!("{}/", home.uri()),
                &EventSender::disabled(),
            )
            .await
            .unwrap();

        assert_eq!(found.len(), 2);
        assert_eq!(found[0].feed_url, format!("{}/feed.xml", x.uri()));
        assert_eq!(found[0].name, "Site X");
        assert_eq!(found[0].score, 0.9);
        assert_eq!(found[1].feed_url, format!("{}/rss.xml", y.uri()));
        assert_eq!(found[1].name, "Site Y");
        assert_eq!(found[1].score, 0.6);
    }

    #[tokio::test]
    async fn test_friend_page_candidates_get_bonus() {
        let x = html_site(
            "/",
            r#"<link rel="alternate" type="application/atom+xml" href="/atom">"#.to_string(),
        )
        .await;

        let home = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"<a href="/friends/">Friends</a>"#))
            .mount(&home)
            .await;
        Mock::given(method("GET"))
            .and(path("/friends/"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(format!(r#"<a href="{}/">Pal</a>"#, x.uri())),
            )
            .mount(&home)
            .await;

        let crawler = Crawler::new(&test_config()).unwrap();
        let found = crawler
            .discover_from_feed(
                &CancellationToken::new(),
                &format!("{}/feed", home.uri()),
                &format!("{}/", home.uri()),
                &EventSender::disabled(),
            )
            .await
            .unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].feed_url, format!("{}/atom", x.uri()));
        assert!((found[0].score - 0.95).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_homepage_derived_from_feed_link() {
        let home = html_site("/blog/", "<p>no links</p>".to_string()).await;
        Mock::given(method("GET"))
            .and(path("/feed.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!(
                r#"<rss version="2.0"><channel><title>T</title><link>{}/blog/</link></channel></rss>"#,
                home.uri()
            )))
            .mount(&home)
            .await;

        let crawler = Crawler::new(&test_config()).unwrap();
        let found = crawler
            .discover_from_feed(
                &CancellationToken::new(),
                &format!("{}/feed.xml", home.uri()),
                "",
                &EventSender::disabled(),
            )
            .await
            .unwrap();
        assert!(found.is_empty());

        let requests = home.received_requests().await.unwrap();
        assert!(requests.iter().any(|r| r.url.path() == "/blog/"));
    }

    #[tokio::test]
    async fn test_unreachable_homepage_is_error() {
        let home = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&home)
            .await;

        let crawler = Crawler::new(&test_config()).unwrap();
        let err = crawler
            .discover_from_feed(
                &CancellationToken::new(),
                &format!("{}/feed", home.uri()),
                &format!("{}/", home.uri()),
                &EventSender::disabled(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::HttpStatus(500)));
    }

    #[tokio::test]
    async fn test_private_hosts_rejected_by_default() {
        let crawler = Crawler::new(&Config::default()).unwrap();
        let err = crawler
            .discover_from_feed(
                &CancellationToken::new(),
                "http://127.0.0.1:9/feed",
                "http://127.0.0.1:9/",
                &EventSender::disabled(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::InvalidUrl(_)));
    }

    #[tokio::test]
    async fn test_cancellation_returns_partial_results() {
        let fast = html_site(
            "/",
            r#"<link rel="alternate" type="application/rss+xml" href="/rss">"#.to_string(),
        )
        .await;
        let slow = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30)))
            .mount(&slow)
            .await;

        let home = html_site(
            "/",
            format!(
                r#"<a href="{}/">fast</a><a href="{}/">slow</a>"#,
                fast.uri(),
                slow.uri()
            ),
        )
        .await;

        let mut config = test_config();
        config.discovery.page_timeout_secs = 60;
        config.discovery.probe_concurrency = 1;
        let crawler = Crawler::new(&config).unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            trigger.cancel();
        });

        let found = tokio::time::timeout(
            Duration::from_secs(5),
            crawler.discover_from_feed(
                &cancel,
                &format!("{}/feed", home.uri()),
                &format!("{}/", home.uri()),
                &EventSender::disabled(),
            ),
        )
        .await
        .expect("cancellation should end discovery promptly")
        .unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].feed_url, format!("{}/rss", fast.uri()));
    }

    async fn slow_site(delay: Duration) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(
                        r#"<link rel="alternate" type="application/rss+xml" href="/rss">"#,
                    )
                    .insert_header("Content-Type", "text/html")
                    .set_delay(delay),
            )
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn test_cancel_keeps_feed_confirmed_behind_slow_candidate() {
        let slow = slow_site(Duration::from_secs(30)).await;
        let fast = html_site(
            "/",
            r#"<link rel="alternate" type="application/rss+xml" href="/rss">"#.to_string(),
        )
        .await;
        let home = html_site(
            "/",
            format!(
                r#"<a href="{}/">slow</a><a href="{}/">fast</a>"#,
                slow.uri(),
                fast.uri()
            ),
        )
        .await;

        let mut config = test_config();
        config.discovery.page_timeout_secs = 60;
        config.discovery.probe_concurrency = 4;
        let crawler = Crawler::new(&config).unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(800)).await;
            trigger.cancel();
        });

        let found = tokio::time::timeout(
            Duration::from_secs(5),
            crawler.discover_from_feed(
                &cancel,
                &format!("{}/feed", home.uri()),
                &format!("{}/", home.uri()),
                &EventSender::disabled(),
            ),
        )
        .await
        .expect("cancellation should end discovery promptly")
        .unwrap();

        let urls: Vec<String> = found.iter().map(|b| b.feed_url.clone()).collect();
        assert_eq!(urls, vec![format!("{}/rss", fast.uri())]);
    }

    #[tokio::test]
    async fn test_equal_scores_keep_link_order_when_probes_finish_out_of_order() {
        let first = slow_site(Duration::from_millis(400)).await;
        let second = slow_site(Duration::ZERO).await;
        let home = html_site(
            "/",
            format!(
                r#"<a href="{}/">one</a><a href="{}/">two</a>"#,
                first.uri(),
                second.uri()
            ),
        )
        .await;

        let mut config = test_config();
        config.discovery.probe_concurrency = 4;
        let crawler = Crawler::new(&config).unwrap();

        let found = crawler
            .discover_from_feed(
                &CancellationToken::new(),
                &format!("{}/feed", home.uri()),
                &format!("{}/", home.uri()),
                &EventSender::disabled(),
            )
            .await
            .unwrap();

        let urls: Vec<String> = found.iter().map(|b| b.feed_url.clone()).collect();
        assert_eq!(
            urls,
            vec![format!("{}/rss", first.uri()), format!("{}/rss", second.uri())]
        );
    }
}
