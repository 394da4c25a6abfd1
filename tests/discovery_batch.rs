//! Integration tests for batch discovery across several subscribed feeds.

use feedhaul::config::Config;
use feedhaul::discovery::{Crawler, DiscoveryEvent, DiscoveryService, EventSender};
use feedhaul::storage::{Database, NewFeed};
use pretty_assertions::assert_eq;
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const RSS: &str = r#"<?xml version="1.0"?><rss version="2.0"><channel><title>Conventional</title>
<item><link>https://y.example/1</link><title>Post</title></item></channel></rss>"#;

fn config() -> Config {
    let mut config = Config {
        allow_private_hosts: true,
        ..Config::default()
    };
    config.discovery.page_timeout_secs = 1;
    config
}

struct Fixture {
    db: Database,
    service: DiscoveryService,
    x: MockServer,
    y: MockServer,
    _homes: Vec<MockServer>,
}

async fn html(server: &MockServer, route: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(body)
                .insert_header("Content-Type", "text/html; charset=utf-8"),
        )
        .mount(server)
        .await;
}

/// Feeds A, B and C. A links to site X (autodiscovery), C links to site Y
/// (conventional `/rss.xml`), B's homepage never answers in time.
async fn fixture() -> Fixture {
    let x = MockServer::start().await;
    html(
        &x,
        "/",
        r#"<title>Site X</title><link rel="alternate" type="application/rss+xml" href="/index.xml">"#
            .to_string(),
    )
    .await;

    let y = MockServer::start().await;
    html(&y, "/", "<title>Site Y</title>".to_string()).await;
    Mock::given(method("GET"))
        .and(path("/rss.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(RSS))
        .mount(&y)
        .await;

    let a = MockServer::start().await;
    html(&a, "/", format!(r#"<a href="{}/">X</a>"#, x.uri())).await;

    let b = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<p>too late</p>")
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&b)
        .await;

    let c = MockServer::start().await;
    html(&c, "/", format!(r#"<a href="{}/">Y</a>"#, y.uri())).await;

    let db = Database::open(":memory:").await.unwrap();
    for (title, home) in [("Feed A", &a), ("Feed B", &b), ("Feed C", &c)] {
        db.add_feed(&NewFeed {
            url: format!("{}/feed.xml", home.uri()),
            title: title.to_string(),
            html_url: Some(format!("{}/", home.uri())),
            ..NewFeed::default()
        })
        .await
        .unwrap();
    }

    let config = config();
    let crawler = Crawler::new(&config).unwrap();
    let service = DiscoveryService::new(db.clone(), crawler, config.discovery.clone());

    Fixture {
        db,
        service,
        x,
        y,
        _homes: vec![a, b, c],
    }
}

fn drain(rx: &mut mpsc::Receiver<DiscoveryEvent>) -> Vec<DiscoveryEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_batch_survives_one_timed_out_homepage() {
    let fx = fixture().await;
    let (tx, mut rx) = mpsc::channel(256);

    let found = fx
        .service
        .discover_all(&CancellationToken::new(), &EventSender::new(tx))
        .await
        .unwrap();

    let feed_urls: Vec<String> = found.iter().map(|b| b.feed_url.clone()).collect();
    assert_eq!(
        feed_urls,
        vec![
            format!("{}/index.xml", fx.x.uri()),
            format!("{}/rss.xml", fx.y.uri()),
        ]
    );
    assert!(found.windows(2).all(|w| w[0].score >= w[1].score));

    let events = drain(&mut rx);
    let errors: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            DiscoveryEvent::Error { message } => Some(message.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("Feed B"), "{errors:?}");

    assert!(events.iter().any(|e| matches!(
        e,
        DiscoveryEvent::Progress { message } if message == "Processing feed 2/3: Feed B"
    )));
    assert_eq!(
        events.last(),
        Some(&DiscoveryEvent::Complete {
            feeds: found.clone()
        })
    );

    // Every feed was processed, including the one that failed
    let feeds = fx.db.list_feeds().await.unwrap();
    assert!(feeds.iter().all(|f| f.discovery_completed));

    // A second run has nothing left to do
    let again = fx
        .service
        .discover_all(&CancellationToken::new(), &EventSender::disabled())
        .await
        .unwrap();
    assert!(again.is_empty());
}

#[tokio::test]
async fn test_batch_never_returns_subscribed_feeds() {
    let fx = fixture().await;
    let feeds = fx.db.list_feeds().await.unwrap();
    let subscribed: HashSet<String> = [format!("{}/index.xml", fx.x.uri())].into();

    let found = fx
        .service
        .discover_all_feeds(
            &CancellationToken::new(),
            &feeds,
            &subscribed,
            &EventSender::disabled(),
        )
        .await;

    assert_eq!(found.len(), 1);
    assert_eq!(found[0].feed_url, format!("{}/rss.xml", fx.y.uri()));
    assert_eq!(found[0].name, "Site Y");
    assert!(found.iter().all(|b| !subscribed.contains(&b.feed_url)));
}

#[tokio::test]
async fn test_cancelled_batch_returns_without_marking() {
    let fx = fixture().await;
    let feeds = fx.db.list_feeds().await.unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let found = fx
        .service
        .discover_all_feeds(&cancel, &feeds, &HashSet::new(), &EventSender::disabled())
        .await;

    assert!(found.is_empty());
    let feeds = fx.db.list_feeds().await.unwrap();
    assert!(feeds.iter().all(|f| !f.discovery_completed));
}
