//! HTML inspection for discovery: page titles, feed autodiscovery links and
//! outbound anchors.
//!
//! Parsing happens in synchronous functions that return owned data, so no
//! `scraper::Html` is ever held across an await point.

use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use std::sync::LazyLock;
use url::Url;

use crate::util::clean_display_name;

const MAX_NAME_CHARS: usize = 200;

static ANCHORS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("static selector"));
static LINK_TAGS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("link[href]").expect("static selector"));
static TITLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("title").expect("static selector"));

/// Hosts that never lead to a personal blog feed.
const PLATFORM_HOSTS: &[&str] = &[
    "github.com",
    "gitlab.com",
    "gitee.com",
    "twitter.com",
    "x.com",
    "facebook.com",
    "instagram.com",
    "linkedin.com",
    "youtube.com",
    "youtu.be",
    "reddit.com",
    "weibo.com",
    "zhihu.com",
    "bilibili.com",
    "douban.com",
    "t.me",
    "telegram.org",
    "discord.gg",
    "discord.com",
    "google.com",
    "apple.com",
    "microsoft.com",
    "wikipedia.org",
    "creativecommons.org",
    "beian.miit.gov.cn",
    "wordpress.org",
    "hexo.io",
    "gohugo.io",
    "jekyllrb.com",
    "vercel.com",
    "netlify.com",
    "cloudflare.com",
];

const ASSET_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "webp", "svg", "ico", "bmp", "avif", "css", "js", "mjs", "json",
    "pdf", "zip", "gz", "tgz", "tar", "rar", "7z", "mp3", "mp4", "webm", "avi", "mov", "wav", "ogg",
    "flac", "exe", "dmg", "apk", "iso", "woff", "woff2", "ttf", "eot",
];

/// Anchor text fragments that mark a blogroll or friend-links page.
const BLOGROLL_TEXT: &[&str] = &[
    "friend", "blogroll", "links", "友链", "友情链接", "朋友", "邻居",
];

/// Path segments that mark a friend-links page.
const BLOGROLL_PATHS: &[&str] = &["friends", "friend", "links", "link", "blogroll", "flinks", "youlian"];

/// XFN relationship values that mark a link to someone else's site.
const XFN_RELS: &[&str] = &["friend", "acquaintance", "contact", "met", "co-worker", "colleague"];

#[derive(Debug, Clone, PartialEq)]
pub struct Anchor {
    pub url: Url,
    pub text: String,
    /// `rel` carried an XFN relationship value
    pub xfn: bool,
}

/// Everything discovery needs from one HTML page.
#[derive(Debug, Clone, Default)]
pub struct PageSummary {
    pub title: Option<String>,
    /// First `<link rel="alternate">` pointing at an RSS or Atom feed
    pub feed_link: Option<Url>,
    pub anchors: Vec<Anchor>,
}

/// A linked site worth probing for a feed.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub url: Url,
    pub text: Option<String>,
    /// Found on a friend-links page, via an XFN rel, or under blogroll-like anchor text
    pub blogroll_hint: bool,
}

pub fn summarize_page(html: &str, page_url: &Url) -> PageSummary {
    let document = Html::parse_document(html);

    let title = document
        .select(&TITLE)
        .next()
        .map(|t| clean_display_name(&t.text().collect::<String>(), MAX_NAME_CHARS))
        .filter(|t| !t.is_empty());

    let feed_link = document
        .select(&LINK_TAGS)
        .find(|link| is_feed_autodiscovery(*link))
        .and_then(|link| link.value().attr("href"))
        .and_then(|href| resolve_http(href, page_url));

    let anchors = document
        .select(&ANCHORS)
        .filter_map(|a| {
            let url = resolve_http(a.value().attr("href")?, page_url)?;
            let text = clean_display_name(&a.text().collect::<String>(), MAX_NAME_CHARS);
            let xfn = a
                .value()
                .attr("rel")
                .is_some_and(|rel| has_token(rel, XFN_RELS));
            Some(Anchor { url, text, xfn })
        })
        .collect();

    PageSummary {
        title,
        feed_link,
        anchors,
    }
}

fn is_feed_autodiscovery(link: ElementRef<'_>) -> bool {
    let el = link.value();
    let is_alternate = el.attr("rel").is_some_and(|rel| has_token(rel, &["alternate"]));
    let is_feed = el.attr("type").is_some_and(|t| {
        let t = t.to_ascii_lowercase();
        t.contains("rss+xml") || t.contains("atom+xml")
    });
    is_alternate && is_feed
}

fn has_token(attr: &str, tokens: &[&str]) -> bool {
    attr.split_ascii_whitespace()
        .any(|value| tokens.iter().any(|t| value.eq_ignore_ascii_case(t)))
}

/// Resolve `href` against the page, keeping only http(s) URLs without fragments.
fn resolve_http(href: &str, page_url: &Url) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }
    let mut url = page_url.join(href).ok()?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return None;
    }
    url.set_fragment(None);
    Some(url)
}

fn site_host(url: &Url) -> Option<&str> {
    url.host_str().map(|h| h.strip_prefix("www.").unwrap_or(h))
}

/// Same host (ignoring a `www.` prefix) and same effective port.
pub fn same_site(a: &Url, b: &Url) -> bool {
    site_host(a) == site_host(b) && a.port_or_known_default() == b.port_or_known_default()
}

fn is_platform_host(url: &Url) -> bool {
    let Some(host) = url.host_str() else {
        return true;
    };
    PLATFORM_HOSTS.iter().any(|platform| {
        host == *platform
            || host
                .strip_suffix(platform)
                .is_some_and(|prefix| prefix.ends_with('.'))
    })
}

fn is_asset(url: &Url) -> bool {
    let last = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .unwrap_or("");
    last.rsplit_once('.').is_some_and(|(_, ext)| {
        ASSET_EXTENSIONS
            .iter()
            .any(|asset| ext.eq_ignore_ascii_case(asset))
    })
}

/// Dedup identity of a linked site: host plus path without trailing slash.
fn dedup_key(url: &Url) -> String {
    format!(
        "{}:{}{}",
        site_host(url).unwrap_or(""),
        url.port_or_known_default().unwrap_or(0),
        url.path().trim_end_matches('/')
    )
}

fn text_has_blogroll_keyword(text: &str) -> bool {
    let lower = text.to_lowercase();
    BLOGROLL_TEXT.iter().any(|k| lower.contains(k))
}

/// Outbound anchors worth probing, in page order.
///
/// Same-site links, assets and platform hosts are dropped; `seen` carries
/// dedup state across pages of the same site.
pub fn candidate_links(
    anchors: &[Anchor],
    site: &Url,
    from_friend_page: bool,
    seen: &mut HashSet<String>,
) -> Vec<Candidate> {
    anchors
        .iter()
        .filter(|a| !same_site(&a.url, site) && !is_asset(&a.url) && !is_platform_host(&a.url))
        .filter(|a| seen.insert(dedup_key(&a.url)))
        .map(|a| Candidate {
            url: a.url.clone(),
            text: Some(a.text.clone()).filter(|t| !t.is_empty()),
            blogroll_hint: from_friend_page || a.xfn || text_has_blogroll_keyword(&a.text),
        })
        .collect()
}

/// A same-site page that looks like a friend-links / blogroll page.
pub fn find_friend_page(anchors: &[Anchor], site: &Url) -> Option<Url> {
    anchors
        .iter()
        .filter(|a| same_site(&a.url, site) && a.url.path() != site.path())
        .find(|a| {
            text_has_blogroll_keyword(&a.text)
                || a.url.path_segments().is_some_and(|mut segments| {
                    segments.any(|segment| {
                        let segment = segment.to_ascii_lowercase();
                        let stem = segment
                            .strip_suffix(".html")
                            .or_else(|| segment.strip_suffix(".htm"))
                            .unwrap_or(segment.as_str());
                        BLOGROLL_PATHS.contains(&stem)
                    })
                })
        })
        .map(|a| a.url.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn base() -> Url {
        Url::parse("https://me.example/").unwrap()
    }

    #[test]
    fn test_finds_autodiscovery_link() {
        let html = r#"<html><head>
<title> My   Blog </title>
<link rel="stylesheet" href="/style.css">
<link rel="alternate" type="application/rss+xml" href="/feed.xml">
</head></html>"#;
        let summary = summarize_page(html, &base());
        assert_eq!(summary.title.as_deref(), Some("My Blog"));
        assert_eq!(
            summary.feed_link.map(String::from).as_deref(),
            Some("https://me.example/feed.xml")
        );
    }

    #[test]
    fn test_autodiscovery_attribute_order_and_case() {
        let html = r#"<link href='//cdn.example/atom' TYPE="Application/Atom+XML" rel="ALTERNATE home">"#;
        let summary = summarize_page(html, &base());
        assert_eq!(
            summary.feed_link.map(String::from).as_deref(),
            Some("https://cdn.example/atom")
        );
    }

    #[test]
    fn test_ignores_non_feed_alternate() {
        let html = r#"<link rel="alternate" hreflang="de" href="/de/">"#;
        assert!(summarize_page(html, &base()).feed_link.is_none());
    }

    #[test]
    fn test_candidate_filtering() {
        let html = r##"<body>
<a href="/about">About</a>
<a href="https://www.me.example/post">Self via www</a>
<a href="#top">Top</a>
<a href="mailto:me@me.example">Mail</a>
<a href="https://friend.example/#intro">Alice</a>
<a href="https://friend.example/">Friend again</a>
<a href="https://github.com/me">Code</a>
<a href="https://gist.github.com/me">Gists</a>
<a href="https://cdn.example/photo.JPG">Photo</a>
<a href="https://other.example/blog" rel="friend met">Other</a>
<a href="http://me.example:8080/">Different port</a>
</body>"##;
        let summary = summarize_page(html, &base());
        let mut seen = HashSet::new();
        let candidates = candidate_links(&summary.anchors, &base(), false, &mut seen);

        let urls: Vec<&str> = candidates.iter().map(|c| c.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://friend.example/",
                "https://other.example/blog",
                "http://me.example:8080/",
            ]
        );
        assert_eq!(candidates[0].text.as_deref(), Some("Alice"));
        assert!(!candidates[0].blogroll_hint);
        assert!(candidates[1].blogroll_hint);
    }

    #[test]
    fn test_seen_set_dedups_across_pages() {
        let page = summarize_page(r#"<a href="https://a.example/">A</a>"#, &base());
        let mut seen = HashSet::new();
        assert_eq!(candidate_links(&page.anchors, &base(), false, &mut seen).len(), 1);
        assert!(candidate_links(&page.anchors, &base(), true, &mut seen).is_empty());
    }

    #[test]
    fn test_friend_page_by_text_and_path() {
        let by_text = summarize_page(r#"<a href="/p/42">友情链接</a>"#, &base());
        assert_eq!(
            find_friend_page(&by_text.anchors, &base()).map(String::from).as_deref(),
            Some("https://me.example/p/42")
        );

        let by_path = summarize_page(r#"<a href="/links.html">Elsewhere</a>"#, &base());
        assert_eq!(
            find_friend_page(&by_path.anchors, &base()).map(String::from).as_deref(),
            Some("https://me.example/links.html")
        );

        let external = summarize_page(r#"<a href="https://x.example/friends">Friends</a>"#, &base());
        assert!(find_friend_page(&external.anchors, &base()).is_none());
    }

    #[test]
    fn test_platform_host_matching_is_suffix_aware() {
        let hit = Url::parse("https://docs.github.com/").unwrap();
        let miss = Url::parse("https://notgithub.com/").unwrap();
        assert!(is_platform_host(&hit));
        assert!(!is_platform_host(&miss));
    }
}
