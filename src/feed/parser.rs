use feed_rs::model::{Entry, Link};
use feed_rs::parser;
use sha2::{Digest, Sha256};
use url::Url;

use crate::storage::ParsedArticle;
use crate::util::strip_control_chars;

/// Channel metadata plus normalized items of one feed document.
#[derive(Debug, Clone, Default)]
pub struct ParsedFeed {
    pub title: Option<String>,
    /// Site link declared by the channel, if any
    pub site_url: Option<String>,
    pub articles: Vec<ParsedArticle>,
}

/// Parse an RSS/Atom/JSON Feed document.
///
/// Relative links are resolved against `feed_url`. A blank body is an empty
/// feed, not an error.
pub fn parse_feed(bytes: &[u8], feed_url: &str) -> Result<ParsedFeed, parser::ParseFeedError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(ParsedFeed::default());
    }

    let feed = parser::parse(bytes)?;
    let base = Url::parse(feed_url).ok();

    let title = feed
        .title
        .map(|t| strip_control_chars(t.content.trim()).into_owned())
        .filter(|t| !t.is_empty());
    let site_url = pick_link(&feed.links, base.as_ref()).filter(|link| link != feed_url);

    let articles = feed
        .entries
        .into_iter()
        .map(|entry| normalize_entry(entry, base.as_ref()))
        .collect();

    Ok(ParsedFeed {
        title,
        site_url,
        articles,
    })
}

fn normalize_entry(entry: Entry, base: Option<&Url>) -> ParsedArticle {
    let url = pick_link(&entry.links, base);
    let published = entry.published.or(entry.updated).map(|dt| dt.timestamp());
    let content = entry
        .content
        .and_then(|c| c.body)
        .or_else(|| entry.summary.map(|s| s.content))
        .filter(|c| !c.trim().is_empty());
    let title = entry
        .title
        .map(|t| strip_control_chars(t.content.trim()).into_owned())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "Untitled".to_string());
    let author = entry
        .authors
        .into_iter()
        .map(|p| p.name.trim().to_string())
        .find(|name| !name.is_empty());

    let existing_id = Some(entry.id.trim()).filter(|id| !id.is_empty());
    let key = dedup_key(url.as_deref(), existing_id, &title, published);

    ParsedArticle {
        key,
        title,
        url,
        content,
        author,
        published,
    }
}

/// The `alternate` (or untyped) link, falling back to the first one.
fn pick_link(links: &[Link], base: Option<&Url>) -> Option<String> {
    let chosen = links
        .iter()
        .find(|l| l.rel.as_deref().map_or(true, |rel| rel == "alternate"))
        .or_else(|| links.first())?;

    let href = chosen.href.trim();
    if href.is_empty() {
        return None;
    }
    match base {
        Some(base) => base.join(href).ok().map(String::from),
        None => Some(href.to_string()),
    }
}

/// Item link first, then the item id, then a hash of title and publish time.
fn dedup_key(url: Option<&str>, existing_id: Option<&str>, title: &str, published: Option<i64>) -> String {
    if let Some(url) = url {
        return url.to_string();
    }
    if let Some(id) = existing_id {
        return id.to_string();
    }

    let input = format!(
        "{}|{}",
        title,
        published.map(|p| p.to_string()).unwrap_or_default()
    );
    format!("{:x}", Sha256::digest(input.as_bytes()))
}
