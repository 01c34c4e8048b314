use crate::client::PageClient;
use crate::error::FetchError;
use crate::types::{ContentFormat, RawContent};

/// Reads social feeds.
///
/// RSS/Atom bodies are parsed and re-emitted as a small HTML document holding
/// the newest `max_posts` entries. Anything else is passed through as a page.
#[derive(Clone)]
pub struct SocialAdapter {
    client: PageClient,
    max_posts: usize,
}

impl SocialAdapter {
    #[must_use]
    pub fn new(client: PageClient, max_posts: usize) -> Self {
        Self { client, max_posts }
    }

    /// # Errors
    ///
    /// Propagates [`FetchError`] from the underlying request. A body that
    /// looks like a feed but fails to parse is returned unparsed.
    pub async fn fetch(&self, url: &str) -> Result<RawContent, FetchError> {
        let raw = self.client.get_page(url, None).await?;
        if !looks_like_feed(&raw.body) {
            return Ok(raw);
        }

        match feed_rs::parser::parse(raw.body.as_bytes()) {
            Ok(feed) => Ok(RawContent {
                body: render_feed(&feed, self.max_posts),
                format: ContentFormat::Html,
                ..raw
            }),
            Err(e) => {
                tracing::warn!(url, error = %e, "feed parse failed, treating body as a page");
                Ok(raw)
            }
        }
    }
}

fn looks_like_feed(body: &str) -> bool {
    let head: String = body.chars().take(512).collect::<String>().to_lowercase();
    head.contains("<rss") || head.contains("<feed") || head.contains("<rdf:rdf")
}

fn escape_text(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// Newest entries first, ties kept in feed order.
fn render_feed(feed: &feed_rs::model::Feed, max_posts: usize) -> String {
    let mut entries: Vec<&feed_rs::model::Entry> = feed.entries.iter().collect();
    entries.sort_by(|a, b| {
        let a_at = a.published.or(a.updated);
        let b_at = b.published.or(b.updated);
        b_at.cmp(&a_at)
    });

    let mut out = String::new();
    if let Some(title) = &feed.title {
        out.push_str(&format!("<h1>{}</h1>\n", escape_text(&title.content)));
    }
    for entry in entries.into_iter().take(max_posts) {
        out.push_str("<article>");
        if let Some(title) = &entry.title {
            out.push_str(&format!("<h2>{}</h2>", escape_text(&title.content)));
        }
        let body = entry
            .summary
            .as_ref()
            .map(|s| s.content.clone())
            .or_else(|| entry.content.as_ref().and_then(|c| c.body.clone()));
        if let Some(body) = body {
            out.push_str(&format!("<div>{body}</div>"));
        }
        out.push_str("</article>\n");
    }
    out
}
