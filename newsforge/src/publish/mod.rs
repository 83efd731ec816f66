//! Renderers turning the curated selection into newsletter, blog, site, audio and email.
//!
//! Renderers are pure: they return strings or bytes and leave writing to `artifacts`.
//! Every piece of article-provided text goes through `escape_html`.

pub mod audio;
pub mod blog;
pub mod email;
pub mod newsletter;
pub mod site;

use crate::models::{EnrichedArticle, SelectionResult};

pub const BRAND: &str = "Newsforge";

/// Number of articles in the newsletter and the email.
pub const TOP_COUNT: usize = 3;

pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Escaped URL usable in `href`/`src`, only for http(s) links.
pub fn safe_url(raw: &str) -> Option<String> {
    let parsed = url::Url::parse(raw.trim()).ok()?;
    match parsed.scheme() {
        "http" | "https" => Some(escape_html(parsed.as_str())),
        _ => None,
    }
}

/// First `TOP_COUNT` selected articles, in selection order.
pub fn top_articles<'a>(articles: &'a [EnrichedArticle], selection: &SelectionResult) -> Vec<&'a EnrichedArticle> {
    selection.pick(articles).into_iter().take(TOP_COUNT).collect()
}

/// `<img>` tag for the article image, or nothing.
fn image_tag(article: &EnrichedArticle, class: &str) -> String {
    article
        .article
        .image
        .as_deref()
        .and_then(safe_url)
        .map(|src| format!(r#"<img class="{}" src="{}" alt="" />"#, class, src))
        .unwrap_or_default()
}

/// `Source · date` line.
fn meta_line(article: &EnrichedArticle) -> String {
    let mut parts = vec![escape_html(&article.article.source)];
    if let Some(date) = article.article.published_at {
        parts.push(date.format("%Y-%m-%d").to_string());
    }
    parts.join(" · ")
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::models::{Audience, ContentType, EnrichedArticle, RawArticle};

    pub fn enriched(i: usize, topic: &str, score: u8) -> EnrichedArticle {
        EnrichedArticle {
            article: RawArticle {
                source: format!("Source {i}"),
                title: format!("Article {i}"),
                link: format!("https://news.example/{i}"),
                summary: Some(format!("Feed summary {i}.")),
                published_at: None,
                raw_content: None,
                image: None,
            },
            short_summary: format!("Short summary {i}."),
            detailed_summary: format!("Detailed summary {i}."),
            tags: vec!["tag".to_string()],
            content_type: ContentType::News,
            audience: Audience::Beginner,
            relevance_score: score,
            score_rationale: String::new(),
            topic: topic.to_string(),
        }
    }
}
