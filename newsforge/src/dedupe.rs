use std::cmp::Ordering;
use std::collections::HashSet;

use crate::models::RawArticle;

/// Keep the first article seen for every identity (link, or title when the link is empty).
/// Links are compared exactly, case included.
pub fn dedupe(articles: Vec<RawArticle>) -> Vec<RawArticle> {
    let mut seen: HashSet<String> = HashSet::new();
    articles
        .into_iter()
        .filter(|a| seen.insert(a.identity().to_string()))
        .collect()
}

/// Dedupe, order newest first (undated entries last, original order kept among equals)
/// and truncate to `limit`.
pub fn normalize(articles: Vec<RawArticle>, limit: usize) -> Vec<RawArticle> {
    let mut unique: Vec<RawArticle> = dedupe(articles)
        .into_iter()
        .map(|mut a| {
            a.title = a.title.trim().to_string();
            a.summary = a.summary.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
            a
        })
        .collect();

    unique.sort_by(|a, b| match (a.published_at, b.published_at) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
    unique.truncate(limit);
    unique
}

/// Plain text from a feed field that may carry HTML, whitespace collapsed.
pub fn html_to_text(input: &str) -> String {
    let text = if input.contains('<') {
        match html2text::from_read(input.as_bytes(), 10_000) {
            Ok(text) => text,
            Err(e) => {
                tracing::debug!("html2text failed, keeping raw text: {}", e);
                input.to_string()
            }
        }
    } else {
        input.to_string()
    };
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn article(link: &str, title: &str, day: Option<u32>) -> RawArticle {
        RawArticle {
            source: "test".into(),
            title: title.into(),
            link: link.into(),
            summary: None,
            published_at: day.map(|d| Utc.with_ymd_and_hms(2024, 5, d, 12, 0, 0).unwrap()),
            raw_content: None,
            image: None,
        }
    }

    #[test]
    fn one_survivor_per_link() {
        let input = vec![
            article("https://a.example/1", "first", Some(1)),
            article("https://a.example/2", "second", Some(2)),
            article("https://a.example/1", "first again", Some(3)),
            article("https://A.example/1", "different case", Some(4)),
        ];
        let out = dedupe(input);
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].title, "first");
        assert!(out.iter().any(|a| a.title == "different case"));
    }

    #[test]
    fn empty_links_dedupe_by_title() {
        let input = vec![
            article("", "Same title", None),
            article("", "Same title", None),
            article("", "Other title", None),
        ];
        assert_eq!(dedupe(input).len(), 2);
    }

    #[test]
    fn newest_first_with_undated_last() {
        let input = vec![
            article("u1", "undated one", None),
            article("d1", "day 1", Some(1)),
            article("u2", "undated two", None),
            article("d9", "day 9", Some(9)),
            article("d5", "day 5", Some(5)),
        ];
        let out = normalize(input, 10);
        let titles: Vec<_> = out.iter().map(|a| a.title.as_str()).collect();
        assert_eq!(titles, ["day 9", "day 5", "day 1", "undated one", "undated two"]);
    }

    #[test]
    fn normalize_truncates_and_is_idempotent() {
        let input: Vec<_> = (1..=8)
            .map(|d| article(&format!("https://x.example/{d}"), &format!(" t{d} "), Some(d)))
            .collect();
        let once = normalize(input.clone(), 5);
        assert_eq!(once.len(), 5);
        assert_eq!(once[0].title, "t8");
        let twice = normalize(once.clone(), 5);
        assert_eq!(once, twice);
    }

    #[test]
    fn html_is_flattened() {
        let text = html_to_text("<p>Hello <b>world</b></p>\n\n<p>again</p>");
        assert!(text.contains("Hello"));
        assert!(text.contains("world"));
        assert!(!text.contains('<'));
        assert_eq!(html_to_text("  plain \n text "), "plain text");
    }
}
