use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};

use super::{escape_html, image_tag, meta_line, safe_url, BRAND};
use crate::models::EnrichedArticle;

/// Curated articles sharing a topic label.
#[derive(Debug)]
pub struct TopicGroup<'a> {
    pub topic: String,
    pub articles: Vec<&'a EnrichedArticle>,
}

impl TopicGroup<'_> {
    pub fn best_score(&self) -> u8 {
        self.articles.iter().map(|a| a.relevance_score).max().unwrap_or(0)
    }
}

/// Group by topic (case-insensitive), groups ordered by their best score and articles
/// by score, both descending. Ties keep first-appearance order.
pub fn group_by_topic<'a>(curated: &[&'a EnrichedArticle]) -> Vec<TopicGroup<'a>> {
    let mut groups: Vec<TopicGroup<'a>> = Vec::new();
    for &article in curated {
        let key = article.topic.trim();
        match groups.iter_mut().find(|g| g.topic.eq_ignore_ascii_case(key)) {
            Some(group) => group.articles.push(article),
            None => groups.push(TopicGroup {
                topic: key.to_string(),
                articles: vec![article],
            }),
        }
    }
    for group in &mut groups {
        group.articles.sort_by(|a, b| b.relevance_score.cmp(&a.relevance_score));
    }
    groups.sort_by(|a, b| b.best_score().cmp(&a.best_score()));
    groups
}

/// Blog page over the whole curated set; embeds the MP3 capsule when given.
pub fn render_blog(curated: &[&EnrichedArticle], audio: Option<&[u8]>, generated_at: DateTime<Utc>) -> String {
    let audio_block = audio
        .filter(|bytes| !bytes.is_empty())
        .map(|bytes| {
            format!(
                "<section class=\"capsule\">\n<h2>Audio capsule</h2>\n<audio controls src=\"data:audio/mpeg;base64,{}\"></audio>\n</section>\n",
                STANDARD.encode(bytes)
            )
        })
        .unwrap_or_default();

    let sections: String = group_by_topic(curated)
        .iter()
        .map(|group| {
            let cards: String = group.articles.iter().map(|a| card(a)).collect();
            format!(
                "<section>\n<h2 class=\"section-title\">{}</h2>\n<div class=\"grid\">\n{}</div>\n</section>\n",
                escape_html(&group.topic),
                cards
            )
        })
        .collect();

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<title>{brand} blog</title>
<style>
body {{ font-family: -apple-system, 'Segoe UI', Roboto, sans-serif; background: #020617; color: #e5e7eb; margin: 0; }}
a {{ color: #93c5fd; }}
.container {{ max-width: 1120px; margin: 0 auto; padding: 32px 16px; }}
.section-title {{ font-size: 20px; margin: 32px 0 12px 0; }}
.grid {{ display: grid; grid-template-columns: repeat(auto-fill, minmax(260px, 1fr)); gap: 16px; }}
.card {{ border: 1px solid #1f2937; border-radius: 14px; padding: 12px; }}
.card img {{ width: 100%; max-height: 170px; object-fit: cover; border-radius: 10px; }}
.meta {{ font-size: 12px; color: #9ca3af; }}
.tags {{ font-size: 11px; color: #a5b4fc; }}
</style>
</head>
<body>
<div class="container">
<h1>{brand}</h1>
<p class="meta">{date}</p>
{audio}{sections}</div>
</body>
</html>
"#,
        brand = BRAND,
        date = generated_at.format("%Y-%m-%d"),
        audio = audio_block,
        sections = sections,
    )
}

fn card(article: &EnrichedArticle) -> String {
    let title = match safe_url(article.link()) {
        Some(href) => format!(r#"<a href="{}">{}</a>"#, href, escape_html(article.title())),
        None => escape_html(article.title()),
    };
    let tags = article
        .tags
        .iter()
        .map(|t| format!("#{}", escape_html(t)))
        .collect::<Vec<_>>()
        .join(" ");
    format!(
        "<div class=\"card\">\n{}<h3>{}</h3>\n<p class=\"meta\">{} · {} · {}</p>\n<p>{}</p>\n<p class=\"tags\">{}</p>\n</div>\n",
        image_tag(article, "thumb"),
        title,
        meta_line(article),
        article.content_type,
        article.audience,
        escape_html(&article.detailed_summary),
        tags
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publish::fixtures::enriched;

    #[test]
    fn groups_ordered_by_best_score() {
        let a = enriched(0, "Robotics", 40);
        let b = enriched(1, "LLM", 90);
        let c = enriched(2, "robotics", 70);
        let d = enriched(3, "LLM", 20);
        let curated = vec![&a, &b, &c, &d];

        let groups = group_by_topic(&curated);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].topic, "LLM");
        assert_eq!(groups[1].topic, "Robotics");
        let robotics: Vec<_> = groups[1].articles.iter().map(|a| a.relevance_score).collect();
        assert_eq!(robotics, vec![70, 40]);
    }

    #[test]
    fn audio_is_embedded_as_data_uri() {
        let a = enriched(0, "LLM", 50);
        let html = render_blog(&[&a], Some(&b"ID3fake"[..]), Utc::now());
        assert!(html.contains("data:audio/mpeg;base64,SUQzZmFrZQ=="));

        let without = render_blog(&[&a], None, Utc::now());
        assert!(!without.contains("<audio"));
        assert!(without.contains("Detailed summary 0."));
    }
}
