//! Static multi-page site: index, one page per selected article, one page per topic.

use chrono::{DateTime, Utc};

use super::blog::{group_by_topic, TopicGroup};
use super::{escape_html, image_tag, meta_line, safe_url, BRAND};
use crate::models::{EnrichedArticle, SelectionResult};

/// One file of the generated site, `path` relative to the site directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SitePage {
    pub path: String,
    pub content: String,
}

const STYLES: &str = "body { font-family: Arial, sans-serif; background: #f5f7fa; margin: 0; }
.navbar { background: #111827; color: #f3f4f6; padding: 15px 25px; display: flex; justify-content: space-between; flex-wrap: wrap; }
.navbar .logo { font-size: 20px; color: #f3f4f6; text-decoration: none; }
.nav-links a { color: #9ca3af; margin-left: 20px; text-decoration: none; }
.content { padding: 25px; max-width: 960px; margin: 0 auto; background: #fff; }
.footer { text-align: center; padding: 15px; margin-top: 30px; background: #e5e7eb; }
.article-grid { display: grid; grid-template-columns: repeat(auto-fit, minmax(240px, 1fr)); gap: 15px; }
.card { border: 1px solid #e5e7eb; border-radius: 8px; padding: 10px; }
.card img, .cover { max-width: 100%; border-radius: 6px; }
.meta { color: #6b7280; }
";

/// Lowercase ASCII slug; never empty.
pub fn slug(text: &str) -> String {
    let mut out = String::new();
    for c in text.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    let trimmed = out.trim_matches('-');
    if trimmed.is_empty() {
        "topic".to_string()
    } else {
        trimmed.to_string()
    }
}

fn article_page_name(index: usize) -> String {
    format!("article_{}.html", index)
}

/// Page name per topic group; a repeated slug gets a numeric suffix.
fn topic_page_names(groups: &[TopicGroup<'_>]) -> Vec<String> {
    let mut seen: Vec<String> = Vec::with_capacity(groups.len());
    let mut names = Vec::with_capacity(groups.len());
    for group in groups {
        let base = slug(&group.topic);
        let mut candidate = base.clone();
        let mut n = 2;
        while seen.contains(&candidate) {
            candidate = format!("{}-{}", base, n);
            n += 1;
        }
        names.push(format!("topic_{}.html", candidate));
        seen.push(candidate);
    }
    names
}

fn layout(title: &str, menu: &str, content: &str, generated_at: DateTime<Utc>) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<title>{title}</title>
<link rel="stylesheet" href="styles.css">
</head>
<body>
<div class="navbar">
<a href="index.html" class="logo">{brand}</a>
<div class="nav-links">{menu}</div>
</div>
<div class="content">
{content}
</div>
<div class="footer">Generated {date}</div>
</body>
</html>
"#,
        title = escape_html(title),
        brand = BRAND,
        menu = menu,
        content = content,
        date = generated_at.format("%Y-%m-%d %H:%M UTC"),
    )
}

fn card(index: usize, article: &EnrichedArticle) -> String {
    format!(
        "<a href=\"{}\"><div class=\"card\">\n{}<h3>{}</h3>\n<p class=\"meta\">{} · {}</p>\n<p>{}</p>\n</div></a>\n",
        article_page_name(index),
        image_tag(article, "thumb"),
        escape_html(article.title()),
        escape_html(&article.topic),
        escape_html(&article.article.source),
        escape_html(&article.short_summary)
    )
}

/// Every page of the site, `styles.css` first.
pub fn build_site(
    articles: &[EnrichedArticle],
    selection: &SelectionResult,
    generated_at: DateTime<Utc>,
) -> Vec<SitePage> {
    let selected: Vec<(usize, &EnrichedArticle)> = selection
        .selected_indices
        .iter()
        .filter_map(|&i| articles.get(i).map(|a| (i, a)))
        .collect();

    let curated: Vec<&EnrichedArticle> = selected.iter().map(|(_, a)| *a).collect();
    let groups = group_by_topic(&curated);
    let topic_pages = topic_page_names(&groups);
    let topic_page_of = |article: &EnrichedArticle| {
        groups
            .iter()
            .position(|g| g.topic.eq_ignore_ascii_case(article.topic.trim()))
            .and_then(|i| topic_pages.get(i))
            .map(String::as_str)
            .unwrap_or("index.html")
    };

    let menu: String = groups
        .iter()
        .zip(&topic_pages)
        .map(|(g, page)| format!(r#"<a href="{}">{}</a>"#, page, escape_html(&g.topic)))
        .collect();

    let index_of = |article: &EnrichedArticle| {
        selected
            .iter()
            .find(|(_, a)| std::ptr::eq(*a, article))
            .map(|(i, _)| *i)
            .unwrap_or_default()
    };

    let mut pages = vec![SitePage {
        path: "styles.css".to_string(),
        content: STYLES.to_string(),
    }];

    let cards: String = selected.iter().map(|(i, a)| card(*i, a)).collect();
    pages.push(SitePage {
        path: "index.html".to_string(),
        content: layout(
            BRAND,
            &menu,
            &format!("<h1>Latest selection</h1>\n<div class=\"article-grid\">\n{}</div>", cards),
            generated_at,
        ),
    });

    for (i, article) in &selected {
        let link = safe_url(article.link())
            .map(|href| format!(r#"<p><a href="{}" target="_blank">Read the original article</a></p>"#, href))
            .unwrap_or_default();
        let tags = article.tags.iter().map(|t| escape_html(t)).collect::<Vec<_>>().join(", ");
        let body = format!(
            "<h1>{}</h1>\n<p class=\"meta\">{} · <a href=\"{}\">{}</a> · {} · {}</p>\n{}\n<p>{}</p>\n<p class=\"meta\">{}</p>\n{}",
            escape_html(article.title()),
            meta_line(article),
            topic_page_of(article),
            escape_html(&article.topic),
            article.content_type,
            article.audience,
            image_tag(article, "cover"),
            escape_html(&article.detailed_summary),
            tags,
            link
        );
        pages.push(SitePage {
            path: article_page_name(*i),
            content: layout(article.title(), &menu, &body, generated_at),
        });
    }

    for (group, page) in groups.iter().zip(&topic_pages) {
        let cards: String = group.articles.iter().map(|a| card(index_of(a), a)).collect();
        let body = format!(
            "<h2>Topic: {}</h2>\n<div class=\"article-grid\">\n{}</div>",
            escape_html(&group.topic),
            cards
        );
        pages.push(SitePage {
            path: page.clone(),
            content: layout(&group.topic, &menu, &body, generated_at),
        });
    }

    pages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publish::fixtures::enriched;

    #[test]
    fn slugs() {
        assert_eq!(slug("Chips & Hardware"), "chips-hardware");
        assert_eq!(slug("  LLM  "), "llm");
        assert_eq!(slug("???"), "topic");
    }

    #[test]
    fn pages_for_articles_and_topics() {
        let articles = vec![
            enriched(0, "LLM", 80),
            enriched(1, "Robotics", 60),
            enriched(2, "LLM", 95),
            enriched(3, "Unselected", 99),
        ];
        let selection = SelectionResult {
            selected_indices: vec![2, 0, 1],
            featured_index: Some(2),
        };
        let pages = build_site(&articles, &selection, Utc::now());
        let paths: Vec<_> = pages.iter().map(|p| p.path.as_str()).collect();

        assert_eq!(paths[0], "styles.css");
        assert!(paths.contains(&"index.html"));
        assert!(paths.contains(&"article_0.html"));
        assert!(paths.contains(&"article_1.html"));
        assert!(paths.contains(&"article_2.html"));
        assert!(!paths.contains(&"article_3.html"));
        assert!(paths.contains(&"topic_llm.html"));
        assert!(paths.contains(&"topic_robotics.html"));
        assert_eq!(pages.len(), 1 + 1 + 3 + 2);

        let topic_llm = pages.iter().find(|p| p.path == "topic_llm.html").unwrap();
        assert!(topic_llm.content.contains("article_2.html"));
        assert!(topic_llm.content.contains("article_0.html"));
        assert!(!topic_llm.content.contains("article_1.html\""));

        let index = pages.iter().find(|p| p.path == "index.html").unwrap();
        assert!(index.content.contains(r#"href="topic_robotics.html""#));
    }

    #[test]
    fn topics_sharing_a_slug_get_distinct_pages() {
        let articles = vec![enriched(0, "C++", 90), enriched(1, "C#", 80), enriched(2, "C", 70)];
        let selection = SelectionResult {
            selected_indices: vec![0, 1, 2],
            featured_index: Some(0),
        };
        let pages = build_site(&articles, &selection, Utc::now());
        let topic_pages: Vec<_> = pages
            .iter()
            .filter(|p| p.path.starts_with("topic_"))
            .map(|p| p.path.as_str())
            .collect();
        assert_eq!(topic_pages, ["topic_c.html", "topic_c-2.html", "topic_c-3.html"]);

        let sharp = pages.iter().find(|p| p.path == "topic_c-2.html").unwrap();
        assert!(sharp.content.contains("Topic: C#"));
        let article = pages.iter().find(|p| p.path == "article_1.html").unwrap();
        assert!(article.content.contains(r#"href="topic_c-2.html""#));
    }
}
