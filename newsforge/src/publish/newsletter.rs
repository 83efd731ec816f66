use chrono::{DateTime, Utc};

use super::{escape_html, image_tag, meta_line, safe_url, top_articles, BRAND};
use crate::models::{EnrichedArticle, SelectionResult};

/// HTML newsletter with the top three selected articles and a link to the blog.
pub fn render_newsletter(
    articles: &[EnrichedArticle],
    selection: &SelectionResult,
    blog_url: Option<&str>,
    generated_at: DateTime<Utc>,
) -> String {
    let cards: String = top_articles(articles, selection)
        .into_iter()
        .map(card)
        .collect();

    let cards = if cards.is_empty() {
        "<p class=\"empty\">No article was selected for this edition.</p>\n".to_string()
    } else {
        cards
    };

    let blog_link = blog_url
        .and_then(safe_url)
        .map(|href| format!(r#"<p class="cta"><a href="{}">Read the full digest on the blog</a></p>"#, href))
        .unwrap_or_default();

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<title>{brand} newsletter</title>
<style>
body {{ font-family: Arial, sans-serif; background: #f3f4f6; margin: 0; padding: 20px; }}
.wrap {{ max-width: 700px; margin: auto; background: #fff; padding: 24px; border-radius: 14px; }}
.card {{ margin-bottom: 24px; padding-bottom: 16px; border-bottom: 1px solid #e5e7eb; }}
.card img {{ width: 100%; border-radius: 10px; }}
.meta {{ color: #6b7280; font-size: 12px; }}
.cta a {{ background: #0f172a; color: #fff; padding: 10px 16px; border-radius: 8px; text-decoration: none; }}
</style>
</head>
<body>
<div class="wrap">
<h1>{brand}: top stories</h1>
<p class="meta">{date}</p>
{cards}{blog_link}
</div>
</body>
</html>
"#,
        brand = BRAND,
        date = generated_at.format("%Y-%m-%d"),
        cards = cards,
        blog_link = blog_link,
    )
}

fn card(article: &EnrichedArticle) -> String {
    let link = safe_url(article.link())
        .map(|href| format!(r#"<a href="{}">Read the article</a>"#, href))
        .unwrap_or_default();
    format!(
        "<div class=\"card\">\n{}<h2>{}</h2>\n<p class=\"meta\">{}</p>\n<p>{}</p>\n{}\n</div>\n",
        image_tag(article, "cover"),
        escape_html(article.title()),
        meta_line(article),
        escape_html(&article.short_summary),
        link
    )
}
