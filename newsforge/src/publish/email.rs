//! Email edition: top stories with a short intro, sent one recipient at a time.

use anyhow::{Context, Result};
use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::{info, warn};

use common::{secret_from_env, EmailConfig};

use super::{escape_html, safe_url, BRAND};
use crate::error::PipelineError;
use crate::llm::fallback::generate_or_else;
use crate::llm::{LlmProvider, LlmRequest};
use crate::models::EnrichedArticle;
use crate::retry::RetryPolicy;

/// Rendered email, identical for every recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailDraft {
    pub subject: String,
    pub intro: String,
    pub html: String,
    pub text: String,
}

/// One outgoing email.
#[derive(Debug, Clone, Serialize)]
pub struct EmailMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: String,
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<(), PipelineError>;

    /// Transport name, for logs
    fn name(&self) -> &str;

    fn sender(&self) -> &str;
}

/// Transactional email over a JSON REST API (Resend-style payload).
pub struct RestMailer {
    client: Client,
    url: String,
    api_key: String,
    from: String,
    retry: RetryPolicy,
}

#[derive(Serialize)]
struct RestPayload<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
    text: &'a str,
}

impl RestMailer {
    pub fn new(
        url: impl Into<String>,
        api_key: impl Into<String>,
        from: impl Into<String>,
        timeout_secs: u64,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build reqwest client")?;
        Ok(Self {
            client,
            url: url.into(),
            api_key: api_key.into(),
            from: from.into(),
            retry: RetryPolicy::model_calls(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn post(&self, message: &EmailMessage) -> std::result::Result<(), PostFailure> {
        let payload = RestPayload {
            from: &message.from,
            to: [&message.to],
            subject: &message.subject,
            html: &message.html,
            text: &message.text,
        };
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| PostFailure::Transient(format!("email API request failed: {}", e)))?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        let reason = format!("email API error ({}): {}", status, body);
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            Err(PostFailure::Transient(reason))
        } else {
            Err(PostFailure::Rejected(reason))
        }
    }
}

/// Network errors, 5xx and 429 are worth another attempt; other statuses are final.
#[derive(Debug)]
enum PostFailure {
    Transient(String),
    Rejected(String),
}

impl PostFailure {
    fn is_transient(&self) -> bool {
        matches!(self, PostFailure::Transient(_))
    }
}

impl fmt::Display for PostFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PostFailure::Transient(msg) | PostFailure::Rejected(msg) => f.write_str(msg),
        }
    }
}

#[async_trait]
impl MailTransport for RestMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), PipelineError> {
        self.retry
            .run_when("email", PostFailure::is_transient, |_| self.post(message))
            .await
            .map_err(|e| PipelineError::Delivery {
                recipient: message.to.clone(),
                reason: e.last.to_string(),
            })
    }

    fn name(&self) -> &str {
        "rest"
    }

    fn sender(&self) -> &str {
        &self.from
    }
}

/// SMTP with STARTTLS through `lettre`.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
}

impl SmtpMailer {
    pub fn new(
        host: &str,
        port: u16,
        credentials: Option<(String, String)>,
        from: impl Into<String>,
        timeout_secs: u64,
    ) -> Result<Self> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
            .with_context(|| format!("invalid SMTP relay {}", host))?
            .port(port)
            .timeout(Some(Duration::from_secs(timeout_secs)));
        if let Some((user, password)) = credentials {
            builder = builder.credentials(Credentials::new(user, password));
        }
        Ok(Self {
            transport: builder.build(),
            from: from.into(),
        })
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), PipelineError> {
        let invalid = |what: &str, value: &str| PipelineError::Validation(format!("invalid {} address '{}'", what, value));
        let from: Mailbox = message.from.parse().map_err(|_| invalid("sender", &message.from))?;
        let to: Mailbox = message.to.parse().map_err(|_| invalid("recipient", &message.to))?;

        let email = Message::builder()
            .from(from)
            .to(to)
            .subject(message.subject.clone())
            .multipart(MultiPart::alternative_plain_html(message.text.clone(), message.html.clone()))
            .map_err(|e| PipelineError::Validation(e.to_string()))?;

        self.transport
            .send(email)
            .await
            .map(|_| ())
            .map_err(|e| PipelineError::Delivery {
                recipient: message.to.clone(),
                reason: e.to_string(),
            })
    }

    fn name(&self) -> &str {
        "smtp"
    }

    fn sender(&self) -> &str {
        &self.from
    }
}

/// Build the configured transport. `Ok(None)` when its credentials are missing.
pub fn transport_from_config(cfg: &EmailConfig) -> Result<Option<Box<dyn MailTransport>>> {
    let timeout = cfg.timeout_seconds.unwrap_or(30);
    match cfg.transport.as_deref().unwrap_or("rest") {
        "rest" => {
            let Some(api_key) = secret_from_env(cfg.api_key_env.as_deref()) else {
                info!("Email disabled: no API key configured for the REST transport");
                return Ok(None);
            };
            let url = cfg
                .rest_url
                .clone()
                .context("REST email transport selected but rest_url is missing")?;
            Ok(Some(Box::new(RestMailer::new(url, api_key, cfg.from.clone(), timeout)?)))
        }
        "smtp" => {
            let Some(host) = cfg.smtp_host.as_deref() else {
                info!("Email disabled: no SMTP host configured");
                return Ok(None);
            };
            let credentials = secret_from_env(cfg.smtp_username_env.as_deref())
                .zip(secret_from_env(cfg.smtp_password_env.as_deref()));
            let mailer = SmtpMailer::new(host, cfg.smtp_port.unwrap_or(587), credentials, cfg.from.clone(), timeout)?;
            Ok(Some(Box::new(mailer)))
        }
        other => anyhow::bail!("Unknown email transport: {}", other),
    }
}

pub fn fallback_intro(count: usize) -> String {
    match count {
        0 => "Nothing stood out this time, see you in the next edition.".to_string(),
        1 => "Here is the story worth your time in this edition.".to_string(),
        n => format!("Here are the {} stories worth your time in this edition.", n),
    }
}

/// Two or three sentence intro for the email, with a fixed fallback.
pub async fn write_intro(
    provider: Option<&dyn LlmProvider>,
    retry: &RetryPolicy,
    top: &[&EnrichedArticle],
) -> String {
    let headlines = top
        .iter()
        .map(|a| format!("- {} ({})", a.title(), a.topic))
        .collect::<Vec<_>>()
        .join("\n");
    let request = LlmRequest::new(format!(
        "Write a friendly two or three sentence introduction for a newsletter email \
         presenting these stories. Plain text only.\n{}",
        headlines
    ))
    .max_tokens(200)
    .temperature(0.6);
    generate_or_else(provider, request, retry, "email intro", || fallback_intro(top.len())).await
}

/// HTML body and plain-text alternative.
pub fn render_email(top: &[&EnrichedArticle], intro: &str, blog_url: Option<&str>) -> (String, String) {
    let blog = blog_url.and_then(safe_url);

    let mut html = format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<body style=\"font-family: Arial, sans-serif;\">\n<h1>{}</h1>\n<p>{}</p>\n",
        BRAND,
        escape_html(intro)
    );
    let mut text = format!("{}\n\n{}\n\n", BRAND, intro);

    for (i, article) in top.iter().enumerate() {
        let title = match safe_url(article.link()) {
            Some(href) => format!(r#"<a href="{}">{}</a>"#, href, escape_html(article.title())),
            None => escape_html(article.title()),
        };
        html.push_str(&format!(
            "<h2>{}</h2>\n<p><em>{}</em></p>\n<p>{}</p>\n",
            title,
            escape_html(&article.article.source),
            escape_html(&article.short_summary)
        ));
        text.push_str(&format!(
            "{}. {}\n{}\n{}\n\n",
            i + 1,
            article.title(),
            article.short_summary,
            article.link()
        ));
    }

    if let Some(href) = blog {
        html.push_str(&format!(r#"<p><a href="{}">Read the full digest</a></p>"#, href));
        html.push('\n');
        if let Some(raw) = blog_url {
            text.push_str(&format!("Full digest: {}\n", raw.trim()));
        }
    }
    html.push_str("</body>\n</html>\n");
    (html, text)
}

pub async fn build_draft(
    provider: Option<&dyn LlmProvider>,
    retry: &RetryPolicy,
    subject: &str,
    top: &[&EnrichedArticle],
    blog_url: Option<&str>,
) -> EmailDraft {
    let intro = write_intro(provider, retry, top).await;
    let (html, text) = render_email(top, &intro, blog_url);
    EmailDraft {
        subject: subject.to_string(),
        intro,
        html,
        text,
    }
}

/// Outcome of sending one draft to every recipient.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct DeliveryReport {
    pub delivered: Vec<String>,
    /// (recipient, reason)
    pub failed: Vec<(String, String)>,
}

impl DeliveryReport {
    pub fn all_delivered(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Send `draft` to each recipient in turn. A failure for one recipient is recorded
/// and the others still get their email.
pub async fn deliver<'a, I>(transport: &dyn MailTransport, draft: &EmailDraft, recipients: I) -> DeliveryReport
where
    I: IntoIterator<Item = &'a String>,
{
    let mut report = DeliveryReport::default();
    for recipient in recipients {
        let message = EmailMessage {
            from: transport.sender().to_string(),
            to: recipient.clone(),
            subject: draft.subject.clone(),
            html: draft.html.clone(),
            text: draft.text.clone(),
        };
        match transport.send(&message).await {
            Ok(()) => {
                info!("Email sent to {} via {}", recipient, transport.name());
                report.delivered.push(recipient.clone());
            }
            Err(e) => {
                warn!("Email to {} failed: {}", recipient, e);
                report.failed.push((recipient.clone(), e.to_string()));
            }
        }
    }
    report
}
