use async_trait::async_trait;
use html_escape::{encode_double_quoted_attribute, encode_text};
use lettre::message::{header, Mailbox, Message};
use lettre::transport::smtp::{authentication::Credentials, AsyncSmtpTransport};
use lettre::{AsyncTransport, Tokio1Executor};
use tracing::{info, warn};

use crate::config::SmtpConfig;
use crate::offer::Offer;
use crate::Result;

pub const EMAIL_SUBJECT: &str = "Kleinanzeigen - New Offers";

/// Delivers the offers of one run to a list of destinations.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, destinations: &[String], offers: &[Offer]) -> Result<()>;
}

pub struct EmailNotifier {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl EmailNotifier {
    pub fn new(config: &SmtpConfig) -> Result<Self> {
        let creds = Credentials::new(config.user.clone(), config.password.clone());
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)?
            .credentials(creds)
            .build();
        let from = config.source_email.parse()?;

        Ok(Self { mailer, from })
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn send(&self, destinations: &[String], offers: &[Offer]) -> Result<()> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(EMAIL_SUBJECT)
            .header(header::ContentType::TEXT_HTML);
        for destination in destinations {
            builder = builder.to(destination.parse()?);
        }
        let msg = builder.body(render_email_body(offers))?;

        self.mailer.send(msg).await?;
        info!(
            recipients = destinations.len(),
            offers = offers.len(),
            "sent offer email"
        );
        Ok(())
    }
}

/// Logs the notification instead of sending it.
#[derive(Debug, Default)]
pub struct DryRunNotifier;

#[async_trait]
impl Notifier for DryRunNotifier {
    async fn send(&self, destinations: &[String], offers: &[Offer]) -> Result<()> {
        warn!(
            recipients = ?destinations,
            offers = offers.len(),
            "dry run, notification not sent"
        );
        for offer in offers {
            info!(id = %offer.id, price = %offer.raw_price_text, url = %offer.source_url, "{}", offer.title);
        }
        Ok(())
    }
}

pub fn render_email_body(offers: &[Offer]) -> String {
    let items: Vec<String> = offers
        .iter()
        .map(|o| {
            let thumbnail = o
                .thumbnail_url
                .as_deref()
                .map(|src| format!(r#"<img src="{}" />"#, encode_double_quoted_attribute(src)))
                .unwrap_or_default();
            format!(
                r#"<li><a href="{}" target="_blank">{}</a>&nbsp;{} - {} - {} - {} {}</li>"#,
                encode_double_quoted_attribute(&o.source_url),
                encode_text(&o.title),
                encode_text(&o.description),
                encode_text(&o.raw_price_text),
                encode_text(&o.location),
                encode_text(&o.timestamp),
                thumbnail,
            )
        })
        .collect();

    format!(
        "<body>\n<h1>{} New Offers</h1>\n<ul>\n{}\n</ul>\n</body>\n",
        offers.len(),
        items.join("\n")
    )
}
