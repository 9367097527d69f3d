/// Email delivery for upload confirmation
///
/// `SmtpMailer` talks to the configured relay through lettre. Uploads do not
/// wait for delivery: confirmation mails go through [`MailQueue`], a bounded
/// channel drained by a background worker.
use async_trait::async_trait;
use lettre::message::{header, Mailbox, Message, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::EmailConfig;
use crate::error::{AppError, Result};

/// A rendered email ready to be sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub recipient: String,
    pub subject: String,
    pub text_body: String,
    pub html_body: Option<String>,
}

impl OutgoingMail {
    /// Mail asking the uploader to confirm via `{public_url}confirm/{token}`
    pub fn confirmation(recipient: &str, public_url: &str, token: &str) -> Self {
        let url = format!("{public_url}confirm/{token}");
        Self {
            recipient: recipient.to_string(),
            subject: "Please confirm your avatar upload".to_string(),
            text_body: format!(
                "Thank you for uploading your avatar. You can confirm your upload by opening this link: {url}"
            ),
            html_body: Some(format!(
                "Thank you for uploading your avatar. You can confirm your upload by clicking this link: <a href=\"{url}\">{url}</a>"
            )),
        }
    }

    /// Mail sent at startup so operators can check SMTP settings
    pub fn test(recipient: &str) -> Self {
        Self {
            recipient: recipient.to_string(),
            subject: "Intravatar is up and running".to_string(),
            text_body: "If you receive this message, intravatar is up and running and able to send confirmation emails".to_string(),
            html_body: None,
        }
    }
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, mail: &OutgoingMail) -> Result<()>;
}

/// Mailer backed by an SMTP relay
#[derive(Clone)]
pub struct SmtpMailer {
    transport: Arc<AsyncSmtpTransport<Tokio1Executor>>,
    from: Mailbox,
}

impl SmtpMailer {
    /// Returns `None` when no SMTP host is configured
    pub fn from_config(config: &EmailConfig) -> Result<Option<Self>> {
        if !config.is_enabled() {
            return Ok(None);
        }

        let from = config
            .smtp_from
            .parse::<Mailbox>()
            .map_err(|e| AppError::Mail(format!("Invalid SMTP_FROM address: {e}")))?;

        let builder = if config.no_tls {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(config.smtp_host.as_str())
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)?
        };
        let builder = builder.port(config.smtp_port);

        let builder = if let (Some(username), Some(password)) =
            (&config.smtp_username, &config.smtp_password)
        {
            builder.credentials(Credentials::new(username.to_string(), password.to_string()))
        } else {
            builder
        };

        info!(host = %config.smtp_host, port = config.smtp_port, tls = !config.no_tls, "SMTP mailer configured");

        Ok(Some(Self {
            transport: Arc::new(builder.build()),
            from,
        }))
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, mail: &OutgoingMail) -> Result<()> {
        let to = mail.recipient.parse::<Mailbox>()?;
        let builder = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(mail.subject.as_str());

        let message = match &mail.html_body {
            Some(html) => builder.multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(header::ContentType::TEXT_PLAIN)
                            .body(mail.text_body.clone()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(header::ContentType::TEXT_HTML)
                            .body(html.clone()),
                    ),
            )?,
            None => builder
                .header(header::ContentType::TEXT_PLAIN)
                .body(mail.text_body.clone())?,
        };

        self.transport.send(message).await?;
        info!(subject = %mail.subject, "email sent successfully");
        Ok(())
    }
}

/// Bounded queue of outgoing mails, drained by one worker task
#[derive(Clone)]
pub struct MailQueue {
    sender: mpsc::Sender<OutgoingMail>,
}

impl MailQueue {
    /// Start the worker; it runs until every `MailQueue` clone is dropped
    pub fn spawn(mailer: Arc<dyn Mailer>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::channel::<OutgoingMail>(capacity.max(1));

        let worker = tokio::spawn(async move {
            while let Some(mail) = receiver.recv().await {
                if let Err(e) = mailer.send(&mail).await {
                    error!(recipient = %mail.recipient, subject = %mail.subject, error = %e, "Failed to deliver email");
                }
            }
            info!("Mail queue closed");
        });

        (Self { sender }, worker)
    }

    /// Queue a mail without waiting for delivery
    pub fn enqueue(&self, mail: OutgoingMail) -> Result<()> {
        self.sender.try_send(mail).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                AppError::Mail("Mail queue is full, please try again later".into())
            }
            mpsc::error::TrySendError::Closed(_) => AppError::Mail("Mail queue is closed".into()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingMailer {
        sent: Mutex<Vec<OutgoingMail>>,
        fail: bool,
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, mail: &OutgoingMail) -> Result<()> {
            self.sent.lock().await.push(mail.clone());
            if self.fail {
                return Err(AppError::Mail("relay down".into()));
            }
            Ok(())
        }
    }

    #[test]
    fn test_confirmation_mail_contains_link() {
        let mail = OutgoingMail::confirmation("a@foo.com", "http://avatars.local/", "abcd");
        assert_eq!(mail.recipient, "a@foo.com");
        assert!(mail.text_body.contains("http://avatars.local/confirm/abcd"));
        assert!(mail
            .html_body
            .unwrap()
            .contains("<a href=\"http://avatars.local/confirm/abcd\">"));
    }

    #[test]
    fn test_disabled_without_host() {
        let mailer = SmtpMailer::from_config(&EmailConfig::default()).unwrap();
        assert!(mailer.is_none());
    }

    #[tokio::test]
    async fn test_queue_delivers_in_background() {
        let mailer = Arc::new(RecordingMailer::default());
        let (queue, worker) = MailQueue::spawn(mailer.clone(), 4);

        queue.enqueue(OutgoingMail::test("ops@foo.com")).unwrap();
        queue
            .enqueue(OutgoingMail::confirmation("a@foo.com", "http://x/", "t"))
            .unwrap();
        drop(queue);
        worker.await.unwrap();

        let sent = mailer.sent.lock().await;
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].recipient, "ops@foo.com");
        assert_eq!(sent[1].recipient, "a@foo.com");
    }

    #[tokio::test]
    async fn test_worker_survives_delivery_errors() {
        let mailer = Arc::new(RecordingMailer {
            fail: true,
            ..Default::default()
        });
        let (queue, worker) = MailQueue::spawn(mailer.clone(), 4);

        queue.enqueue(OutgoingMail::test("a@foo.com")).unwrap();
        queue.enqueue(OutgoingMail::test("b@foo.com")).unwrap();
        drop(queue);
        worker.await.unwrap();

        assert_eq!(mailer.sent.lock().await.len(), 2);
    }
}
