//! SMTP transport built on `lettre`.

use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use tracing::{info, warn};

use super::Notifier;
use crate::config::SmtpConfig;
use crate::error::NotifyError;

/// Implicit-TLS submission port; everything else uses STARTTLS
const SMTPS_PORT: u16 = 465;

/// Sends alerts as plain-text email
pub struct EmailNotifier {
    sender: Mailbox,
    mailer: AsyncSmtpTransport<Tokio1Executor>,
}

impl EmailNotifier {
    pub fn new(config: &SmtpConfig) -> Result<Self, NotifyError> {
        let sender = Mailbox::new(config.sender_name.clone(), config.from_address.parse()?);

        let relay = if config.port == SMTPS_PORT {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?
        };
        let mut builder = relay.port(config.port);

        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Self { sender, mailer: builder.build() })
    }

    /// Build one message addressed to every valid contact
    ///
    /// Contacts that are not valid addresses are skipped with a warning.
    fn build_message(&self, contacts: &[String], subject: &str, body: &str) -> Result<Message, NotifyError> {
        let mut recipients = contacts.iter().filter_map(|contact| match contact.parse::<Mailbox>() {
            Ok(mailbox) => Some(mailbox),
            Err(e) => {
                warn!("Skipping invalid contact address {:?}: {}", contact, e);
                None
            }
        });

        let first = recipients.next().ok_or(NotifyError::NoContacts)?;
        let mut builder = Message::builder().from(self.sender.clone()).to(first);
        for mailbox in recipients {
            builder = builder.to(mailbox);
        }

        Ok(builder
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())?)
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn notify(
        &self,
        contacts: &[String],
        subject: &str,
        body: &str,
        target_ref: &str,
    ) -> Result<(), NotifyError> {
        let message = self.build_message(contacts, subject, body)?;
        self.mailer.send(message).await?;

        info!(target_ref, recipients = contacts.len(), "Alert email sent");
        Ok(())
    }
}
