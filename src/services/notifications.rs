use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::sync::Arc;

use crate::config::SmtpConfig;

/// Out-of-band delivery of one-time passwords.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OtpNotifier: Send + Sync {
    async fn send_otp(&self, email: &str, code: &str) -> anyhow::Result<()>;
}

pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpNotifier {
    pub fn new(host: &str, config: &SmtpConfig) -> anyhow::Result<Self> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)?.port(config.port);
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            from: config.from.parse()?,
        })
    }
}

pub fn otp_message(from: Mailbox, to: Mailbox, code: &str) -> anyhow::Result<Message> {
    Ok(Message::builder()
        .from(from)
        .to(to)
        .subject("Your payment verification code")
        .header(ContentType::TEXT_PLAIN)
        .body(format!(
            "Your one-time code is {}.\n\nEnter it to confirm your payment. If you did not start a payment, ignore this email.\n",
            code
        ))?)
}

#[async_trait]
impl OtpNotifier for SmtpNotifier {
    async fn send_otp(&self, email: &str, code: &str) -> anyhow::Result<()> {
        let message = otp_message(self.from.clone(), email.parse()?, code)?;
        self.transport.send(message).await?;
        tracing::info!(recipient = email, "OTP email sent");
        Ok(())
    }
}

/// Used when no SMTP host is configured.
pub struct LogNotifier;

#[async_trait]
impl OtpNotifier for LogNotifier {
    async fn send_otp(&self, email: &str, code: &str) -> anyhow::Result<()> {
        tracing::warn!(recipient = email, "SMTP not configured; OTP not emailed");
        tracing::debug!(recipient = email, code, "OTP generated");
        Ok(())
    }
}

pub fn notifier_from_config(config: &SmtpConfig) -> anyhow::Result<Arc<dyn OtpNotifier>> {
    match &config.host {
        Some(host) => {
            tracing::info!(host = %host, port = config.port, "OTP emails go through SMTP");
            Ok(Arc::new(SmtpNotifier::new(host, config)?))
        }
        None => Ok(Arc::new(LogNotifier)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_otp_message_carries_code() {
        let message = otp_message(
            "Payroll <no-reply@payroll.local>".parse().unwrap(),
            "ada@example.com".parse().unwrap(),
            "048213",
        )
        .unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("048213"));
        assert!(raw.contains("To: ada@example.com"));
    }

    #[test]
    fn test_without_host_falls_back_to_log_notifier() {
        let config = SmtpConfig {
            host: None,
            port: 587,
            username: None,
            password: None,
            from: "Payroll <no-reply@payroll.local>".into(),
        };
        assert!(notifier_from_config(&config).is_ok());
    }
}
