use std::collections::BTreeMap;
use std::future::Future;

use anyhow::Result;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateKey {
    Invitation,
    InvitationReminder,
}

impl TemplateKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateKey::Invitation => "invitation",
            TemplateKey::InvitationReminder => "invitation_reminder",
        }
    }

    fn subject(&self, organization: &str) -> String {
        match self {
            TemplateKey::Invitation => format!("Invitation to join {organization}"),
            TemplateKey::InvitationReminder => {
                format!("Join {organization} - Invitation Reminder")
            }
        }
    }
}

/// A templated message addressed to one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub template: TemplateKey,
    pub recipient: String,
    pub context: BTreeMap<String, String>,
}

impl Notification {
    pub fn new(template: TemplateKey, recipient: impl Into<String>) -> Self {
        Self {
            template,
            recipient: recipient.into(),
            context: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.context.insert(key.to_string(), value.into());
        self
    }

    /// Context shared by the invitation and reminder templates.
    pub fn for_invitation(
        template: TemplateKey,
        recipient: &str,
        organization: &str,
        position: Option<&str>,
        invited_by: &str,
        acceptance_url: &str,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self::new(template, recipient)
            .with("organization", organization)
            .with("position", position.unwrap_or("N/A"))
            .with("invited_by", invited_by)
            .with("acceptance_url", acceptance_url)
            .with("expires_at", expires_at.format("%B %d, %Y").to_string())
    }

    fn value(&self, key: &str) -> &str {
        self.context.get(key).map(String::as_str).unwrap_or("")
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NotifyError {
    #[error("notification queue is full")]
    QueueFull,

    #[error("notification queue is closed")]
    QueueClosed,
}

/// Hands notifications off for delivery. Must not block on the transport.
pub trait Notifier {
    fn dispatch(&self, notification: Notification) -> Result<(), NotifyError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

pub fn render(notification: &Notification, from: &str) -> EmailMessage {
    let organization = notification.value("organization");
    let opening = match notification.template {
        TemplateKey::Invitation => format!(
            "{} has invited you to join {} as {}.",
            notification.value("invited_by"),
            organization,
            notification.value("position"),
        ),
        TemplateKey::InvitationReminder => format!(
            "This is a reminder that {} invited you to join {} as {}.",
            notification.value("invited_by"),
            organization,
            notification.value("position"),
        ),
    };

    let body = format!(
        "Hello,\n\n{opening}\n\nAccept the invitation here:\n{}\n\nThis invitation expires on {}.\n",
        notification.value("acceptance_url"),
        notification.value("expires_at"),
    );

    EmailMessage {
        from: from.to_string(),
        to: notification.recipient.clone(),
        subject: notification.template.subject(organization),
        body,
    }
}

/// Transport used by the mail worker.
pub trait Mailer: Send + Sync + 'static {
    fn deliver(&self, message: EmailMessage) -> impl Future<Output = Result<()>> + Send;
}

/// Writes messages to the log instead of sending them.
#[derive(Debug, Clone, Default)]
pub struct LogMailer;

impl Mailer for LogMailer {
    fn deliver(&self, message: EmailMessage) -> impl Future<Output = Result<()>> + Send {
        async move {
            log::info!(
                "Email from {} to {}: {}\n{}",
                message.from,
                message.to,
                message.subject,
                message.body
            );
            Ok(())
        }
    }
}

/// Bounded queue in front of a background mail worker.
#[derive(Debug, Clone)]
pub struct MailQueue {
    sender: mpsc::Sender<Notification>,
}

impl MailQueue {
    /// Spawn the worker on the current tokio runtime. The worker stops once
    /// every queue handle has been dropped and the backlog is drained.
    pub fn start<M: Mailer>(mailer: M, from: String, capacity: usize) -> (Self, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::channel::<Notification>(capacity.max(1));

        let worker = tokio::spawn(async move {
            while let Some(notification) = receiver.recv().await {
                let message = render(&notification, &from);
                if let Err(error) = mailer.deliver(message).await {
                    log::error!(
                        "Failed to deliver {} email to {}: {}",
                        notification.template.as_str(),
                        notification.recipient,
                        error
                    );
                }
            }
            log::info!("Mail worker stopped");
        });

        (Self { sender }, worker)
    }
}

impl Notifier for MailQueue {
    fn dispatch(&self, notification: Notification) -> Result<(), NotifyError> {
        self.sender
            .try_send(notification)
            .map_err(|error| match error {
                TrySendError::Full(_) => NotifyError::QueueFull,
                TrySendError::Closed(_) => NotifyError::QueueClosed,
            })
    }
}
