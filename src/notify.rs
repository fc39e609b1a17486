use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::model::{Booking, BookingStatus, Ms, to_rfc3339};

/// What happened, addressed to one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    BookingReceived {
        to: String,
        booking: Booking,
        room_name: String,
    },
    BookingAwaitingApproval {
        to: String,
        booking: Booking,
        room_name: String,
    },
    StatusChanged {
        to: String,
        booking: Booking,
        room_name: String,
        old: BookingStatus,
        /// Only set when the new status is `approved`.
        checkout_url: Option<String>,
    },
    PasswordResetOtp {
        to: String,
        code: String,
        expires_at: Ms,
    },
}

/// A rendered outbound message: recipient, subject, template fields and an
/// optional payload to be rendered as an inline QR image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub to: String,
    pub subject: String,
    pub fields: BTreeMap<&'static str, String>,
    pub qr_payload: Option<String>,
}

fn booking_fields(booking: &Booking, room_name: &str) -> BTreeMap<&'static str, String> {
    BTreeMap::from([
        ("booking_id", booking.id.to_string()),
        ("room", room_name.to_string()),
        ("user_name", booking.user_name.clone()),
        ("user_email", booking.user_email.clone()),
        ("purpose", booking.purpose.clone()),
        ("attendees", booking.attendees.to_string()),
        ("start", to_rfc3339(booking.span.start)),
        ("end", to_rfc3339(booking.span.end)),
        ("status", booking.status.to_string()),
    ])
}

impl Notification {
    pub fn render(&self) -> Message {
        match self {
            Notification::BookingReceived { to, booking, room_name } => Message {
                to: to.clone(),
                subject: format!("Booking received: {room_name}"),
                fields: booking_fields(booking, room_name),
                qr_payload: None,
            },
            Notification::BookingAwaitingApproval { to, booking, room_name } => Message {
                to: to.clone(),
                subject: format!("New booking awaiting approval: {room_name}"),
                fields: booking_fields(booking, room_name),
                qr_payload: None,
            },
            Notification::StatusChanged {
                to,
                booking,
                room_name,
                old,
                checkout_url,
            } => {
                let mut fields = booking_fields(booking, room_name);
                fields.insert("old_status", old.to_string());
                fields.insert("new_status", booking.status.to_string());
                if let Some(url) = checkout_url {
                    fields.insert("checkout_url", url.clone());
                }
                Message {
                    to: to.clone(),
                    subject: format!("Booking {}: {room_name}", booking.status),
                    fields,
                    qr_payload: checkout_url.clone(),
                }
            }
            Notification::PasswordResetOtp { to, code, expires_at } => Message {
                to: to.clone(),
                subject: "Password reset code".to_string(),
                fields: BTreeMap::from([
                    ("otp", code.clone()),
                    ("expires_at", to_rfc3339(*expires_at)),
                ]),
                qr_payload: None,
            },
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Notification::BookingReceived { .. } => "booking_received",
            Notification::BookingAwaitingApproval { .. } => "booking_awaiting_approval",
            Notification::StatusChanged { .. } => "status_changed",
            Notification::PasswordResetOtp { .. } => "password_reset_otp",
        }
    }
}

#[derive(Debug)]
pub struct MailError(pub String);

impl fmt::Display for MailError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mail delivery failed: {}", self.0)
    }
}

impl std::error::Error for MailError {}

/// Outbound delivery. Implementations may be slow or fail; neither
/// affects the operation that triggered the message.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &Message) -> Result<(), MailError>;
}

/// Writes every message to the log instead of delivering it.
#[derive(Debug, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: &Message) -> Result<(), MailError> {
        info!(
            to = %message.to,
            subject = %message.subject,
            fields = ?message.fields,
            qr = message.qr_payload.as_deref().unwrap_or(""),
            "mail"
        );
        Ok(())
    }
}

/// Keeps delivered messages in memory.
#[derive(Debug, Default)]
pub struct MemoryMailer {
    sent: Mutex<Vec<Message>>,
}

impl MemoryMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.sent.lock().map(|m| m.clone()).unwrap_or_default()
    }

    /// Poll until at least `count` messages arrived or `timeout` passed.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<Message> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let sent = self.messages();
            if sent.len() >= count || tokio::time::Instant::now() >= deadline {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl Mailer for MemoryMailer {
    async fn send(&self, message: &Message) -> Result<(), MailError> {
        self.sent
            .lock()
            .map_err(|_| MailError("mailbox poisoned".into()))?
            .push(message.clone());
        Ok(())
    }
}

/// Fire-and-forget notification queue. Enqueueing never blocks and never
/// fails the caller; a background task renders and hands messages to the
/// mailer.
pub struct NotifyHub {
    tx: mpsc::UnboundedSender<Notification>,
    admin_emails: Vec<String>,
}

impl NotifyHub {
    /// Spawns the dispatcher; must be called inside a tokio runtime.
    pub fn new(mailer: Arc<dyn Mailer>, admin_emails: Vec<String>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(dispatch_loop(mailer, rx));
        Self { tx, admin_emails }
    }

    /// Confirmation to the requester plus an approval request to every
    /// configured admin address.
    pub fn booking_received(&self, booking: &Booking, room_name: &str) {
        self.enqueue(Notification::BookingReceived {
            to: booking.user_email.clone(),
            booking: booking.clone(),
            room_name: room_name.to_string(),
        });
        for admin in &self.admin_emails {
            self.enqueue(Notification::BookingAwaitingApproval {
                to: admin.clone(),
                booking: booking.clone(),
                room_name: room_name.to_string(),
            });
        }
    }

    pub fn status_changed(
        &self,
        booking: &Booking,
        room_name: &str,
        old: BookingStatus,
        checkout_url: Option<String>,
    ) {
        self.enqueue(Notification::StatusChanged {
            to: booking.user_email.clone(),
            booking: booking.clone(),
            room_name: room_name.to_string(),
            old,
            checkout_url,
        });
    }

    pub fn password_reset(&self, to: &str, code: &str, expires_at: Ms) {
        self.enqueue(Notification::PasswordResetOtp {
            to: to.to_string(),
            code: code.to_string(),
            expires_at,
        });
    }

    fn enqueue(&self, notification: Notification) {
        if self.tx.send(notification).is_err() {
            warn!("notification dispatcher stopped, dropping message");
        }
    }
}

async fn dispatch_loop(mailer: Arc<dyn Mailer>, mut rx: mpsc::UnboundedReceiver<Notification>) {
    while let Some(notification) = rx.recv().await {
        let kind = notification.kind();
        let message = notification.render();
        match mailer.send(&message).await {
            Ok(()) => {
                debug!("sent {kind} to {}", message.to);
                metrics::counter!(crate::observability::NOTIFICATIONS_TOTAL, "kind" => kind, "status" => "sent")
                    .increment(1);
            }
            Err(e) => {
                warn!("{kind} to {} failed: {e}", message.to);
                metrics::counter!(crate::observability::NOTIFICATIONS_TOTAL, "kind" => kind, "status" => "failed")
                    .increment(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Span;
    use ulid::Ulid;

    fn booking(status: BookingStatus) -> Booking {
        Booking {
            id: Ulid::new(),
            room_id: Ulid::new(),
            user_name: "Budi".into(),
            user_email: "budi@example.com".into(),
            purpose: "retro".into(),
            attendees: 4,
            span: Span::new(1_000, 2_000),
            status,
            checkout_token: "t0k".into(),
            created_at: 0,
        }
    }

    struct FailingMailer;

    #[async_trait]
    impl Mailer for FailingMailer {
        async fn send(&self, _message: &Message) -> Result<(), MailError> {
            Err(MailError("smtp down".into()))
        }
    }

    #[tokio::test]
    async fn booking_received_reaches_requester_and_admins() {
        let mailer = Arc::new(MemoryMailer::new());
        let hub = NotifyHub::new(
            mailer.clone(),
            vec!["ops@example.com".into(), "lead@example.com".into()],
        );
        hub.booking_received(&booking(BookingStatus::Pending), "Orion");

        let sent = mailer.wait_for(3, Duration::from_secs(2)).await;
        let recipients: Vec<_> = sent.iter().map(|m| m.to.as_str()).collect();
        assert_eq!(
            recipients,
            vec!["budi@example.com", "ops@example.com", "lead@example.com"]
        );
        assert!(sent[1].subject.contains("awaiting approval"));
    }

    #[tokio::test]
    async fn approval_carries_checkout_payload() {
        let mailer = Arc::new(MemoryMailer::new());
        let hub = NotifyHub::new(mailer.clone(), vec![]);
        let url = "http://localhost:8080/api/bookings/delete/t0k".to_string();
        hub.status_changed(
            &booking(BookingStatus::Approved),
            "Orion",
            BookingStatus::Pending,
            Some(url.clone()),
        );

        let sent = mailer.wait_for(1, Duration::from_secs(2)).await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].qr_payload.as_deref(), Some(url.as_str()));
        assert_eq!(sent[0].fields["old_status"], "pending");
        assert_eq!(sent[0].fields["new_status"], "approved");
    }

    #[tokio::test]
    async fn rejection_has_no_checkout_payload() {
        let mailer = Arc::new(MemoryMailer::new());
        let hub = NotifyHub::new(mailer.clone(), vec![]);
        hub.status_changed(&booking(BookingStatus::Rejected), "Orion", BookingStatus::Pending, None);

        let sent = mailer.wait_for(1, Duration::from_secs(2)).await;
        assert!(sent[0].qr_payload.is_none());
        assert!(!sent[0].fields.contains_key("checkout_url"));
    }

    #[test]
    fn times_render_as_rfc3339() {
        let message = Notification::BookingReceived {
            to: "budi@example.com".into(),
            booking: booking(BookingStatus::Pending),
            room_name: "Orion".into(),
        }
        .render();
        assert_eq!(message.fields["start"], "1970-01-01T00:00:01Z");
        assert_eq!(message.fields["end"], "1970-01-01T00:00:02Z");

        let otp = Notification::PasswordResetOtp {
            to: "budi@example.com".into(),
            code: "123456".into(),
            expires_at: 1_767_225_600_000,
        }
        .render();
        assert_eq!(otp.fields["expires_at"], "2026-01-01T00:00:00Z");
    }

    #[tokio::test]
    async fn failing_mailer_does_not_stop_dispatch() {
        let hub = NotifyHub::new(Arc::new(FailingMailer), vec![]);
        // Neither call may panic or block.
        hub.password_reset("a@example.com", "123456", 0);
        hub.password_reset("b@example.com", "654321", 0);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
