// Payment notices: user-facing alerts for inbound payment requests

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::message::envelope::{EnvelopeError, PaymentRequest};
use crate::transport::adapter::PeerId;

/// A decoded inbound payment request, ready to show to the user.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentNotice {
    pub sender: PeerId,
    pub title: String,
    pub body: String,
    pub request: PaymentRequest,
}

impl PaymentNotice {
    pub fn from_request(sender: PeerId, request: PaymentRequest) -> Self {
        Self {
            sender,
            title: format!(
                "Send {} {} to {}",
                request.amount, request.currency, request.receiver.name
            ),
            body: request.message.clone(),
            request,
        }
    }

    pub fn parse(sender: PeerId, text: &str) -> Result<Self, EnvelopeError> {
        Ok(Self::from_request(sender, PaymentRequest::from_text(text)?))
    }
}

/// Receives notices for every well-formed inbound request.
#[cfg_attr(test, mockall::automock)]
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notice: PaymentNotice);
}

/// Drain decoded inbound texts and forward parsed notices to `sink`.
///
/// Texts that are not payment requests are logged and skipped.
pub async fn run_notifier(
    mut inbound: mpsc::UnboundedReceiver<(PeerId, String)>,
    sink: Arc<dyn NotificationSink>,
) {
    while let Some((sender, text)) = inbound.recv().await {
        match PaymentNotice::parse(sender.clone(), &text) {
            Ok(notice) => {
                debug!("Payment notice from {}: {}", sender, notice.title);
                sink.notify(notice);
            }
            Err(e) => warn!("Inbound text from {} is not a payment request: {}", sender, e),
        }
    }
    debug!("Notification worker stopped");
}
