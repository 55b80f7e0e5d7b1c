// Envelope codec: JSON wire format with size limits

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

use super::types::BroadcastRequest;
use crate::transport::ble::gatt::MAX_ATTRIBUTE_SIZE;

/// Currency attached when the caller does not configure one.
pub const DEFAULT_CURRENCY: &str = "USD";

/// Status of every freshly broadcast request.
pub const STATUS_PENDING: &str = "pending";

/// Largest envelope accepted on either side of the wire.
pub const MAX_ENVELOPE_SIZE: usize = MAX_ATTRIBUTE_SIZE;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    #[error("Invalid amount: {0:?}")]
    InvalidAmount(String),
    #[error("Envelope too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },
    #[error("Envelope is not valid UTF-8")]
    NotUtf8,
    #[error("Encode failed: {0}")]
    Encode(String),
    #[error("Decode failed: {0}")]
    Decode(String),
}

/// Payee details carried in every request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receiver {
    pub name: String,
    pub phone_number: String,
    pub account_id: String,
}

/// The payment request envelope written to remote peers.
///
/// Field order is the wire order:
/// `{"receiver":{..},"amount":12.5,"currency":"USD","timestamp":..,"message":"..","status":"pending"}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub receiver: Receiver,
    pub amount: f64,
    pub currency: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    pub message: String,
    #[serde(default = "pending_status")]
    pub status: String,
}

fn pending_status() -> String {
    STATUS_PENDING.to_string()
}

impl PaymentRequest {
    /// Build the envelope for a user request.
    pub fn from_broadcast(
        request: &BroadcastRequest,
        payee: &Receiver,
        currency: &str,
        timestamp: i64,
    ) -> Result<Self, EnvelopeError> {
        Ok(Self {
            receiver: payee.clone(),
            amount: parse_amount(&request.amount)?,
            currency: currency.to_string(),
            timestamp,
            message: request.description.clone(),
            status: pending_status(),
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, EnvelopeError> {
        encode_json(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let text = std::str::from_utf8(bytes).map_err(|_| EnvelopeError::NotUtf8)?;
        Self::from_text(text)
    }

    pub fn from_text(text: &str) -> Result<Self, EnvelopeError> {
        check_size(text.len())?;
        serde_json::from_str(text).map_err(|e| EnvelopeError::Decode(e.to_string()))
    }
}

/// Reply sent back to the requester over an inbound connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionReceipt {
    pub amount: f64,
    /// Milliseconds since the Unix epoch
    pub date: i64,
    pub from: String,
    pub to: String,
}

impl TransactionReceipt {
    pub fn encode(&self) -> Result<Vec<u8>, EnvelopeError> {
        encode_json(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        check_size(bytes.len())?;
        serde_json::from_slice(bytes).map_err(|e| EnvelopeError::Decode(e.to_string()))
    }
}

/// Parse a user-entered decimal amount.
pub fn parse_amount(raw: &str) -> Result<f64, EnvelopeError> {
    let trimmed = raw.trim();
    match trimmed.parse::<f64>() {
        Ok(value) if value.is_finite() && value >= 0.0 => Ok(value),
        _ => Err(EnvelopeError::InvalidAmount(raw.to_string())),
    }
}

/// Current wall-clock time in milliseconds.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

fn encode_json<T: Serialize>(value: &T) -> Result<Vec<u8>, EnvelopeError> {
    let bytes = serde_json::to_vec(value).map_err(|e| EnvelopeError::Encode(e.to_string()))?;
    check_size(bytes.len())?;
    Ok(bytes)
}

fn check_size(size: usize) -> Result<(), EnvelopeError> {
    if size > MAX_ENVELOPE_SIZE {
        return Err(EnvelopeError::TooLarge {
            size,
            max: MAX_ENVELOPE_SIZE,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payee() -> Receiver {
        Receiver {
            name: "Corner Cafe".to_string(),
            phone_number: "+15550100".to_string(),
            account_id: "acct-42".to_string(),
        }
    }

    #[test]
    fn test_wire_format_field_order() {
        let request = BroadcastRequest::new("12.5", "Lunch");
        let envelope =
            PaymentRequest::from_broadcast(&request, &payee(), DEFAULT_CURRENCY, 1_700_000_000_000)
                .unwrap();
        let text = String::from_utf8(envelope.encode().unwrap()).unwrap();

        assert_eq!(
            text,
            r#"{"receiver":{"name":"Corner Cafe","phone_number":"+15550100","account_id":"acct-42"},"amount":12.5,"currency":"USD","timestamp":1700000000000,"message":"Lunch","status":"pending"}"#
        );
    }

    #[test]
    fn test_decode_defaults_missing_status() {
        let text = r#"{"receiver":{"name":"","phone_number":"","account_id":""},"amount":3.0,"currency":"EUR","timestamp":1,"message":"m"}"#;
        let decoded = PaymentRequest::from_text(text).unwrap();
        assert_eq!(decoded.status, STATUS_PENDING);
        assert_eq!(decoded.currency, "EUR");
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("12.50").unwrap(), 12.5);
        assert_eq!(parse_amount(" 7 ").unwrap(), 7.0);
        assert_eq!(parse_amount("0").unwrap(), 0.0);
        assert!(parse_amount("").is_err());
        assert!(parse_amount("twelve").is_err());
        assert!(parse_amount("-1").is_err());
        assert!(parse_amount("NaN").is_err());
        assert!(parse_amount("inf").is_err());
    }

    #[test]
    fn test_invalid_amount_rejected_before_encoding() {
        let request = BroadcastRequest::new("abc", "Lunch");
        let result = PaymentRequest::from_broadcast(&request, &payee(), DEFAULT_CURRENCY, 0);
        assert_eq!(result, Err(EnvelopeError::InvalidAmount("abc".to_string())));
    }

    #[test]
    fn test_oversized_description_rejected() {
        let request = BroadcastRequest::new("1", "x".repeat(MAX_ENVELOPE_SIZE));
        let envelope =
            PaymentRequest::from_broadcast(&request, &payee(), DEFAULT_CURRENCY, 0).unwrap();
        assert!(matches!(
            envelope.encode(),
            Err(EnvelopeError::TooLarge { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_invalid_utf8() {
        assert_eq!(
            PaymentRequest::decode(&[0xff, 0xfe]),
            Err(EnvelopeError::NotUtf8)
        );
    }

    #[test]
    fn test_receipt_wire_format() {
        let receipt = TransactionReceipt {
            amount: 4.25,
            date: 10,
            from: "payer".to_string(),
            to: "payee".to_string(),
        };
        let bytes = receipt.encode().unwrap();
        assert_eq!(
            std::str::from_utf8(&bytes).unwrap(),
            r#"{"amount":4.25,"date":10,"from":"payer","to":"payee"}"#
        );
        assert_eq!(TransactionReceipt::decode(&bytes).unwrap(), receipt);
    }
}
