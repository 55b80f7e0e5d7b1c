// Message module: request envelopes and the events the engine publishes

pub mod envelope;
pub mod types;

pub use envelope::{
    now_millis, parse_amount, EnvelopeError, PaymentRequest, Receiver, TransactionReceipt,
    DEFAULT_CURRENCY, STATUS_PENDING,
};
pub use types::{BroadcastRequest, ConnectionEvent, Message};
