//! Protocol activity logging.
//!
//! Three cooperating pieces, deliberately decoupled:
//!
//! - [`sink::ProtocolLog`] appends protocol entries to a timestamped log
//!   file and broadcasts every write.
//! - [`queue::DeliveryQueue`] buffers those notifications for batched,
//!   rate-limited delivery to a slow consumer.
//! - [`tail::LogTailer`] independently follows the newest log file on disk,
//!   surviving rotation, so diagnostics work even when the writer lives in
//!   another process.

pub mod queue;
pub mod sink;
pub mod tail;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// One protocol log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    pub timestamp: DateTime<Local>,
    /// Free-form direction tag, e.g. `TX`, `RX`, `TX (pre-CRC)`, `SYS`.
    pub direction: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<Vec<u8>>,
}

/// Direction of a telegram recovered from a tailed log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TelegramDirection {
    Tx,
    Rx,
    Generic,
}

/// The bracket-delimited payload of a logged protocol line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Telegram {
    pub direction: TelegramDirection,
    pub payload: String,
}

/// A line delivered by the tailer: the raw text plus the classified
/// telegram, when one was present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailedLine {
    pub raw: String,
    pub telegram: Option<Telegram>,
}
