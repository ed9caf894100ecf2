use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Cell broadcast message identifier (16 bit on the wire).
pub type MessageId = u16;

/// Warning period value that disables auto-expiry.
pub const WARNING_PERIOD_NEVER: u32 = 0xffff_ffff;

/// Represents one broadcast message as submitted by a CBE.
///
/// The message is a configuration snapshot: it is copied into the state
/// machine at creation time and only changes when a replace request carries
/// a [`MessageUpdate`].
///
/// # Example
///
/// ```rust
/// use cbcast::message::{CbcMessage, WARNING_PERIOD_NEVER};
///
/// let msg = CbcMessage::new("cbe-north", 42)
///     .with_pages(vec!["Flood warning".to_string()])
///     .with_warning_period(WARNING_PERIOD_NEVER);
/// assert_eq!(msg.expiry(), None);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CbcMessage {
    pub cbe_name: String,
    pub message_id: MessageId,
    pub content: BroadcastContent,
    pub params: DeliveryParams,
    pub warning_period_sec: u32,
}

/// Broadcast content. Pages are carried opaquely; encoding belongs to the
/// peer protocol layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastContent {
    pub serial_nr: u16,
    pub dcs: u8,
    pub pages: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryParams {
    pub priority: u8,
    pub repetition_period: u16,
    pub num_bcast_req: u16,
    pub extended_cbch: bool,
}

impl Default for DeliveryParams {
    fn default() -> Self {
        Self {
            priority: 0,
            repetition_period: 1,
            num_bcast_req: 0,
            extended_cbch: false,
        }
    }
}

/// New content carried by a replace request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageUpdate {
    pub content: BroadcastContent,
    pub params: Option<DeliveryParams>,
    pub warning_period_sec: Option<u32>,
}

impl CbcMessage {
    pub fn new(cbe_name: &str, message_id: MessageId) -> Self {
        Self {
            cbe_name: cbe_name.to_string(),
            message_id,
            content: BroadcastContent::default(),
            params: DeliveryParams::default(),
            warning_period_sec: WARNING_PERIOD_NEVER,
        }
    }

    pub fn with_pages(mut self, pages: Vec<String>) -> Self {
        self.content.pages = pages;
        self
    }

    pub fn with_serial_nr(mut self, serial_nr: u16) -> Self {
        self.content.serial_nr = serial_nr;
        self
    }

    pub fn with_params(mut self, params: DeliveryParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_warning_period(mut self, secs: u32) -> Self {
        self.warning_period_sec = secs;
        self
    }

    /// Name used for the state machine instance and in log lines.
    pub fn instance_name(&self) -> String {
        format!("{}-{}", self.cbe_name, self.message_id)
    }

    /// Delay after which an active message auto-expires, if any.
    pub fn expiry(&self) -> Option<Duration> {
        if self.warning_period_sec == WARNING_PERIOD_NEVER {
            None
        } else {
            Some(Duration::from_secs(u64::from(self.warning_period_sec)))
        }
    }

    /// Applies a replace request. Identity fields never change.
    pub fn apply(&mut self, update: MessageUpdate) {
        self.content = update.content;
        if let Some(params) = update.params {
            self.params = params;
        }
        if let Some(secs) = update.warning_period_sec {
            self.warning_period_sec = secs;
        }
    }
}
