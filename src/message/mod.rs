//! The `message` module defines the broadcast payload managed by one
//! lifecycle state machine: its identity, content and delivery parameters.

pub mod cbc_message;

pub use cbc_message::{
    BroadcastContent, CbcMessage, DeliveryParams, MessageId, MessageUpdate, WARNING_PERIOD_NEVER,
};
