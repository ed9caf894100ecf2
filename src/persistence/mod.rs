//! The `persistence` module keeps a durable record of retired messages.
//!
//! Every message that reaches DELETED or EXPIRED can be written to an
//! embedded `sled` database so that operators can look up what was
//! broadcast after the in-memory instance has been purged.

pub mod sled_store;

pub use sled_store::{Archive, RetiredMessage};

#[cfg(test)]
mod tests;
