//! The `registry` module holds every message state machine known to the
//! process: the live index keyed by message id and the ordered collection
//! of expired/deleted instances.

pub mod store;

pub use store::{InstanceId, Registry};
