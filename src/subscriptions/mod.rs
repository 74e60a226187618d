//! Subscription bookkeeping.
//!
//! Every push listener and polling loop the engine starts is registered here
//! under a `(kind, scope)` key so that session teardown can cancel all of
//! them in one call, and so a transaction's finality race can cancel the
//! losing channel.

pub mod registry;

pub use registry::{
    SubscriptionHandle, SubscriptionKey, SubscriptionKind, SubscriptionRegistry,
    SubscriptionScope,
};
