//! Lightweight publish/consume channel used to fan worker-pool results back to the caller
//! without introducing a shared mutable collection.

pub mod channel;
