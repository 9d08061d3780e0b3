//! The client-side vocabulary operations are executed against: binding/context acquisition (C4)
//! and the retryable-write executor (C6).

pub mod binding;
pub mod executor;
