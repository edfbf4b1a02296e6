pub mod error;
pub(crate) mod idempotency;
pub mod retry;
pub(crate) mod text;
