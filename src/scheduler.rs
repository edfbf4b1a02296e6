pub(crate) mod cadence;
pub(crate) mod daemon;
pub(crate) mod jobs;

pub use jobs::Scheduler;
