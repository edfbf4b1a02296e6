#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub(crate) mod api;
pub mod app;
pub(crate) mod clients;
pub mod config;
pub mod observability;
pub mod pipeline;
pub mod scheduler;
pub mod store;
pub mod util;
