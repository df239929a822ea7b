#![deny(missing_docs)]
//! Anthropic Messages API implementation of [`cataloger_model::Provider`].

mod client;
mod error;
mod mapping;

pub use client::Anthropic;
