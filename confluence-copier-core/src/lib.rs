#![doc = "confluence-copier-core: core logic library for confluence-copier."]

//! Mirrors Confluence content between two instances: single pages (body and
//! attachments) or whole spaces rebuilt from their flat page listing.
//!
//! # Usage
//! Build a [`config::CopierConfig`], construct one [`client::ConfluenceClient`]
//! per instance, and drive them through a [`synchronise::Synchroniser`]. The
//! remote side is abstracted behind [`contract::ContentClient`] so tests can
//! swap in `MockContentClient`.

pub mod client;
pub mod config;
pub mod contract;
pub mod error;
pub mod hierarchy;
pub mod staging;
pub mod synchronise;
