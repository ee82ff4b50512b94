//! Graph query/mutation client

pub mod client;

pub use client::GraphClient;
