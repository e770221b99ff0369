//! HTTP status server: video submission, polling and download.

pub mod app;
