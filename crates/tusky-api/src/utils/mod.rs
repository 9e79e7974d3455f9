//! Request and response helpers for handlers

pub mod headers;
