#![forbid(unsafe_code)]

//! Format catalog and resolution engine behind the tubegrab download service.

pub mod catalog;
pub mod config;
pub mod descriptor;
pub mod download_spec;
pub mod engine;
pub mod errors;
pub mod extractor;
pub mod resolver;
pub mod security;
