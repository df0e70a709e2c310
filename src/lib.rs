#![forbid(unsafe_code)]

pub mod build;
pub mod cli;
pub mod config;
pub mod cover;
pub mod crawl;
pub mod epub;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod formats;
pub mod logging;
pub mod observe;
