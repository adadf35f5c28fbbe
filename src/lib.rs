#![forbid(unsafe_code)]

pub mod catalog;
pub mod config;
pub mod extractor;
pub mod formats;
pub mod jobs;
pub mod pages;
pub mod security;
pub mod selector;
pub mod ytdlp;
