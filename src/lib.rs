pub mod app;
pub mod assay;
pub mod cancel;
pub mod codec;
pub mod config;
pub mod convert;
pub mod domain;
pub mod error;
pub mod experiment;
pub mod index;
pub mod markers;
pub mod matcher;
pub mod output;
pub mod store;
