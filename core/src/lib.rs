pub mod channel;
pub mod config;
pub mod engine;
pub mod error;
pub mod fanout;
pub mod integration;
pub mod kpi;
pub mod query;
pub mod result;
pub mod sql;
pub mod status;
pub mod store;
pub mod types;
pub mod tz;
