//! Upload ingestion endpoints

pub mod handlers;
