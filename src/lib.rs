pub mod api;
pub mod app;
pub mod config;
pub mod conversion;
pub mod device;
pub mod geo;
pub mod identity;
pub mod models;
pub mod privacy;
pub mod redirect;
pub mod storage;
pub mod tracking;
