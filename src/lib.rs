pub mod admin;
pub mod api;
pub mod app;
pub mod config;
pub mod display;
pub mod error;
pub mod http;
pub mod model;
pub mod offline;
pub mod scanner;
