pub mod accounts;
pub mod app;
pub mod approval;
pub mod auth;
pub mod config;
pub mod error;
pub mod notify;
pub mod poller;
pub mod state;
