pub mod auth;
pub mod cleanup;
pub mod client;
pub mod config;
pub mod error;
pub mod gate;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod storage;
