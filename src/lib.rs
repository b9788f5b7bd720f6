// Library exports for updoot
// Integration tests drive the schema and router through these modules

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod graphql;
pub mod loader;
pub mod mail;
pub mod routes;
pub mod state;
pub mod vote;
