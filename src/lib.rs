pub mod app;
pub mod clients;
pub mod common;
pub mod config;
pub mod docs;
pub mod infrastructure;
pub mod media;
pub mod modules;
pub mod routes;
pub mod state;
pub mod workers;

#[cfg(test)]
mod testing;
