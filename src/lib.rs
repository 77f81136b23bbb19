pub mod cli;
pub mod client;
pub mod configuration;
pub mod controller;
pub mod dao;
pub mod error;
pub mod futures_set;
pub mod handler;
pub mod helpers;
pub mod model;
pub mod provider;
pub mod push;
pub mod server;
pub mod types;
