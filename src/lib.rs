pub mod config;
pub mod core;
pub mod error;
pub mod tools;
pub mod web;
