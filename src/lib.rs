pub mod config;
pub mod dead_letter;
pub mod export;
pub mod listener;
pub mod model;
pub mod notify;
pub mod processor;
pub mod render;
pub mod store;
