pub mod client;
pub mod config;
pub mod error;
pub mod repository;
pub mod slideshow;
pub mod store;
pub mod web;
