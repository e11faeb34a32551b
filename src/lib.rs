pub mod adblock;
pub mod app;
pub mod catalog;
pub mod config;
pub mod embed;
pub mod error;
pub mod media;
pub mod player;
pub mod search;
pub mod tmdb;
