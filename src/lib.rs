pub mod analyzer;
pub mod api_connection;
pub mod cli;
pub mod config;
pub mod meal_aggregator;
pub mod meal_history;
pub mod models;
pub mod presentation;
pub mod profile;
pub mod recommender;
pub mod session;
