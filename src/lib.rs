pub mod amount;
pub mod api;
pub mod auth;
pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod instrument;
pub mod leaderboard;
pub mod ledger;
pub mod orderbook;
pub mod orders;
pub mod simulate;
pub mod state;
pub mod store;
pub mod trade;
pub mod utils;
