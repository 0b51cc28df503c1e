// Library for tests to access modules

pub mod aggregator;
pub mod config;
pub mod error;
pub mod history;
pub mod hub;
pub mod models;
pub mod monitor;
pub mod providers;
pub mod routes;
pub mod sampler;
pub mod stats;
