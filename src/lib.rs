pub mod bias;
pub mod bootstrap;
pub mod confidence;
pub mod config;
pub mod features;
pub mod fetch;
pub mod forecast;
pub mod inputs;
pub mod models;
pub mod output;
pub mod propagate;
pub mod series;
pub mod stats;
pub mod store;
pub mod types;
pub mod worker;
