pub mod carrier;
pub mod channel;
pub mod config;
pub mod db;
pub mod dispatcher;
pub mod model;
pub mod normalizer;
pub mod rate_limit;
pub mod rules;
pub mod store;
pub mod templates;
pub mod tracking;
