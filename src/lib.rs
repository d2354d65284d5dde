pub mod agent;
pub mod calculator;
pub mod checkpoint;
pub mod conversation;
pub mod errors;
pub mod graph;
pub mod models;
pub mod providers;
pub mod registry;
