pub mod config;
pub mod errors;
pub mod gates;
pub mod hooks;
pub mod logging;
pub mod orchestrator;
pub mod review;
pub mod store;
pub mod tracker;
pub mod util;
