pub mod api;
pub mod assess;
pub mod config;
pub mod error;
pub mod records;
pub mod site;
pub mod state;
pub mod weather;
