pub mod api;
pub mod capture;
pub mod config;
pub mod db;
pub mod detection;
pub mod error;
pub mod services;

pub use error::Error;
