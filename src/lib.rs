pub mod collab;
pub mod config;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod scheduler;
pub mod score;
pub mod verify;
