pub mod config;
pub mod outcome;
pub mod queue;
pub mod request;
pub mod tools;
