pub mod cli;
pub mod clock;
pub mod code_gen;
pub mod config;
pub mod error;
pub mod identity;
pub mod link;
pub mod link_service;
pub mod link_store;
pub mod notify;
pub mod sweeper;
