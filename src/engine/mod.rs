pub mod catalog;
pub mod config;
pub mod handoff;
pub mod policy;
pub mod responses;
