#![allow(dead_code)]

pub mod builders;
pub mod flaky_repository;
pub mod mock_engine;
pub mod strategies;

pub use builders::*;
pub use flaky_repository::*;
pub use mock_engine::*;
