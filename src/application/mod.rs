//! Application services over repositories, caches and relation loading.

pub mod categories;
pub mod error;
pub mod posts;
pub mod repos;
pub mod tags;
