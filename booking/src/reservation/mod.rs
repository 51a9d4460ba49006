pub mod coordinator;
pub mod repository;
pub mod repository_sqlx;
pub mod response;
pub mod types;
