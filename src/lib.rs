pub mod db;
pub mod plan;
pub mod runner;
pub mod security;
