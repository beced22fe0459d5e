pub mod cleanup;
pub mod connectors;
pub mod discover;
pub mod document;
pub mod error;
pub mod migrator;
pub mod reconciler;
pub mod rules;
pub mod schema;
pub mod sql_generator;
pub mod transformer;
