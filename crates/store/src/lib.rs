pub mod db;
pub mod fts;
pub mod query;
pub mod retention;
pub mod schema;
pub mod write;

pub use db::Store;
