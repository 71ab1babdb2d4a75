pub mod batch;
pub mod db;
pub mod memory;
pub mod playstore;
pub mod store;
