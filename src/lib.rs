pub mod config;
pub mod db;
pub mod mailbox;
pub mod output;
pub mod sync;
