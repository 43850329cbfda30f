pub mod db;
pub mod history;
