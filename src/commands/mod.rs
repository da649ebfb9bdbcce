pub mod db;
pub mod detection;
pub mod scan;
pub mod settings;
