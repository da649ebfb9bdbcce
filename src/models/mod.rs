pub mod detection;
pub mod profile;
pub mod scan_record;
pub mod trend;
