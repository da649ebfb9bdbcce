pub mod health;
pub mod trend;
