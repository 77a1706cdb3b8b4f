pub mod mapping;
pub mod report;
