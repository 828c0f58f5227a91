// Error types shared by every module
pub mod error;

// Configuration loading and validation
pub mod config;
