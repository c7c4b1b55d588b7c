pub mod config;
pub mod error;
pub mod exit_code;
pub mod interactive;
pub mod paths;
pub mod status;
pub mod timestamp;
pub mod validation;
pub mod version;
pub mod xdg;
