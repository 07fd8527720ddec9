pub mod analyze;
pub mod cancel;
pub mod search;
pub mod strategies;
