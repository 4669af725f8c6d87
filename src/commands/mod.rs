pub mod classify;
pub mod coverage;
