pub mod alerts;
pub mod check;
pub mod silence;
