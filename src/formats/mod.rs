//! File formats: measurement input and .btch hierarchy output.

pub mod btch;
pub mod hist;
