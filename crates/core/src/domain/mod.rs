pub mod capability;
pub mod filter;
pub mod result;
