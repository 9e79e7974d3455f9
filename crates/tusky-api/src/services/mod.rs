pub mod cleanup;
pub mod upload;
