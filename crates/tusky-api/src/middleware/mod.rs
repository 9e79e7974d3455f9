pub mod tus;

pub use tus::tus_middleware;
