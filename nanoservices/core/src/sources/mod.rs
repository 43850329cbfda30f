pub mod http_client;
pub mod traits;

pub use traits::Source;
