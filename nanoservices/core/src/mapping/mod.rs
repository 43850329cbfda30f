pub mod flatten;
pub mod preview;
pub mod resolver;

pub use flatten::{flatten, FlatDocument, ROOT_PATH};
pub use preview::truncate_preview;
pub use resolver::{resolve, resolve_records, Resolution, RowCandidate};
