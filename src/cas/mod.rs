//! Content-addressable blob storage (spec.md §3 `Blob`/`CASMeta`, §4.1).

pub mod blob;
pub mod meta;
pub mod stripe;

pub use blob::CasStore;
pub use meta::CasMeta;
