//! HTTP control surface
//!
//! JSON endpoints used by the dashboard to configure sources, trigger syncs,
//! read stored metrics and switch storage modes, plus an SSE status stream.

pub mod cache;
pub mod data;
pub mod health;
pub mod mode;
pub mod sources;
pub mod sse;
pub mod sync;

pub use cache::cache_routes;
pub use data::data_routes;
pub use health::health_routes;
pub use mode::mode_routes;
pub use sources::source_routes;
pub use sse::event_stream;
pub use sync::sync_routes;
