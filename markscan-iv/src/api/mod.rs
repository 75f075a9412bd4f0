//! HTTP API handlers for markscan-iv

pub mod analytics;
pub mod health;
pub mod records;
pub mod scan;
pub mod sse;

pub use analytics::analytics_routes;
pub use health::health_routes;
pub use records::record_routes;
pub use scan::scan_routes;
pub use sse::event_stream;
