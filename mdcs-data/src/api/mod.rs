//! HTTP API handlers for mdcs-data

pub mod health;
pub mod observers;
pub mod responses;
pub mod upload;

pub use health::health_routes;
pub use observers::observer_routes;
pub use responses::response_routes;
pub use upload::upload_routes;
