//! Route builders: common endpoints and per-resource routers.

pub mod common;
pub mod resource;

pub use common::common_routes;
pub use resource::ResourceRouter;
