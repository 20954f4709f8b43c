//! Request middleware.

pub mod request_id;
pub mod sync_point;
