//! Fetching the showcased resources from the remote endpoint.

mod error;
mod http;
mod resource;

pub use error::FetchError;
pub use http::{ResourceFetcher, create_client};
pub use resource::Resource;
