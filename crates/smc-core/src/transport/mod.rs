//! Transport fetchers: the raw HTTP seam under the command dispatcher.

pub mod http;
pub mod port;

pub use http::ReqwestFetcher;
pub use port::{FetchRequest, FetchResponse, Fetcher};
