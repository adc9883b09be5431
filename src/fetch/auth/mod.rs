//! [`HttpClient`](super::HttpClient) wrappers that attach credentials.

mod headers;
mod url_param;

pub use headers::StaticHeaders;
pub use url_param::UrlParam;
