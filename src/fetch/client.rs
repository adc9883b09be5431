use async_trait::async_trait;
use reqwest::{Request, Response};

/// Minimal seam over `reqwest` so collaborators can be wrapped with
/// authentication and swapped out in tests.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, req: Request) -> reqwest::Result<Response>;
}
