use crate::fetch::client::HttpClient;
use async_trait::async_trait;
use reqwest::Request;

/// Appends a fixed query pair to every request before handing it on.
///
/// Mapillary takes its client token as `access_token=<token>` on both the
/// coverage tiles and the Graph API. Log URLs through
/// [`crate::fetch::redact`] so the token stays out of the logs.
pub struct UrlParam<C> {
    inner: C,
    name: &'static str,
    value: String,
}

impl<C> UrlParam<C> {
    pub fn access_token(inner: C, token: String) -> Self {
        Self {
            inner,
            name: "access_token",
            value: token,
        }
    }

    fn apply(&self, req: &mut Request) {
        req.url_mut()
            .query_pairs_mut()
            .append_pair(self.name, &self.value);
    }
}

#[async_trait]
impl<C: HttpClient> HttpClient for UrlParam<C> {
    async fn execute(&self, mut req: Request) -> reqwest::Result<reqwest::Response> {
        self.apply(&mut req);
        self.inner.execute(req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::BasicClient;
    use reqwest::{Method, Url};

    #[test]
    fn test_token_appended_after_existing_query() {
        let auth = UrlParam::access_token(BasicClient::new(), "MLY|abc".into());
        let url = Url::parse("https://graph.mapillary.com/image_ids?sequence_id=s1").unwrap();
        let mut req = Request::new(Method::GET, url);
        auth.apply(&mut req);
        assert_eq!(
            req.url().as_str(),
            "https://graph.mapillary.com/image_ids?sequence_id=s1&access_token=MLY%7Cabc"
        );
    }
}
