//! HTTP endpoint client used as the unit of work of a throttled run.
//!
//! This module defines two structs, [`Client`] and [`ClientBuilder`].
//! `Client` fetches a single URL and reports how long it took.
//! `ClientBuilder` exposes a finer level of granularity for building
//! a `Client`.
#![allow(clippy::module_name_repetitions)]
use std::time::{Duration, Instant};

use http::{
    StatusCode,
    header::{self, HeaderMap, HeaderValue},
};
use log::debug;
use typed_builder::TypedBuilder;
use url::Url;

use crate::{CancelSignal, ErrorKind, Result};

/// Default user agent, `throttle-<PKG_VERSION>`.
pub const DEFAULT_USER_AGENT: &str = concat!("throttle/", env!("CARGO_PKG_VERSION"));
/// Default time after which idle pooled connections are closed, 5 minutes.
pub const DEFAULT_POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);
/// Placeholder in URL templates which is replaced by the item index
pub const INDEX_PLACEHOLDER: &str = "{i}";

/// Builder for [`Client`].
///
/// # Examples
///
/// ```
/// use throttle_lib::ClientBuilder;
///
/// let client = ClientBuilder::builder()
///     .user_agent("my-agent/1.0")
///     .build()
///     .client()
///     .unwrap();
/// ```
#[derive(TypedBuilder, Debug, Clone)]
#[builder(field_defaults(default, setter(into)))]
#[builder(builder_method(doc = "
Create a builder for building `ClientBuilder`.

On the builder call, call methods with same name as its fields to set their values.

Finally, call `.build()` to create the instance of `ClientBuilder`.
"))]
pub struct ClientBuilder {
    /// User-agent used for requests.
    ///
    /// *NOTE:* Some servers require a user agent and reject requests
    /// without one.
    #[builder(default_code = "String::from(DEFAULT_USER_AGENT)")]
    user_agent: String,

    /// Per-request timeout.
    ///
    /// `None` means requests are only bounded by the [`CancelSignal`] passed
    /// to [`Client::fetch`], which is how a run-wide deadline is expressed.
    timeout: Option<Duration>,

    /// How long idle connections stay in the pool before being closed.
    #[builder(default = Some(DEFAULT_POOL_IDLE_TIMEOUT))]
    pool_idle_timeout: Option<Duration>,

    /// Accept invalid TLS certificates.
    allow_insecure: bool,
}

impl Default for ClientBuilder {
    #[inline]
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ClientBuilder {
    /// Instantiates a [`Client`].
    ///
    /// # Errors
    ///
    /// Returns an `Err` if:
    /// - The user-agent is not a valid header value.
    /// - The request client cannot be created.
    ///   See [here](https://docs.rs/reqwest/latest/reqwest/struct.ClientBuilder.html#errors).
    pub fn client(self) -> Result<Client> {
        let Self {
            user_agent,
            timeout,
            pool_idle_timeout,
            allow_insecure,
        } = self;

        let mut headers = HeaderMap::new();
        headers.insert(header::USER_AGENT, HeaderValue::from_str(&user_agent)?);

        let builder = reqwest::ClientBuilder::new()
            .gzip(true)
            .default_headers(headers)
            .pool_idle_timeout(pool_idle_timeout)
            .danger_accept_invalid_certs(allow_insecure);

        let reqwest_client = (match timeout {
            Some(t) => builder.timeout(t),
            None => builder,
        })
        .build()
        .map_err(ErrorKind::BuildRequestClient)?;

        Ok(Client { reqwest_client })
    }
}

/// Outcome of a successful [`Client::fetch`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fetched {
    /// Status code of the response
    pub status: StatusCode,
    /// Size of the response body in bytes
    pub bytes: usize,
    /// Time from sending the request until the body was read
    pub elapsed: Duration,
}

/// Fetches URLs on behalf of a throttled run.
///
/// See [`ClientBuilder`] which contains sane defaults for all configuration
/// options. Cloning is cheap; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct Client {
    /// Underlying `reqwest` client instance that handles the HTTP requests.
    reqwest_client: reqwest::Client,
}

impl Client {
    /// GET `url` and read the whole response body.
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::Canceled`] if `signal` fires before the body was read.
    /// - [`ErrorKind::NetworkRequest`] if the request could not be sent.
    /// - [`ErrorKind::RejectedStatusCode`] for any status outside of `2xx`.
    /// - [`ErrorKind::ReadResponseBody`] if reading the body failed.
    pub async fn fetch(&self, url: &Url, signal: &CancelSignal) -> Result<Fetched> {
        let start = Instant::now();
        let fetched = signal
            .guard(async {
                let response = self
                    .reqwest_client
                    .get(url.clone())
                    .send()
                    .await
                    .map_err(ErrorKind::NetworkRequest)?;

                let status = response.status();
                if !status.is_success() {
                    return Err(ErrorKind::RejectedStatusCode(status));
                }

                let body = response
                    .bytes()
                    .await
                    .map_err(ErrorKind::ReadResponseBody)?;
                Ok::<_, ErrorKind>(Fetched {
                    status,
                    bytes: body.len(),
                    elapsed: start.elapsed(),
                })
            })
            .await?;

        match &fetched {
            Ok(f) => debug!("{url} [{}] {} bytes in {:?}", f.status, f.bytes, f.elapsed),
            Err(e) => debug!("{url} failed: {e}"),
        }
        fetched
    }
}

/// Substitute every [`INDEX_PLACEHOLDER`] in `template` with `index` and parse
/// the result as a URL.
///
/// # Errors
///
/// Returns [`ErrorKind::ParseUrl`] if the expanded template is not a valid
/// URL.
pub fn expand_template(template: &str, index: usize) -> Result<Url> {
    let raw = template.replace(INDEX_PLACEHOLDER, &index.to_string());
    Url::parse(&raw).map_err(|e| ErrorKind::ParseUrl(e, raw))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use http::StatusCode;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use test_utils::{delayed_mock_server, mock_server};
    use url::Url;

    use super::{ClientBuilder, expand_template};
    use crate::{CancelSignal, ErrorKind};

    #[rstest]
    #[case("https://httpbin.org/delay/1?i={i}", 7, "https://httpbin.org/delay/1?i=7")]
    #[case("https://example.com/{i}/{i}", 3, "https://example.com/3/3")]
    #[case("https://example.com/static", 3, "https://example.com/static")]
    fn test_expand_template(#[case] template: &str, #[case] index: usize, #[case] expected: &str) {
        assert_eq!(
            expand_template(template, index).unwrap(),
            Url::parse(expected).unwrap()
        );
    }

    #[test]
    fn test_expand_invalid_template() {
        assert!(matches!(
            expand_template("not a url {i}", 1),
            Err(ErrorKind::ParseUrl(_, raw)) if raw == "not a url 1"
        ));
    }

    #[test]
    fn test_invalid_user_agent() {
        let result = ClientBuilder::builder()
            .user_agent("bad\nagent")
            .build()
            .client();
        assert!(matches!(result, Err(ErrorKind::InvalidHeader(_))));
    }

    #[tokio::test]
    async fn test_user_agent_is_sent() {
        use wiremock::{
            Mock, MockServer, ResponseTemplate,
            matchers::{header, method},
        };

        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("user-agent", "throttle-test/1.0"))
            .respond_with(ResponseTemplate::new(StatusCode::OK))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = ClientBuilder::builder()
            .user_agent("throttle-test/1.0")
            .build()
            .client()
            .unwrap();
        let url = Url::parse(&mock_server.uri()).unwrap();

        assert!(client.fetch(&url, &CancelSignal::new()).await.is_ok());
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let mock_server = mock_server!(StatusCode::OK, set_body_string("hello"));
        let client = ClientBuilder::default().client().unwrap();
        let url = Url::parse(&mock_server.uri()).unwrap();

        let fetched = client.fetch(&url, &CancelSignal::new()).await.unwrap();
        assert_eq!(fetched.status, StatusCode::OK);
        assert_eq!(fetched.bytes, 5);
    }

    #[tokio::test]
    async fn test_fetch_rejects_error_status() {
        let mock_server = mock_server!(StatusCode::SERVICE_UNAVAILABLE);
        let client = ClientBuilder::default().client().unwrap();
        let url = Url::parse(&mock_server.uri()).unwrap();

        assert_eq!(
            client.fetch(&url, &CancelSignal::new()).await,
            Err(ErrorKind::RejectedStatusCode(StatusCode::SERVICE_UNAVAILABLE))
        );
    }

    #[tokio::test]
    async fn test_fetch_is_canceled_by_signal() {
        let mock_server = delayed_mock_server!(StatusCode::OK, Duration::from_secs(10));
        let client = ClientBuilder::default().client().unwrap();
        let url = Url::parse(&mock_server.uri()).unwrap();

        let signal = CancelSignal::with_deadline(Duration::from_millis(50));
        assert_eq!(client.fetch(&url, &signal).await, Err(ErrorKind::Canceled));
    }

    #[tokio::test]
    async fn test_fetch_respects_timeout() {
        let mock_server = delayed_mock_server!(StatusCode::OK, Duration::from_secs(10));
        let client = ClientBuilder::builder()
            .timeout(Duration::from_millis(50))
            .build()
            .client()
            .unwrap();
        let url = Url::parse(&mock_server.uri()).unwrap();

        let result = client.fetch(&url, &CancelSignal::new()).await;
        assert!(
            matches!(&result, Err(ErrorKind::NetworkRequest(e)) if e.is_timeout()),
            "{result:?}"
        );
    }
}
