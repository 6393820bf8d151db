use std::io;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper_rustls::HttpsConnectorBuilder;
use hyper_util::client::legacy::connect::proxy::Tunnel;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client as HyperClient;
use hyper_util::rt::TokioExecutor;
use tokio::time::timeout;

use crate::config::ClientConfig;
use crate::request::HttpRequest;
use crate::response::{BufferedContent, HttpResponse};
use crate::transport::Transport;

type DirectConnector = hyper_rustls::HttpsConnector<HttpConnector>;
type ProxiedConnector = hyper_rustls::HttpsConnector<Tunnel<HttpConnector>>;

enum TransportClient {
    Direct(HyperClient<DirectConnector, Full<Bytes>>),
    Proxied(HyperClient<ProxiedConnector, Full<Bytes>>),
}

impl TransportClient {
    async fn request(
        &self,
        request: http::Request<Full<Bytes>>,
    ) -> Result<http::Response<hyper::body::Incoming>, hyper_util::client::legacy::Error> {
        match self {
            Self::Direct(client) => client.request(request).await,
            Self::Proxied(client) => client.request(request).await,
        }
    }
}

/// Default transport on hyper's pooled client with rustls TLS.
///
/// Response bodies are buffered before the response is handed back, so the
/// connection returns to the pool independently of how the caller consumes
/// the content.
pub struct HyperTransport {
    client: TransportClient,
    request_timeout: Duration,
}

impl HyperTransport {
    pub fn build(config: &ClientConfig) -> Self {
        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false);
        http_connector.set_connect_timeout(Some(config.connect_timeout_value()));
        http_connector.set_nodelay(true);

        let builder = {
            let mut builder = HyperClient::builder(TokioExecutor::new());
            builder
                .pool_idle_timeout(config.pool_idle_timeout_value())
                .pool_max_idle_per_host(config.pool_max_idle_per_host_value());
            builder
        };

        let client = match config.proxy_value() {
            Some(proxy_uri) => {
                let tunnel = Tunnel::new(proxy_uri.clone(), http_connector);
                let connector = HttpsConnectorBuilder::new()
                    .with_webpki_roots()
                    .https_or_http()
                    .enable_http1()
                    .enable_http2()
                    .wrap_connector(tunnel);
                TransportClient::Proxied(builder.build(connector))
            }
            None => {
                let connector = HttpsConnectorBuilder::new()
                    .with_webpki_roots()
                    .https_or_http()
                    .enable_http1()
                    .enable_http2()
                    .wrap_connector(http_connector);
                TransportClient::Direct(builder.build(connector))
            }
        };

        Self {
            client,
            request_timeout: config.request_timeout_value(),
        }
    }
}

#[async_trait]
impl Transport for HyperTransport {
    async fn execute(&self, request: &HttpRequest) -> io::Result<HttpResponse> {
        let body = match request.body() {
            Some(body) => Full::new(body.read_to_bytes()?),
            None => Full::new(Bytes::new()),
        };
        let mut outgoing = http::Request::builder()
            .method(request.method().clone())
            .uri(request.uri().clone())
            .body(body)
            .map_err(io::Error::other)?;
        *outgoing.headers_mut() = request.headers().clone();

        let response = match timeout(self.request_timeout, self.client.request(outgoing)).await {
            Ok(Ok(response)) => response,
            Ok(Err(error)) => return Err(io::Error::other(error)),
            Err(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "http request timed out",
                ))
            }
        };

        let (parts, incoming) = response.into_parts();
        let collected = incoming
            .collect()
            .await
            .map_err(io::Error::other)?
            .to_bytes();
        Ok(HttpResponse::new(parts.status, parts.headers)
            .content(Box::new(BufferedContent::new(collected))))
    }
}
