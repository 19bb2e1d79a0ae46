//! HTTP forwarding to compute units.
//!
//! Every published version's `code_ref` is the `host:port` of an HTTP/1.1
//! server running that version. One connection is opened per request.

use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tracing::debug;

use canopy_core::ComputeVersion;

use crate::error::EdgeError;
use crate::message::{EdgeRequest, EdgeResponse};
use crate::origin::{BoxFuture, ComputeUnit};

pub struct HttpComputeUnit {
    timeout: Duration,
}

impl HttpComputeUnit {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn forward(
        &self,
        version: &ComputeVersion,
        request: EdgeRequest,
    ) -> Result<EdgeResponse, EdgeError> {
        let address = version.code_ref.as_str();
        let stream = TcpStream::connect(address)
            .await
            .map_err(|e| EdgeError::Invoke(format!("connect {address}: {e}")))?;

        let io = TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| EdgeError::Invoke(format!("handshake {address}: {e}")))?;

        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(error = %e, "compute connection closed with error");
            }
        });

        let outbound = to_http_request(address, request)?;
        let response = sender
            .send_request(outbound)
            .await
            .map_err(|e| EdgeError::Invoke(format!("request to {address}: {e}")))?;

        let status_code = response.status().as_u16();
        let mut edge_response = EdgeResponse::new(status_code, Vec::new());
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                edge_response = edge_response.with_header(name.as_str(), value);
            }
        }
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| EdgeError::Invoke(format!("reading body from {address}: {e}")))?
            .to_bytes();
        edge_response.body = body.to_vec();
        Ok(edge_response)
    }
}

impl ComputeUnit for HttpComputeUnit {
    fn invoke<'a>(
        &'a self,
        version: &'a ComputeVersion,
        request: EdgeRequest,
    ) -> BoxFuture<'a, Result<EdgeResponse, EdgeError>> {
        Box::pin(async move {
            tokio::time::timeout(self.timeout, self.forward(version, request))
                .await
                .map_err(|_| EdgeError::Timeout(self.timeout))?
        })
    }
}

fn to_http_request(
    address: &str,
    request: EdgeRequest,
) -> Result<http::Request<Full<Bytes>>, EdgeError> {
    let mut builder = http::Request::builder()
        .method(request.method.as_str())
        .uri(request.path_and_query())
        .header("host", address);
    for (name, value) in &request.headers {
        if name != "host" && name != "cookie" {
            builder = builder.header(name.as_str(), value.as_str());
        }
    }
    if let Some(cookies) = request.cookie_header() {
        builder = builder.header("cookie", cookies);
    }
    builder
        .body(Full::new(Bytes::from(request.body)))
        .map_err(|e| EdgeError::Invoke(format!("building request: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outbound_request_carries_query_and_cookies() {
        let req = EdgeRequest::new("post", "/cart")
            .with_query("item=7")
            .with_header("accept-language", "de")
            .with_cookie("session", "s1")
            .with_body("qty=2");
        let out = to_http_request("127.0.0.1:3000", req).unwrap();
        assert_eq!(out.method(), "POST");
        assert_eq!(out.uri(), "/cart?item=7");
        assert_eq!(out.headers()["host"], "127.0.0.1:3000");
        assert_eq!(out.headers()["accept-language"], "de");
        assert_eq!(out.headers()["cookie"], "session=s1");
    }

    #[test]
    fn repeated_cookies_are_forwarded_verbatim() {
        let mut req = EdgeRequest::get("/");
        req.cookies = crate::message::parse_cookie_header("a=1; b=2; a=3");
        let out = to_http_request("127.0.0.1:3000", req).unwrap();
        assert_eq!(out.headers()["cookie"], "a=1; b=2; a=3");
    }

    #[tokio::test]
    async fn unreachable_unit_is_an_invoke_error() {
        let unit = HttpComputeUnit::new(Duration::from_secs(2));
        let version = ComputeVersion {
            version_id: 1,
            published_at: 0,
            code_ref: "127.0.0.1:1".into(),
        };
        let err = unit.invoke(&version, EdgeRequest::get("/")).await.unwrap_err();
        assert!(matches!(err, EdgeError::Invoke(_) | EdgeError::Timeout(_)));
    }
}
