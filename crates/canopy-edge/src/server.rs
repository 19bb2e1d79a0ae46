//! The network-facing edge server.
//!
//! `EdgeServer` runs a hyper HTTP/1.1 server, turns each request into an
//! [`EdgeRequest`], and answers with whatever the router returns.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::message::{EdgeRequest, EdgeResponse, parse_cookie_header};
use crate::router::EdgeRouter;

pub struct EdgeServer {
    bind_addr: SocketAddr,
    router: Arc<EdgeRouter>,
}

impl EdgeServer {
    pub fn new(bind_addr: SocketAddr, router: Arc<EdgeRouter>) -> Self {
        Self { bind_addr, router }
    }

    /// Serve until `shutdown` changes.
    pub async fn serve(self, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.bind_addr)
            .await
            .with_context(|| format!("failed to bind edge server on {}", self.bind_addr))?;
        self.serve_on(listener, shutdown).await
    }

    /// Serve on an already-bound listener.
    pub async fn serve_on(
        self,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        let local = listener.local_addr().context("listener has no address")?;
        info!(addr = %local, "edge listening");

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer_addr) = accepted.context("accept failed")?;
                    let router = self.router.clone();

                    tokio::spawn(async move {
                        let io = TokioIo::new(stream);
                        let svc = service_fn(move |req: Request<Incoming>| {
                            let router = router.clone();
                            async move {
                                Ok::<_, hyper::Error>(handle(&router, req).await)
                            }
                        });

                        if let Err(e) = http1::Builder::new().serve_connection(io, svc).await {
                            debug!(%peer_addr, error = %e, "connection error");
                        }
                    });
                }
                _ = shutdown.changed() => {
                    info!("edge shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}

async fn handle(router: &EdgeRouter, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let head_only = req.method() == hyper::Method::HEAD;
    let edge_request = match to_edge_request(req).await {
        Ok(r) => r,
        Err(e) => {
            error!(error = %e, "failed to read request body");
            return plain(StatusCode::BAD_REQUEST, "Bad Request");
        }
    };

    let response = router.dispatch(edge_request).await;
    to_http_response(response, head_only)
}

async fn to_edge_request(req: Request<Incoming>) -> Result<EdgeRequest, hyper::Error> {
    let (parts, body) = req.into_parts();
    let mut edge = EdgeRequest::new(parts.method.as_str(), parts.uri.path());
    if let Some(query) = parts.uri.query() {
        edge = edge.with_query(query);
    }
    for (name, value) in &parts.headers {
        let Ok(value) = value.to_str() else { continue };
        if name == hyper::header::COOKIE {
            edge.cookies.extend(parse_cookie_header(value));
        } else {
            edge = edge.with_header(name.as_str(), value);
        }
    }
    edge.body = body.collect().await?.to_bytes().to_vec();
    Ok(edge)
}

fn to_http_response(response: EdgeResponse, head_only: bool) -> Response<Full<Bytes>> {
    let status = StatusCode::from_u16(response.status_code).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut builder = Response::builder().status(status);
    for (name, value) in &response.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    let body = if head_only {
        Bytes::new()
    } else {
        Bytes::from(response.body)
    };
    builder.body(Full::new(body)).unwrap_or_else(|e| {
        error!(error = %e, "origin returned an unrepresentable response");
        plain(StatusCode::BAD_GATEWAY, "Bad Gateway")
    })
}

fn plain(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::origin::tests::compute_origin;
    use crate::origin::{ObjectStoreOrigin, OriginRegistry};
    use crate::route::{Route, RouteTable};
    use canopy_state::StateStore;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn router() -> (Arc<EdgeRouter>, Arc<StateStore>) {
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        let mut origins = OriginRegistry::new();
        let compute = origins
            .register_compute(Arc::new(compute_origin(vec![])))
            .unwrap();
        let assets = origins
            .register_object_store(Arc::new(ObjectStoreOrigin::new("assets", store.clone())))
            .unwrap();
        let table = RouteTable::build(
            vec![
                Route::new("/*", compute).unwrap(),
                Route::new("/_static/*", assets).unwrap(),
            ],
            origins,
        )
        .unwrap();
        (Arc::new(EdgeRouter::new(table)), store)
    }

    async fn raw_get(addr: SocketAddr, path: &str) -> String {
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let request = format!("GET {path} HTTP/1.1\r\nhost: edge\r\nconnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut out = String::new();
        stream.read_to_string(&mut out).await.unwrap();
        out
    }

    #[test]
    fn unrepresentable_status_becomes_bad_gateway() {
        let resp = to_http_response(EdgeResponse::new(42, "x"), false);
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn head_responses_have_no_body() {
        let resp = to_http_response(EdgeResponse::new(200, "hello"), true);
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(hyper::body::Body::size_hint(resp.body()).exact(), Some(0));
    }

    #[tokio::test]
    async fn serves_static_and_dynamic_then_shuts_down() {
        let (router, store) = router();
        store.put_object("_static/site.css", b"body{}").unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = watch::channel(false);
        let server = tokio::spawn(EdgeServer::new(addr, router).serve_on(listener, rx));

        let css = raw_get(addr, "/_static/site.css").await;
        assert!(css.starts_with("HTTP/1.1 200"));
        assert!(css.contains("text/css"));
        assert!(css.ends_with("body{}"));

        let missing = raw_get(addr, "/_static/none.js").await;
        assert!(missing.starts_with("HTTP/1.1 404"));

        let page = raw_get(addr, "/hello?x=1").await;
        assert!(page.contains("v1 /hello?x=1"));

        tx.send(true).unwrap();
        assert!(server.await.unwrap().is_ok());
    }
}
