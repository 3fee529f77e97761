//! HTTP-01 challenge responder
//!
//! Serves `GET /.well-known/acme-challenge/<token>` from the shared
//! [`ChallengeManager`]. Everything else is answered with 404.

use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::{Method, Request, Response, StatusCode};
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::challenge::ChallengeManager;

/// Minimal HTTP/1 server answering ACME HTTP-01 validation requests
#[derive(Debug)]
pub struct ChallengeServer {
    listener: TcpListener,
    challenges: ChallengeManager,
}

impl ChallengeServer {
    pub async fn bind(addr: SocketAddr, challenges: ChallengeManager) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            challenges,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) {
        match self.listener.local_addr() {
            Ok(addr) => info!(address = %addr, "Challenge responder listening"),
            Err(e) => warn!(error = %e, "Challenge responder address unavailable"),
        }

        loop {
            let (stream, peer) = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "Failed to accept challenge connection");
                        continue;
                    }
                },
            };

            let challenges = self.challenges.clone();
            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let response = respond(&challenges, &req);
                    async move { Ok::<_, Infallible>(response) }
                });
                if let Err(e) = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await
                {
                    debug!(peer = %peer, error = %e, "Challenge connection ended with error");
                }
            });
        }

        info!("Challenge responder stopped");
    }
}

/// Build the response for a single request
pub fn respond<B>(challenges: &ChallengeManager, req: &Request<B>) -> Response<Full<Bytes>> {
    if req.method() != Method::GET && req.method() != Method::HEAD {
        return text(StatusCode::METHOD_NOT_ALLOWED, "method not allowed");
    }

    let Some(token) = ChallengeManager::extract_token(req.uri().path()) else {
        return text(StatusCode::NOT_FOUND, "not found");
    };

    match challenges.response(token) {
        Some(key_authorization) => {
            trace!(token = %token, "Serving HTTP-01 key authorization");
            text(StatusCode::OK, key_authorization)
        }
        None => {
            debug!(token = %token, "Unknown HTTP-01 token requested");
            text(StatusCode::NOT_FOUND, "not found")
        }
    }
}

fn text(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use certpilot_common::Domain;
    use http_body_util::BodyExt;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn request(method: Method, path: &str) -> Request<()> {
        Request::builder()
            .method(method)
            .uri(path)
            .body(())
            .unwrap()
    }

    async fn body_string(response: Response<Full<Bytes>>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_serves_registered_token() {
        let challenges = ChallengeManager::new();
        challenges.register(&Domain::new("app.example.com"), "tok", "tok.thumb");

        let response = respond(
            &challenges,
            &request(Method::GET, "/.well-known/acme-challenge/tok"),
        );
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "tok.thumb");
    }

    #[test]
    fn test_unknown_token_and_paths() {
        let challenges = ChallengeManager::new();
        let unknown = respond(
            &challenges,
            &request(Method::GET, "/.well-known/acme-challenge/nope"),
        );
        assert_eq!(unknown.status(), StatusCode::NOT_FOUND);

        let other = respond(&challenges, &request(Method::GET, "/healthz"));
        assert_eq!(other.status(), StatusCode::NOT_FOUND);

        let post = respond(
            &challenges,
            &request(Method::POST, "/.well-known/acme-challenge/tok"),
        );
        assert_eq!(post.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_server_over_tcp() {
        let challenges = ChallengeManager::new();
        challenges.register(&Domain::new("app.example.com"), "abc", "abc.key");

        let server = ChallengeServer::bind("127.0.0.1:0".parse().unwrap(), challenges)
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(server.run(shutdown.clone()));

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(
                b"GET /.well-known/acme-challenge/abc HTTP/1.1\r\nHost: app.example.com\r\nConnection: close\r\n\r\n",
            )
            .await
            .unwrap();
        let mut raw = String::new();
        stream.read_to_string(&mut raw).await.unwrap();

        assert!(raw.starts_with("HTTP/1.1 200 OK"));
        assert!(raw.ends_with("abc.key"));

        shutdown.cancel();
        handle.await.unwrap();
    }
}
