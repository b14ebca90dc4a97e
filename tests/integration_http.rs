use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use http::StatusCode;
use http::header::{HeaderName, HeaderValue};
use reqline::prelude::{Adapter, ErrorCode, RetryPolicy, Session, TransportErrorKind};
use reqline::{HyperTransport, Redirector, duplicate_request};

/// One canned reply, served in order.
struct Reply {
    status: u16,
    location: Option<&'static str>,
    body: &'static str,
}

impl Reply {
    fn text(status: u16, body: &'static str) -> Self {
        Self {
            status,
            location: None,
            body,
        }
    }

    fn redirect(status: u16, location: &'static str) -> Self {
        Self {
            status,
            location: Some(location),
            body: "",
        }
    }
}

#[derive(Clone, Debug)]
struct Seen {
    method: String,
    path: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Seen {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(seen, _)| seen.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Serves `replies` one connection each; the thread is detached so an
/// unused reply never blocks a test from finishing.
struct MockServer {
    address: String,
    seen: Arc<Mutex<Vec<Seen>>>,
}

impl MockServer {
    fn start(replies: Vec<Reply>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock server");
        let address = listener.local_addr().expect("read local address").to_string();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);

        thread::spawn(move || {
            for (reply, stream) in replies.into_iter().zip(listener.incoming()) {
                let Ok(mut stream) = stream else { break };
                if let Ok(request) = read_request(&mut stream) {
                    log.lock().expect("lock seen requests").push(request);
                }
                let _ = write_reply(&mut stream, &reply);
            }
        });

        Self { address, seen }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.address)
    }

    fn requests(&self) -> Vec<Seen> {
        self.seen.lock().expect("lock seen requests").clone()
    }
}

fn read_request(stream: &mut TcpStream) -> std::io::Result<Seen> {
    stream.set_read_timeout(Some(Duration::from_secs(1)))?;
    let mut reader = BufReader::new(stream);

    let mut line = String::new();
    reader.read_line(&mut line)?;
    let mut parts = line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_owned();
    let path = parts.next().unwrap_or_default().to_owned();

    let mut headers = Vec::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 || line.trim_end().is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_owned(), value.trim().to_owned()));
        }
    }

    let length = headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = vec![0_u8; length];
    reader.read_exact(&mut body)?;

    Ok(Seen {
        method,
        path,
        headers,
        body,
    })
}

fn write_reply(stream: &mut TcpStream, reply: &Reply) -> std::io::Result<()> {
    let reason = StatusCode::from_u16(reply.status)
        .ok()
        .and_then(|status| status.canonical_reason())
        .unwrap_or("");
    let mut head = format!(
        "HTTP/1.1 {} {reason}\r\nContent-Length: {}\r\nConnection: close\r\n",
        reply.status,
        reply.body.len()
    );
    if let Some(location) = reply.location {
        head.push_str(&format!("Location: {location}\r\n"));
    } else {
        head.push_str("Content-Type: text/plain\r\n");
    }
    head.push_str("\r\n");
    stream.write_all(head.as_bytes())?;
    stream.write_all(reply.body.as_bytes())?;
    stream.flush()
}

fn bearer_adapter(token: &'static str) -> Adapter {
    Adapter::sync(move |mut request| {
        request.headers_mut().insert(
            http::header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}"))?,
        );
        Ok(request)
    })
}

#[tokio::test]
async fn retries_unavailable_status_then_succeeds() {
    let server = MockServer::start(vec![
        Reply::text(503, "busy"),
        Reply::text(200, "ready"),
    ]);
    let session = Session::http()
        .request_timeout(Duration::from_secs(2))
        .adapter(bearer_adapter("t0ken"))
        .retrier(RetryPolicy::standard().exponential_backoff_base(Duration::from_millis(10)))
        .try_build()
        .expect("session should build");

    let response = session
        .get(server.url("/v1/items"))
        .try_header("accept", "text/plain")
        .expect("header should parse")
        .validate()
        .send()
        .await
        .expect("second attempt should succeed");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.body(), &Bytes::from_static(b"ready"));
    assert_eq!(response.retry_count(), 1);

    let requests = server.requests();
    assert_eq!(requests.len(), 2);
    for request in &requests {
        assert_eq!(request.method, "GET");
        assert_eq!(request.path, "/v1/items");
        assert_eq!(request.header("authorization"), Some("Bearer t0ken"));
        assert!(
            request
                .header("user-agent")
                .is_some_and(|value| value.starts_with("reqline/"))
        );
    }
}

#[tokio::test]
async fn post_body_reaches_the_server() {
    let server = MockServer::start(vec![Reply::text(201, "created")]);
    let session = Session::http()
        .try_build()
        .expect("session should build");

    let response = session
        .post(server.url("/v1/items"))
        .header(
            HeaderName::from_static("content-type"),
            HeaderValue::from_static("application/json"),
        )
        .body(r#"{"name":"demo"}"#)
        .validate_status([201])
        .send()
        .await
        .expect("post should succeed");

    assert_eq!(response.status(), StatusCode::CREATED);
    let requests = server.requests();
    assert_eq!(requests[0].method, "POST");
    assert_eq!(requests[0].body, br#"{"name":"demo"}"#.to_vec());
}

#[tokio::test]
async fn redirects_are_followed_by_default() {
    let server = MockServer::start(vec![
        Reply::redirect(302, "/final"),
        Reply::text(200, "landed"),
    ]);
    let session = Session::http()
        .try_build()
        .expect("session should build");

    let response = session
        .get(server.url("/start"))
        .send()
        .await
        .expect("redirect should be followed");

    assert_eq!(response.body(), &Bytes::from_static(b"landed"));
    let paths = server
        .requests()
        .into_iter()
        .map(|request| request.path)
        .collect::<Vec<_>>();
    assert_eq!(paths, vec!["/start", "/final"]);
}

#[tokio::test]
async fn redirector_can_refuse_a_redirect() {
    let server = MockServer::start(vec![Reply::redirect(302, "/final")]);
    let session = Session::http()
        .redirect_handler(Redirector::DoNotFollow)
        .try_build()
        .expect("session should build");

    let response = session
        .get(server.url("/start"))
        .send()
        .await
        .expect("redirect response should be returned");

    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(server.requests().len(), 1);
}

#[tokio::test]
async fn refused_redirect_is_returned_even_at_the_redirect_limit() {
    let server = MockServer::start(vec![Reply::redirect(302, "/final")]);
    let session = Session::builder(HyperTransport::new().max_redirects(0))
        .redirect_handler(Redirector::DoNotFollow)
        .try_build()
        .expect("session should build");

    let response = session
        .get(server.url("/start"))
        .send()
        .await
        .expect("refused redirect should not hit the limit");

    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(server.requests().len(), 1);
}

#[tokio::test]
async fn followed_redirect_past_the_limit_fails() {
    let server = MockServer::start(vec![Reply::redirect(302, "/final")]);
    let session = Session::builder(HyperTransport::new().max_redirects(0))
        .try_build()
        .expect("session should build");

    let error = session
        .get(server.url("/start"))
        .send()
        .await
        .expect_err("a redirect past the limit should fail");

    assert_eq!(error.transport_kind(), Some(TransportErrorKind::Other));
    assert!(error.to_string().contains("redirect limit exceeded"));
    assert_eq!(server.requests().len(), 1);
}

#[tokio::test]
async fn redirector_can_rewrite_the_follow_up_request() {
    let server = MockServer::start(vec![
        Reply::redirect(307, "/moved"),
        Reply::text(200, "moved"),
    ]);
    let session = Session::http()
        .redirect_handler(Redirector::modify(|redirect, response| {
            let mut rewritten = duplicate_request(redirect);
            rewritten.headers_mut().insert(
                HeaderName::from_static("x-redirected-from"),
                HeaderValue::from(response.status().as_u16()),
            );
            Some(rewritten)
        }))
        .try_build()
        .expect("session should build");

    session
        .get(server.url("/origin"))
        .send()
        .await
        .expect("rewritten redirect should succeed");

    let requests = server.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].path, "/moved");
    assert_eq!(requests[1].header("x-redirected-from"), Some("307"));
}

#[tokio::test]
async fn validation_failure_reaches_caller_when_not_retried() {
    let server = MockServer::start(vec![Reply::text(500, "boom")]);
    let session = Session::http()
        .try_build()
        .expect("session should build");

    let error = session
        .post(server.url("/v1/jobs"))
        .validate()
        .send()
        .await
        .expect_err("500 should fail validation");

    assert_eq!(error.code(), ErrorCode::Validation);
    assert!(error.to_string().contains("500"));
}

#[tokio::test]
async fn refused_connection_is_a_connect_error() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind probe listener");
    let address = listener.local_addr().expect("read local address");
    drop(listener);

    let session = Session::builder(HyperTransport::with_connect_timeout(Duration::from_secs(1)))
        .try_build()
        .expect("session should build");
    let error = session
        .get(format!("http://{address}/"))
        .send()
        .await
        .expect_err("nothing is listening");

    assert_eq!(error.transport_kind(), Some(TransportErrorKind::Connect));
}
