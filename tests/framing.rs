//! Wire framing properties: dot-stuffing and status/body parsing under
//! arbitrary TCP chunk boundaries.

mod common;

use common::{Article, MockNntpServer, ServerOptions};
use nzb_engine::{NntpConnection, TcpTransport};
use std::collections::HashMap;
use std::sync::Arc;

async fn connect(server: &MockNntpServer) -> NntpConnection {
    let provider = Arc::new(server.provider("test"));
    let mut conn = NntpConnection::new(provider, Arc::new(TcpTransport::new()));
    conn.ensure_connected().await.unwrap();
    conn
}

#[tokio::test]
async fn test_dot_stuffed_lines_are_destuffed_once() {
    // Body lines starting with '.' go over the wire stuffed; the client
    // must remove exactly one dot and keep reading
    let body = b".leading dot\r\n..two dots\r\nplain\r\n".to_vec();
    let mut articles = HashMap::new();
    articles.insert("stuffed@test".to_string(), Article::Body(body));

    let server = MockNntpServer::start(articles).await;
    let mut conn = connect(&server).await;

    let fetched = conn.fetch_body("stuffed@test", None).await.unwrap();
    assert_eq!(fetched, b".leading dot\r\n..two dots\r\nplain\r\n");
}

#[tokio::test]
async fn test_lone_dot_data_line_does_not_terminate() {
    // A payload line that IS a dot arrives stuffed as ".." and must be
    // delivered, not treated as the terminator
    let body = b"before\r\n.\r\nafter\r\n".to_vec();
    let mut articles = HashMap::new();
    articles.insert("dotline@test".to_string(), Article::Body(body));

    let server = MockNntpServer::start(articles).await;
    let mut conn = connect(&server).await;

    let fetched = conn.fetch_body("dotline@test", None).await.unwrap();
    assert_eq!(fetched, b"before\r\n.\r\nafter\r\n");
}

#[tokio::test]
async fn test_connection_reusable_after_terminator() {
    // The terminator ends exactly one body; the next command runs on the
    // same connection
    let mut articles = HashMap::new();
    articles.insert("first@test".to_string(), Article::Body(b"one\r\n".to_vec()));
    articles.insert("second@test".to_string(), Article::Body(b"two\r\n".to_vec()));

    let server = MockNntpServer::start(articles).await;
    let mut conn = connect(&server).await;

    assert_eq!(conn.fetch_body("first@test", None).await.unwrap(), b"one\r\n");
    assert_eq!(conn.fetch_body("second@test", None).await.unwrap(), b"two\r\n");
    assert_eq!(server.peak_connections(), 1);
}

#[tokio::test]
async fn test_framing_survives_arbitrary_chunk_boundaries() {
    // The server fragments everything it writes; responses must parse
    // identically whatever the splits are
    for chunk_size in [1usize, 2, 3, 7] {
        let body = b"data line one\r\n.\r\n..stuffed\r\nlast\r\n".to_vec();
        let mut articles = HashMap::new();
        articles.insert("chunked@test".to_string(), Article::Body(body));

        let server = MockNntpServer::start_with_options(
            articles,
            ServerOptions {
                chunk_size,
                ..Default::default()
            },
        )
        .await;
        let mut conn = connect(&server).await;

        let fetched = conn.fetch_body("chunked@test", None).await.unwrap();
        assert_eq!(
            fetched, b"data line one\r\n.\r\n..stuffed\r\nlast\r\n",
            "chunk size {}",
            chunk_size
        );
    }
}

#[tokio::test]
async fn test_consecutive_responses_parse_separately() {
    // Two commands back to back: each status/body pair is consumed
    // exactly once even when the server coalesces writes (chunk large)
    let mut articles = HashMap::new();
    articles.insert("a@test".to_string(), Article::Body(b"alpha\r\n".to_vec()));
    articles.insert("b@test".to_string(), Article::NotFound);

    let server = MockNntpServer::start(articles).await;
    let mut conn = connect(&server).await;

    assert!(conn.fetch_body("a@test", None).await.is_ok());
    // 430 on the second; the error must not desynchronize the parse of
    // the first
    assert!(conn.fetch_body("b@test", None).await.is_err());
}

#[tokio::test]
async fn test_group_selection() {
    let mut articles = HashMap::new();
    articles.insert("g@test".to_string(), Article::Body(b"x\r\n".to_vec()));

    let server = MockNntpServer::start(articles).await;
    let mut conn = connect(&server).await;

    conn.select_group("alt.binaries.test").await.unwrap();
    assert_eq!(conn.current_group(), Some("alt.binaries.test"));
    // Re-selecting the same group is a no-op
    conn.select_group("alt.binaries.test").await.unwrap();
}

#[tokio::test]
async fn test_authentication_handshake() {
    let mut articles = HashMap::new();
    articles.insert("auth@test".to_string(), Article::Body(b"ok\r\n".to_vec()));

    let server = MockNntpServer::start_with_options(
        articles,
        ServerOptions {
            require_auth: true,
            ..Default::default()
        },
    )
    .await;

    let mut provider = server.provider("auth");
    provider.username = Some("user".to_string());
    provider.password = Some("pass".to_string());

    let mut conn = NntpConnection::new(Arc::new(provider), Arc::new(TcpTransport::new()));
    conn.ensure_connected().await.unwrap();
    assert_eq!(conn.fetch_body("auth@test", None).await.unwrap(), b"ok\r\n");
}
