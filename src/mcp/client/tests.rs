use super::*;
use crate::core::config::FallbackTool;
use crate::mcp::transport::{
    MCP_JSON_AND_SSE_ACCEPT, MCP_JSON_CONTENT_TYPE, MCP_PROTOCOL_VERSION_HEADER,
};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Mutex as StdMutex;
use tokio::sync::Mutex;

const NEGOTIATED_VERSION: &str = "2025-03-26";

#[derive(Default)]
struct ScriptedTransport {
    probe_fails: bool,
    issue_session: bool,
    tools_list_fails: bool,
    paginate: bool,
    slow_tool_delay: Option<Duration>,
    sessions_issued: StdMutex<u32>,
    posts: StdMutex<Vec<OutboundMessage>>,
}

impl ScriptedTransport {
    fn healthy() -> Self {
        Self {
            issue_session: true,
            ..Self::default()
        }
    }

    fn posted_methods(&self) -> Vec<String> {
        self.posts
            .lock()
            .expect("posts lock")
            .iter()
            .map(|message| message.method.clone())
            .collect()
    }

    fn post_count(&self) -> usize {
        self.posts.lock().expect("posts lock").len()
    }

    fn request_ids(&self) -> Vec<i64> {
        self.posts
            .lock()
            .expect("posts lock")
            .iter()
            .filter_map(|message| {
                serde_json::from_str::<Value>(&message.payload)
                    .ok()
                    .and_then(|value| value.get("id").and_then(Value::as_i64))
            })
            .collect()
    }
}

fn json_reply(session_id: Option<String>, body: Value) -> RawReply {
    RawReply {
        session_id,
        content_type: "application/json".to_string(),
        body: body.to_string().into_bytes(),
    }
}

#[async_trait]
impl McpTransport for ScriptedTransport {
    async fn probe(&self, _timeout: Duration) -> Result<(), McpError> {
        if self.probe_fails {
            Err(McpError::Network("connection refused".to_string()))
        } else {
            Ok(())
        }
    }

    async fn post(&self, message: OutboundMessage) -> Result<RawReply, McpError> {
        self.posts.lock().expect("posts lock").push(message.clone());
        let payload: Value = serde_json::from_str(&message.payload).expect("payload is json");
        let id = payload.get("id").cloned().unwrap_or(Value::Null);

        match message.method.as_str() {
            "initialize" => {
                let session_id = self.issue_session.then(|| {
                    let mut issued = self.sessions_issued.lock().expect("session lock");
                    *issued += 1;
                    format!("s-{issued}")
                });
                Ok(json_reply(
                    session_id,
                    json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "result": {
                            "protocolVersion": NEGOTIATED_VERSION,
                            "capabilities": {},
                            "serverInfo": {"name": "cards", "version": "0.1.0"}
                        }
                    }),
                ))
            }
            "notifications/initialized" => Ok(RawReply {
                session_id: None,
                content_type: String::new(),
                body: Vec::new(),
            }),
            "tools/list" if self.tools_list_fails => Err(McpError::HttpStatus {
                status: 500,
                body: "boom".to_string(),
            }),
            "tools/list" => {
                let cursor = payload["params"]["cursor"].as_str().map(str::to_string);
                let result = match (self.paginate, cursor.as_deref()) {
                    (true, None) => json!({
                        "tools": [{"name": "get_card_info", "description": "Card details"}],
                        "nextCursor": "page-2"
                    }),
                    (true, Some(_)) => json!({
                        "tools": [{"name": "slow_search", "inputSchema": {"type": "object"}}]
                    }),
                    (false, _) => json!({
                        "tools": [
                            {"name": "get_card_info", "description": "Card details"},
                            {"name": "slow_search"}
                        ]
                    }),
                };
                Ok(json_reply(
                    None,
                    json!({"jsonrpc": "2.0", "id": id, "result": result}),
                ))
            }
            "tools/call" => {
                if payload["params"]["name"] == "slow_search" {
                    if let Some(delay) = self.slow_tool_delay {
                        tokio::time::sleep(delay).await;
                    }
                }
                let progress = json!({"jsonrpc": "2.0", "id": id, "result": {"progress": 0.1}});
                let final_frame = json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": {"content": [{"type": "text", "text": format!("result for {}", id)}]}
                });
                let trailer = json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": {"content": [], "status": "stream complete, nothing further to report"}
                });
                let body = format!(
                    "event: message\ndata: {progress}\n\nevent: message\ndata: {final_frame}\n\nevent: message\ndata: {trailer}\n\n"
                );
                Ok(RawReply {
                    session_id: None,
                    content_type: "text/event-stream".to_string(),
                    body: body.into_bytes(),
                })
            }
            other => panic!("unexpected method {other}"),
        }
    }
}

fn settings() -> McpSettings {
    McpSettings {
        timeout_ms: 1_000,
        fallback_tools: vec![FallbackTool {
            name: "get_event_data".to_string(),
            description: "Events".to_string(),
        }],
        ..McpSettings::default()
    }
}

fn client_with(transport: &Arc<ScriptedTransport>, settings: McpSettings) -> McpSessionClient {
    McpSessionClient::new(settings, Arc::clone(transport) as Arc<dyn McpTransport>)
}

#[tokio::test]
async fn handshake_connects_and_attaches_session_id() {
    let transport = Arc::new(ScriptedTransport::healthy());
    let client = client_with(&transport, settings());

    assert_eq!(client.initialize().await, ConnectionState::Connected);

    let snapshot = client.snapshot().await;
    assert_eq!(snapshot.session_id.as_deref(), Some("s-1"));
    assert_eq!(
        snapshot.negotiated_protocol_version.as_deref(),
        Some(NEGOTIATED_VERSION)
    );
    assert_eq!(
        client.tool_names().await,
        vec!["get_card_info".to_string(), "slow_search".to_string()]
    );
    assert_eq!(
        transport.posted_methods(),
        vec!["initialize", "notifications/initialized", "tools/list"]
    );

    let posts = transport.posts.lock().expect("posts lock").clone();
    assert_eq!(posts[0].session_id, None);
    assert_eq!(posts[0].protocol_version, McpSettings::default().protocol_version);
    assert_eq!(posts[1].session_id.as_deref(), Some("s-1"));
    assert_eq!(posts[2].session_id.as_deref(), Some("s-1"));
    assert_eq!(posts[2].protocol_version, NEGOTIATED_VERSION);
}

#[tokio::test]
async fn unknown_tool_fails_without_network_round_trip() {
    let transport = Arc::new(ScriptedTransport::healthy());
    let client = client_with(&transport, settings());
    client.initialize().await;
    let before = transport.post_count();

    let response = client.call_tool("get_weather", json!({})).await;

    assert!(!response.success);
    let error = response.error.expect("error message");
    assert!(error.contains("get_weather"), "{error}");
    assert!(error.contains("get_card_info, slow_search"), "{error}");
    assert_eq!(transport.post_count(), before);
}

#[tokio::test]
async fn disconnected_client_refuses_calls() {
    let transport = Arc::new(ScriptedTransport::healthy());
    let client = client_with(&transport, settings());

    let err = client
        .try_call_tool("get_card_info", json!({}))
        .await
        .expect_err("not connected");
    assert_eq!(err, McpError::NotConnected);
    assert_eq!(transport.post_count(), 0);
}

#[tokio::test]
async fn call_returns_the_frame_carrying_content() {
    let transport = Arc::new(ScriptedTransport::healthy());
    let client = client_with(&transport, settings());
    client.initialize().await;

    let response = client
        .call_tool("get_card_info", json!({"card_id": "gold"}))
        .await;

    assert!(response.success, "{:?}", response.error);
    let request_id = *transport.request_ids().last().expect("call id");
    assert_eq!(response.extract_text(), format!("result for {request_id}"));
}

#[tokio::test]
async fn timeout_is_reported_while_concurrent_call_succeeds() {
    let transport = Arc::new(ScriptedTransport {
        slow_tool_delay: Some(Duration::from_millis(500)),
        ..ScriptedTransport::healthy()
    });
    let client = Arc::new(client_with(
        &transport,
        McpSettings {
            timeout_ms: 100,
            ..settings()
        },
    ));
    client.initialize().await;
    let handshake_posts = transport.post_count();

    let slow_client = Arc::clone(&client);
    let slow = tokio::spawn(async move {
        slow_client
            .try_call_tool("slow_search", json!({"q": "lounge"}))
            .await
    });
    for _ in 0..50 {
        if transport.post_count() > handshake_posts {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert_eq!(transport.post_count(), handshake_posts + 1, "slow call in flight");

    let response = client.call_tool("get_card_info", json!({})).await;
    assert!(response.success, "{:?}", response.error);
    assert!(!slow.is_finished());

    let err = slow
        .await
        .expect("slow task")
        .expect_err("slow call should time out");
    assert!(err.is_timeout(), "{err}");
    assert_eq!(client.connection_state().await, ConnectionState::Connected);

    let response = client.call_tool("get_card_info", json!({})).await;
    assert!(response.success, "{:?}", response.error);
}

#[tokio::test]
async fn cancelled_call_reports_cancellation() {
    let transport = Arc::new(ScriptedTransport {
        slow_tool_delay: Some(Duration::from_millis(500)),
        ..ScriptedTransport::healthy()
    });
    let client = client_with(&transport, settings());
    client.initialize().await;

    let token = CancellationToken::new();
    token.cancel();
    let response = client
        .call_tool_with_cancel("slow_search", json!({}), &token)
        .await;

    assert!(!response.success);
    assert_eq!(
        response.error.as_deref(),
        Some("MCP tools/call request was cancelled.")
    );
    assert_eq!(client.connection_state().await, ConnectionState::Connected);
}

#[tokio::test]
async fn concurrent_calls_use_unique_request_ids() {
    let transport = Arc::new(ScriptedTransport::healthy());
    let client = Arc::new(client_with(&transport, settings()));
    client.initialize().await;

    let calls = (0..12).map(|index| {
        let client = Arc::clone(&client);
        tokio::spawn(async move {
            client
                .call_tool("get_card_info", json!({"index": index}))
                .await
        })
    });
    for response in futures_util::future::join_all(calls).await {
        assert!(response.expect("task").success);
    }

    let mut ids = transport.request_ids();
    let total = ids.len();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), total);
    assert_eq!(ids.first(), Some(&1));
}

#[tokio::test]
async fn failed_probe_degrades_to_fallback_catalogue() {
    let transport = Arc::new(ScriptedTransport {
        probe_fails: true,
        ..ScriptedTransport::healthy()
    });
    let client = client_with(&transport, settings());

    assert_eq!(client.initialize().await, ConnectionState::Degraded);
    assert_eq!(client.tool_names().await, vec!["get_event_data".to_string()]);
    assert_eq!(transport.post_count(), 0);

    let report = client.test_connection().await;
    assert!(!report.success);
    assert!(report.message.contains("connection refused"), "{}", report.message);
}

#[tokio::test]
async fn tools_list_failure_keeps_session_but_degrades() {
    let transport = Arc::new(ScriptedTransport {
        tools_list_fails: true,
        ..ScriptedTransport::healthy()
    });
    let client = client_with(&transport, settings());

    assert_eq!(client.initialize().await, ConnectionState::Degraded);
    let snapshot = client.snapshot().await;
    assert_eq!(snapshot.session_id.as_deref(), Some("s-1"));
    assert_eq!(snapshot.tools.len(), 1);
    assert_eq!(
        snapshot.last_error.as_deref(),
        Some("HTTP error: 500 - boom")
    );
}

#[tokio::test]
async fn missing_session_id_skips_initialized_notification() {
    let transport = Arc::new(ScriptedTransport::default());
    let client = client_with(&transport, settings());

    assert_eq!(client.initialize().await, ConnectionState::Connected);
    assert_eq!(client.session_id().await, None);
    assert_eq!(transport.posted_methods(), vec!["initialize", "tools/list"]);
}

#[tokio::test]
async fn tool_list_follows_next_cursor() {
    let transport = Arc::new(ScriptedTransport {
        paginate: true,
        ..ScriptedTransport::healthy()
    });
    let client = client_with(&transport, settings());
    client.initialize().await;

    assert_eq!(
        client.tool_names().await,
        vec!["get_card_info".to_string(), "slow_search".to_string()]
    );
    assert_eq!(
        transport.posted_methods(),
        vec![
            "initialize",
            "notifications/initialized",
            "tools/list",
            "tools/list"
        ]
    );
}

#[tokio::test]
async fn reconnect_replays_handshake_with_fresh_session() {
    let transport = Arc::new(ScriptedTransport::healthy());
    let client = client_with(&transport, settings());
    client.initialize().await;
    assert_eq!(client.session_id().await.as_deref(), Some("s-1"));

    client.disconnect().await;
    assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
    assert!(client.tools().await.is_empty());

    assert!(client.reconnect().await);
    assert_eq!(client.session_id().await.as_deref(), Some("s-2"));

    let initialize_posts = transport
        .posts
        .lock()
        .expect("posts lock")
        .iter()
        .filter(|message| message.method == "initialize")
        .map(|message| message.session_id.clone())
        .collect::<Vec<_>>();
    assert_eq!(initialize_posts, vec![None, None]);
}

type CapturedHttpRequests = Arc<Mutex<Vec<CapturedRequest>>>;

#[derive(Debug, Clone)]
struct CapturedRequest {
    request_line: String,
    method: String,
    headers: Vec<(String, String)>,
}

impl CapturedRequest {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

async fn read_http_request(
    stream: &mut tokio::net::TcpStream,
) -> Result<(String, Vec<(String, String)>, Vec<u8>), String> {
    use tokio::io::AsyncReadExt;

    let mut buffer = Vec::new();
    let mut header_end = None;
    while header_end.is_none() {
        let mut chunk = [0_u8; 1024];
        let read = stream
            .read(&mut chunk)
            .await
            .map_err(|err| err.to_string())?;
        if read == 0 {
            return Err("Unexpected EOF while reading HTTP headers".to_string());
        }
        buffer.extend_from_slice(&chunk[..read]);
        header_end = buffer
            .windows(4)
            .position(|window| window == b"\r\n\r\n")
            .map(|index| index + 4);
    }

    let header_end = header_end.expect("header end should exist");
    let header_text =
        std::str::from_utf8(&buffer[..header_end]).map_err(|err| err.to_string())?;
    let mut lines = header_text.split("\r\n").filter(|line| !line.is_empty());
    let request_line = lines
        .next()
        .ok_or_else(|| "Missing HTTP request line".to_string())?
        .to_string();

    let mut headers = Vec::new();
    let mut content_length = 0_usize;
    for line in lines {
        let mut parts = line.splitn(2, ':');
        let Some(name) = parts.next() else {
            continue;
        };
        let value = parts.next().unwrap_or_default().trim().to_string();
        if name.eq_ignore_ascii_case("content-length") {
            content_length = value.parse::<usize>().map_err(|err| err.to_string())?;
        }
        headers.push((name.to_string(), value));
    }

    let mut body = buffer[header_end..].to_vec();
    while body.len() < content_length {
        let mut chunk = vec![0_u8; content_length.saturating_sub(body.len())];
        let read = stream
            .read(&mut chunk)
            .await
            .map_err(|err| err.to_string())?;
        if read == 0 {
            return Err("Unexpected EOF while reading HTTP body".to_string());
        }
        body.extend_from_slice(&chunk[..read]);
    }
    body.truncate(content_length);

    Ok((request_line, headers, body))
}

fn http_response(status: &str, extra_headers: &str, content_type: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {status}\r\ncontent-type: {content_type}\r\n{extra_headers}connection: close\r\ncontent-length: {}\r\n\r\n{body}",
        body.len()
    )
}

fn bypass_proxies() {
    for var in [
        "HTTP_PROXY",
        "http_proxy",
        "HTTPS_PROXY",
        "https_proxy",
        "ALL_PROXY",
        "all_proxy",
    ] {
        std::env::remove_var(var);
    }
    std::env::set_var("NO_PROXY", "*");
    std::env::set_var("no_proxy", "*");
}

/// Answers each accepted connection with the next canned response and
/// returns the request lines it saw.
async fn serve_canned_responses(
    responses: Vec<String>,
) -> (
    std::net::SocketAddr,
    tokio::task::JoinHandle<Result<Vec<String>, String>>,
) {
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener should bind");
    let addr = listener.local_addr().expect("local addr should resolve");
    let task = tokio::spawn(async move {
        let mut request_lines = Vec::new();
        for response in responses {
            let (mut stream, _) = listener.accept().await.map_err(|err| err.to_string())?;
            let (request_line, _, _) = read_http_request(&mut stream).await?;
            request_lines.push(request_line);
            stream
                .write_all(response.as_bytes())
                .await
                .map_err(|err| err.to_string())?;
        }
        Ok(request_lines)
    });
    (addr, task)
}

#[tokio::test]
async fn server_error_on_liveness_probe_degrades_to_fallback_catalogue() {
    let (addr, server_task) = serve_canned_responses(vec![http_response(
        "503 Service Unavailable",
        "",
        "text/plain",
        "maintenance",
    )])
    .await;
    bypass_proxies();

    let client = McpSessionClient::with_http(McpSettings {
        base_url: format!("http://{addr}/mcp/"),
        ..settings()
    })
    .expect("client should build");

    assert_eq!(client.initialize().await, ConnectionState::Degraded);
    let snapshot = client.snapshot().await;
    assert_eq!(snapshot.last_error.as_deref(), Some("HTTP error: 503"));
    assert_eq!(snapshot.session_id, None);
    assert_eq!(client.tool_names().await, vec!["get_event_data".to_string()]);

    let request_lines = server_task
        .await
        .expect("mock server task should join")
        .expect("mock server should succeed");
    assert_eq!(request_lines.len(), 1);
    assert!(request_lines[0].starts_with("GET /mcp/"));
}

#[tokio::test]
async fn non_success_post_surfaces_status_and_body() {
    let (addr, server_task) = serve_canned_responses(vec![http_response(
        "502 Bad Gateway",
        "",
        "text/plain",
        "upstream down",
    )])
    .await;
    bypass_proxies();

    let transport = HttpTransport::new(&McpSettings {
        base_url: format!("http://{addr}/mcp/"),
        ..settings()
    })
    .expect("transport should build");
    let err = transport
        .post(OutboundMessage {
            method: "tools/call".to_string(),
            payload: json!({"jsonrpc": "2.0", "id": 7, "method": "tools/call"}).to_string(),
            session_id: Some("s-1".to_string()),
            protocol_version: NEGOTIATED_VERSION.to_string(),
        })
        .await
        .expect_err("502 should fail");

    assert_eq!(
        err,
        McpError::HttpStatus {
            status: 502,
            body: "upstream down".to_string(),
        }
    );
    assert_eq!(err.to_string(), "HTTP error: 502 - upstream down");

    let request_lines = server_task
        .await
        .expect("mock server task should join")
        .expect("mock server should succeed");
    assert!(request_lines[0].starts_with("POST /mcp/"));
}

#[tokio::test]
async fn streamable_http_end_to_end_handshake_and_call() {
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener should bind");
    let addr = listener.local_addr().expect("local addr should resolve");
    let captured_requests: CapturedHttpRequests = Arc::new(Mutex::new(Vec::new()));
    let captured_for_server = Arc::clone(&captured_requests);

    let server_task = tokio::spawn(async move {
        for _ in 0..5 {
            let (mut stream, _) = listener.accept().await.map_err(|err| err.to_string())?;
            let (request_line, headers, body) = read_http_request(&mut stream).await?;

            let body_json = if body.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice::<Value>(&body).map_err(|err| err.to_string())?
            };
            let method = body_json
                .get("method")
                .and_then(|value| value.as_str())
                .unwrap_or_default()
                .to_string();
            let id = body_json.get("id").cloned().unwrap_or(Value::Null);

            captured_for_server.lock().await.push(CapturedRequest {
                request_line: request_line.clone(),
                method: method.clone(),
                headers,
            });

            let response = if request_line.starts_with("GET") {
                http_response("405 Method Not Allowed", "", "text/plain", "")
            } else if method == "initialize" {
                let body = json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": {
                        "protocolVersion": NEGOTIATED_VERSION,
                        "capabilities": {"tools": {}},
                        "serverInfo": {"name": "mock", "version": "0.1.0"}
                    }
                })
                .to_string();
                http_response(
                    "200 OK",
                    "mcp-session-id: test-session\r\n",
                    "application/json",
                    &body,
                )
            } else if method == "notifications/initialized" {
                http_response("202 Accepted", "", "application/json", "")
            } else if method == "tools/list" {
                let frame = json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": {"tools": [{"name": "get_card_info", "inputSchema": {"type": "object"}}]}
                });
                http_response(
                    "200 OK",
                    "",
                    "Text/Event-Stream; Charset=UTF-8",
                    &format!("event: message\ndata: {frame}\n\n"),
                )
            } else {
                let progress = json!({"jsonrpc": "2.0", "method": "notifications/progress", "params": {"progress": 1}});
                let result = json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": {"content": [{"type": "text", "text": "Gold card: no annual fee"}]}
                });
                http_response(
                    "200 OK",
                    "",
                    "text/event-stream",
                    &format!("data: {progress}\n\ndata: not-json\n\ndata: {result}\n\n"),
                )
            };

            stream
                .write_all(response.as_bytes())
                .await
                .map_err(|err| err.to_string())?;
        }
        Ok::<(), String>(())
    });

    bypass_proxies();

    let settings = McpSettings {
        base_url: format!("http://{addr}/mcp/"),
        ..McpSettings::default()
    };
    let client = McpSessionClient::with_http(settings).expect("client should build");

    assert_eq!(client.initialize().await, ConnectionState::Connected);
    assert_eq!(client.session_id().await.as_deref(), Some("test-session"));

    let response = client
        .call_tool("get_card_info", json!({"card_id": "gold"}))
        .await;
    assert!(response.success, "{:?}", response.error);
    assert_eq!(response.extract_text(), "Gold card: no annual fee");

    server_task
        .await
        .expect("mock server task should join")
        .expect("mock server should succeed");

    let captured = captured_requests.lock().await.clone();
    assert_eq!(captured.len(), 5);
    assert!(captured[0].request_line.starts_with("GET /mcp/"));
    let methods = captured[1..]
        .iter()
        .map(|request| request.method.as_str())
        .collect::<Vec<_>>();
    assert_eq!(
        methods,
        vec![
            "initialize",
            "notifications/initialized",
            "tools/list",
            "tools/call"
        ]
    );

    for request in &captured[1..] {
        assert_eq!(request.header("accept"), Some(MCP_JSON_AND_SSE_ACCEPT));
        assert_eq!(request.header("content-type"), Some(MCP_JSON_CONTENT_TYPE));
        assert_eq!(request.header("cache-control"), Some("no-cache"));
        assert!(request
            .header("user-agent")
            .is_some_and(|agent| agent.starts_with("parley/")));
    }
    assert_eq!(captured[1].header("mcp-session-id"), None);
    assert_eq!(
        captured[1].header(MCP_PROTOCOL_VERSION_HEADER),
        Some(McpSettings::default().protocol_version.as_str())
    );
    for request in &captured[2..] {
        assert_eq!(request.header("mcp-session-id"), Some("test-session"));
        assert_eq!(
            request.header(MCP_PROTOCOL_VERSION_HEADER),
            Some(NEGOTIATED_VERSION)
        );
    }
}
