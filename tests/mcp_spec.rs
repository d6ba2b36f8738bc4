//! JSON-RPC dispatch tests.
//!
//! Tests are organized into three sections:
//! - Protocol: framing, envelopes and the built-in methods
//! - Tool calls: routing to the session thread and error mapping
//! - Session thread: timeouts, panics and shutdown

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use mailbridge::affinity::ThreadAffinityRegistry;
use mailbridge::bridge::BridgeOptions;
use mailbridge::host::sandbox::{ItemRecord, Recurrence, RuntimeEvent, SandboxHost, SandboxRuntime};
use mailbridge::host::FolderKind;
use mailbridge::lifecycle::WarmupPolicy;
use mailbridge::mcp::{self, McpServer, RpcError, SessionThread};
use serde_json::{json, Value};

fn at(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").expect("bad timestamp")
}

/// A host with one inbox message and the runtime bound to it.
fn sandbox() -> (SandboxHost, Arc<SandboxRuntime>) {
    let host = SandboxHost::new();
    host.add_item(
        FolderKind::Inbox,
        ItemRecord::mail("Quarterly numbers", "cfo@example.com")
            .with("ReceivedTime", at("2025-03-07 09:30:00")),
    );
    let runtime = Arc::new(SandboxRuntime::for_host(&host));
    (host, runtime)
}

fn spawn_session(host: &SandboxHost, runtime: &Arc<SandboxRuntime>) -> SessionThread {
    let registry = Arc::new(ThreadAffinityRegistry::new(runtime.clone()));
    SessionThread::spawn(
        registry,
        Arc::new(host.clone()),
        BridgeOptions::default(),
        WarmupPolicy::default(),
    )
    .expect("Failed to start session thread")
}

/// Helper to create a server backed by a live session.
fn setup() -> (McpServer, SessionThread, SandboxHost, Arc<SandboxRuntime>) {
    let (host, runtime) = sandbox();
    let session = spawn_session(&host, &runtime);
    let server = McpServer::new(Some(session.handle()));
    (server, session, host, runtime)
}

async fn send(server: &McpServer, request: Value) -> Value {
    let line = server
        .handle_line(&request.to_string())
        .await
        .expect("Expected a response");
    serde_json::from_str(&line).expect("Response is not JSON")
}

async fn call(server: &McpServer, name: &str, arguments: Value) -> Value {
    send(
        server,
        json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "call",
            "params": { "name": name, "arguments": arguments },
        }),
    )
    .await
}

/// Parse the JSON carried in a tool result's text block.
fn tool_payload(response: &Value) -> Value {
    let text = response["result"]["content"][0]["text"]
        .as_str()
        .unwrap_or_else(|| panic!("No text content in {}", response));
    serde_json::from_str(text).expect("Tool text is not JSON")
}

// ============================================================
// Protocol
// ============================================================

mod protocol {
    use super::*;

    #[tokio::test]
    async fn unparseable_line_is_a_parse_error() {
        let server = McpServer::new(None);

        let line = server.handle_line("{not json").await.expect("Expected a response");
        let response: Value = serde_json::from_str(&line).unwrap();

        assert_eq!(response["jsonrpc"], "2.0");
        assert_eq!(response["error"]["code"], -32700);
        assert!(response.get("id").is_none());
    }

    #[tokio::test]
    async fn request_without_method_is_invalid() {
        let server = McpServer::new(None);

        let response = send(&server, json!({ "jsonrpc": "2.0", "id": 7 })).await;

        assert_eq!(response["error"]["code"], -32600);
        assert_eq!(response["id"], 7);
    }

    #[tokio::test]
    async fn wrong_protocol_version_is_invalid() {
        let server = McpServer::new(None);

        let response = send(&server, json!({ "jsonrpc": "1.0", "id": 1, "method": "ping" })).await;

        assert_eq!(response["error"]["code"], -32600);
    }

    #[tokio::test]
    async fn unknown_method_is_not_found() {
        let server = McpServer::new(None);

        let response = send(&server, json!({ "jsonrpc": "2.0", "id": "a", "method": "frobnicate" })).await;

        assert_eq!(response["error"]["code"], -32601);
        assert_eq!(response["id"], "a");
    }

    #[tokio::test]
    async fn ping_answers_with_empty_result() {
        let server = McpServer::new(None);

        let response = send(&server, json!({ "jsonrpc": "2.0", "id": 1, "method": "ping" })).await;

        assert_eq!(response["result"], json!({}));
        assert!(response.get("error").is_none());
    }

    #[tokio::test]
    async fn initialize_reports_server_info() {
        let server = McpServer::new(None);

        let response = send(&server, json!({ "jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {} })).await;

        assert_eq!(response["result"]["serverInfo"]["name"], "mailbridge");
        assert_eq!(response["result"]["protocolVersion"], mcp::PROTOCOL_VERSION);
    }

    #[tokio::test]
    async fn notifications_and_blank_lines_get_no_response() {
        let server = McpServer::new(None);

        assert!(server.handle_line("").await.is_none());
        assert!(server.handle_line("   ").await.is_none());
        let notification = json!({ "jsonrpc": "2.0", "method": "notifications/initialized" });
        assert!(server.handle_line(&notification.to_string()).await.is_none());
    }

    #[tokio::test]
    async fn list_methods_describes_every_tool() {
        let server = McpServer::new(None);

        for method in ["list-methods", "tools/list"] {
            let response = send(&server, json!({ "jsonrpc": "2.0", "id": 1, "method": method })).await;
            let tools = response["result"]["tools"].as_array().expect("No tools array");

            assert_eq!(tools.len(), 24);
            let names: Vec<_> = tools.iter().filter_map(|t| t["name"].as_str()).collect();
            assert!(names.contains(&"list_calendar_events"));
            assert!(names.contains(&"respond_to_meeting"));
            for tool in tools {
                assert_eq!(tool["inputSchema"]["type"], "object", "{}", tool["name"]);
            }
        }
    }

    #[tokio::test]
    async fn serve_answers_every_line_and_survives_bad_input() {
        let server = McpServer::new(None);
        let input = concat!(
            "{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n",
            "garbage\n",
            "\n",
            "{\"jsonrpc\":\"2.0\",\"method\":\"notifications/initialized\"}\n",
            "{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"ping\"}\n",
        );
        let mut output = Vec::new();

        server.serve(input.as_bytes(), &mut output).await.expect("Serve failed");

        let responses: Vec<Value> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(responses.len(), 3);
        assert_eq!(responses[0]["id"], 1);
        assert_eq!(responses[1]["error"]["code"], -32700);
        assert_eq!(responses[2]["id"], 2);
    }
}

// ============================================================
// Tool calls
// ============================================================

mod tool_calls {
    use super::*;

    #[tokio::test]
    async fn unknown_tool_is_method_not_found() {
        let (server, _session, _host, _runtime) = setup();

        let response = call(&server, "defragment_mailbox", json!({})).await;

        assert_eq!(response["error"]["code"], -32601);
    }

    #[tokio::test]
    async fn calls_without_a_session_are_internal_errors() {
        let server = McpServer::new(None);

        let response = call(&server, "list_emails", json!({})).await;

        assert_eq!(response["error"]["code"], -32603);
        assert_eq!(response["error"]["message"], "Session not initialized");
    }

    #[tokio::test]
    async fn call_params_must_name_a_tool() {
        let (server, _session, _host, _runtime) = setup();

        let response = send(&server, json!({ "jsonrpc": "2.0", "id": 1, "method": "call", "params": {} })).await;

        assert_eq!(response["error"]["code"], -32602);
    }

    #[tokio::test]
    async fn list_emails_returns_text_content() {
        let (server, _session, _host, _runtime) = setup();

        let response = call(&server, "list_emails", json!({ "limit": 5 })).await;

        assert_eq!(response["result"]["content"][0]["type"], "text");
        let emails = tool_payload(&response);
        assert_eq!(emails[0]["subject"], "Quarterly numbers");
        assert_eq!(emails[0]["sender"], "cfo@example.com");
        assert_eq!(emails[0]["received_time"], "2025-03-07 09:30:00");
    }

    #[tokio::test]
    async fn tools_call_is_an_alias_of_call() {
        let (server, _session, _host, _runtime) = setup();

        let response = send(
            &server,
            json!({
                "jsonrpc": "2.0",
                "id": 3,
                "method": "tools/call",
                "params": { "name": "list_all_tasks" },
            }),
        )
        .await;

        assert_eq!(response["id"], 3);
        assert_eq!(tool_payload(&response), json!([]));
    }

    #[tokio::test]
    async fn dangling_entry_id_is_not_found() {
        let (server, _session, _host, _runtime) = setup();

        let response = call(&server, "get_email", json!({ "entry_id": "00000000DEADBEEF" })).await;

        assert_eq!(response["error"]["code"], -32001);
        assert_eq!(response["error"]["data"]["entry_id"], "00000000DEADBEEF");
    }

    #[tokio::test]
    async fn unknown_folder_is_not_found() {
        let (server, _session, host, _runtime) = setup();
        let entry_id = host.folder_items(FolderKind::Inbox)[0]
            .text("EntryID")
            .unwrap()
            .to_string();

        let response = call(&server, "move_email", json!({ "entry_id": entry_id, "folder": "Nowhere" })).await;

        assert_eq!(response["error"]["code"], -32001);
    }

    #[tokio::test]
    async fn malformed_dates_are_validation_errors() {
        let (server, _session, _host, _runtime) = setup();

        let response = call(&server, "create_task", json!({ "subject": "X", "due_date": "01/02/2025" })).await;

        assert_eq!(response["error"]["code"], -32002);
        assert_eq!(response["error"]["data"]["field"], "due_date");
    }

    #[tokio::test]
    async fn missing_arguments_are_validation_errors() {
        let (server, _session, _host, _runtime) = setup();

        let response = call(&server, "get_task", json!({})).await;

        assert_eq!(response["error"]["code"], -32002);
        assert!(response["error"]["message"].as_str().unwrap().contains("entry_id"));
    }

    #[tokio::test]
    async fn unknown_meeting_response_is_a_validation_error() {
        let (server, _session, _host, _runtime) = setup();

        let response = call(&server, "respond_to_meeting", json!({ "entry_id": "x", "response": "maybe" })).await;

        assert_eq!(response["error"]["code"], -32002);
        assert_eq!(response["error"]["data"]["field"], "response");
    }

    #[tokio::test]
    async fn task_round_trip() {
        let (server, _session, _host, _runtime) = setup();

        let created = tool_payload(&call(&server, "create_task", json!({ "subject": "X", "due_date": "2025-01-01" })).await);
        assert_eq!(created["success"], true);
        let entry_id = created["entry_id"].as_str().expect("No EntryID").to_string();

        let task = tool_payload(&call(&server, "get_task", json!({ "entry_id": entry_id })).await);
        assert_eq!(task["subject"], "X");
        assert_eq!(task["due_date"], "2025-01-01");

        let deleted = tool_payload(&call(&server, "delete_task", json!({ "entry_id": entry_id })).await);
        assert_eq!(deleted["success"], true);
        let response = call(&server, "get_task", json!({ "entry_id": entry_id })).await;
        assert_eq!(response["error"]["code"], -32001);
    }

    #[tokio::test]
    async fn zero_day_listing_does_not_expand_endless_series() {
        let (server, _session, host, _runtime) = setup();
        host.add_item(
            FolderKind::Calendar,
            ItemRecord::appointment("Standup", at("2020-01-06 09:00:00"), at("2020-01-06 09:15:00"))
                .recurring(Recurrence::weekly()),
        );

        let response = call(&server, "list_calendar_events", json!({ "days": 0 })).await;

        assert!(response["result"]["content"][0]["text"].is_string());
        assert!(host.materialized() <= 1, "materialized {}", host.materialized());
    }

    #[tokio::test]
    async fn download_attachments_writes_files() {
        let (server, _session, host, _runtime) = setup();
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let source = dir.path().join("agenda.txt");
        std::fs::write(&source, "1. Budget").expect("Failed to write file");
        let entry_id = host.add_item(
            FolderKind::Inbox,
            ItemRecord::mail("Agenda", "pm@example.com").attached(&source),
        );
        let target = dir.path().join("out");

        let download = tool_payload(
            &call(
                &server,
                "download_attachments",
                json!({ "entry_id": entry_id, "download_dir": target }),
            )
            .await,
        );

        assert_eq!(download["success"], true);
        assert_eq!(download["files"], json!([target.join("agenda.txt")]));
        assert!(target.join("agenda.txt").is_file());

        let response = call(
            &server,
            "download_attachments",
            json!({ "entry_id": entry_id, "download_dir": source }),
        )
        .await;
        assert_eq!(response["error"]["code"], -32002);
        assert_eq!(response["error"]["data"]["field"], "download_dir");
    }

    #[tokio::test]
    async fn out_of_range_day_counts_are_validation_errors() {
        let (server, _session, _host, _runtime) = setup();

        for days in [200_000_000u64, 4_000_000_000] {
            let response = call(&server, "list_calendar_events", json!({ "days": days })).await;

            assert_eq!(response["error"]["code"], -32002, "days = {}", days);
            assert_eq!(response["error"]["data"]["field"], "days");
        }

        let response = call(&server, "list_calendar_events", json!({ "days": 1 })).await;
        assert!(response["error"].is_null(), "session should keep serving: {}", response);
    }
}

// ============================================================
// Session thread
// ============================================================

mod session_thread {
    use super::*;

    #[tokio::test]
    async fn jobs_run_on_the_named_session_thread() {
        let (host, runtime) = sandbox();
        let session = spawn_session(&host, &runtime);

        let name = session
            .handle()
            .run(Duration::from_secs(5), |_| Ok(std::thread::current().name().map(String::from)))
            .await
            .expect("Job failed");

        assert_eq!(name.as_deref(), Some(mcp::SESSION_THREAD_NAME));
    }

    #[tokio::test]
    async fn slow_calls_time_out_without_killing_the_session() {
        let (host, runtime) = sandbox();
        let session = spawn_session(&host, &runtime);
        let handle = session.handle();

        let err = handle
            .run(Duration::from_millis(50), |_| {
                std::thread::sleep(Duration::from_millis(300));
                Ok(())
            })
            .await
            .unwrap_err();
        assert_eq!(err.code, mcp::INTERNAL_ERROR);
        assert_eq!(err.message, "Tool call timed out after 50ms");

        let count = handle
            .run(Duration::from_secs(5), |bridge| Ok(bridge.inbox_count().map_err(RpcError::from)?))
            .await
            .expect("Follow-up call failed");
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn panics_become_internal_errors() {
        let (host, runtime) = sandbox();
        let session = spawn_session(&host, &runtime);
        let handle = session.handle();

        let err = handle
            .run(Duration::from_secs(5), |_| -> Result<(), RpcError> { panic!("boom") })
            .await
            .unwrap_err();
        assert_eq!(err.code, mcp::INTERNAL_ERROR);
        assert!(err.message.contains("boom"));

        let still_alive = handle.run(Duration::from_secs(5), |_| Ok(true)).await;
        assert_eq!(still_alive, Ok(true));
    }

    #[tokio::test]
    async fn shutdown_releases_the_session_and_rejects_later_calls() {
        let (host, runtime) = sandbox();
        let session = spawn_session(&host, &runtime);
        let handle = session.handle();

        session.shutdown();

        assert_eq!(host.live_handles(), 0);
        let events = runtime.events();
        assert!(matches!(events[events.len() - 2], RuntimeEvent::Uninitialized { live_handles: 0, .. }));
        assert_eq!(events.last(), Some(&RuntimeEvent::FreedUnused));

        let err = handle.run(Duration::from_secs(1), |_| Ok(())).await.unwrap_err();
        assert!(err.message.contains("stopped"));
    }

    #[tokio::test]
    async fn failed_startup_is_reported() {
        let (host, runtime) = sandbox();
        host.fail_counts(2);
        let registry = Arc::new(ThreadAffinityRegistry::new(runtime.clone()));

        let result = SessionThread::spawn(
            registry,
            Arc::new(host.clone()),
            BridgeOptions::default(),
            WarmupPolicy { attempts: 2, backoff: Duration::ZERO },
        );

        assert!(result.is_err());
        assert_eq!(host.live_handles(), 0);
    }
}
