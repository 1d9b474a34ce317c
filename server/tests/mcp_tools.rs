//! Integration tests for the protocol engine and the three tools, driven
//! through `dispatch_request()`.

mod helpers;

use helpers::TestHarness;
use serde_json::json;

// ---------------------------------------------------------------------------
// Protocol tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn initialize_negotiates_and_advertises_tools() {
    let h = TestHarness::new();
    let resp = h.initialize().await;

    assert_eq!(resp["result"]["protocolVersion"], "2025-06-18");
    assert_eq!(resp["result"]["serverInfo"]["name"], "mydocs-mcp");
    assert_eq!(resp["result"]["capabilities"]["tools"]["listChanged"], false);
}

#[tokio::test]
async fn tools_list_exposes_the_three_tools() {
    let h = TestHarness::new();
    let resp = h
        .dispatch(json!({ "jsonrpc": "2.0", "id": 2, "method": "tools/list" }))
        .await
        .unwrap();
    let tools = resp["result"]["tools"].as_array().unwrap();
    let names: Vec<&str> = tools.iter().map(|t| t["name"].as_str().unwrap()).collect();
    assert_eq!(names, ["indexDocument", "searchDocuments", "getDocument"]);
    for tool in tools {
        assert!(tool["inputSchema"]["properties"].is_object());
        assert!(tool["description"].as_str().unwrap().len() > 10);
    }
}

#[tokio::test]
async fn ping_answers_empty_object() {
    let h = TestHarness::new();
    let resp = h
        .dispatch(json!({ "jsonrpc": "2.0", "id": 3, "method": "ping" }))
        .await
        .unwrap();
    assert_eq!(resp["result"], json!({}));
}

#[tokio::test]
async fn unknown_method_is_32601() {
    let h = TestHarness::new();
    let resp = h
        .dispatch(json!({ "jsonrpc": "2.0", "id": 4, "method": "resources/list" }))
        .await
        .unwrap();
    assert_eq!(resp["error"]["code"], -32601);
}

#[tokio::test]
async fn invalid_envelope_is_32600() {
    let h = TestHarness::new();
    let resp = h.dispatch(json!({ "id": 5, "params": {} })).await.unwrap();
    assert_eq!(resp["error"]["code"], -32600);

    let resp = h
        .dispatch(json!({ "jsonrpc": "1.0", "id": 6, "method": "ping" }))
        .await
        .unwrap();
    assert_eq!(resp["error"]["code"], -32600);
}

#[tokio::test]
async fn notifications_get_no_response() {
    let h = TestHarness::new();
    let resp = h
        .dispatch(json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }))
        .await;
    assert!(resp.is_none());
}

#[tokio::test]
async fn unknown_tool_has_stable_code() {
    let h = TestHarness::new();
    let resp = h.call_tool("nope", json!({})).await;
    let code = resp["error"]["code"].as_i64().unwrap();
    assert!((-32099..=-32000).contains(&code));
    assert_eq!(resp["error"]["data"]["code"], "TOOL_NOT_FOUND");
}

// ---------------------------------------------------------------------------
// indexDocument + searchDocuments round trip
// ---------------------------------------------------------------------------

#[tokio::test]
async fn index_then_search_finds_the_document() {
    let h = TestHarness::new();
    let path = h.write_doc("guide.md", "# Guide\n\nDocker setup for the project.\n");

    let data = h
        .call_tool_ok("indexDocument", json!({ "file_path": path.to_str().unwrap() }))
        .await;
    assert_eq!(data["status"], "indexed");
    assert!(data["tokens_indexed"].as_u64().unwrap() >= 2);
    assert!(data["document_id"].as_i64().unwrap() >= 1);

    let results = h
        .call_tool_ok("searchDocuments", json!({ "query": "docker setup", "limit": 10 }))
        .await;
    let first = &results["results"][0];
    assert_eq!(first["path"], path.to_str().unwrap());
    let matched: Vec<&str> = first["matched_tokens"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap())
        .collect();
    assert!(matched.contains(&"docker"));
    assert!(matched.contains(&"setup"));
    assert!(first["snippet"].as_str().unwrap().contains("**Docker**"));
    assert!(results["total_found"].as_u64().unwrap() >= 1);
}

#[tokio::test]
async fn relative_paths_resolve_against_document_root() {
    let h = TestHarness::new();
    h.write_doc("notes/setup.md", "Relative path resolution works.\n");

    let data = h
        .call_tool_ok("indexDocument", json!({ "file_path": "notes/setup.md" }))
        .await;
    assert_eq!(data["status"], "indexed");

    let doc = h
        .call_tool_ok("getDocument", json!({ "file_path": "notes/setup.md" }))
        .await;
    assert!(doc["content"].as_str().unwrap().contains("Relative path"));
}

#[tokio::test]
async fn reindex_is_idempotent_without_force() {
    let h = TestHarness::new();
    let path = h.write_doc("guide.md", "Docker setup notes.\n");
    let path_arg = json!({ "file_path": path.to_str().unwrap() });

    let first = h.call_tool_ok("indexDocument", path_arg.clone()).await;
    assert_eq!(first["status"], "indexed");
    let postings_before = h.ctx.store.stats().await.unwrap().postings;

    let second = h.call_tool_ok("indexDocument", path_arg.clone()).await;
    assert_eq!(second["status"], "unchanged");
    assert_eq!(second["document_id"], first["document_id"]);
    assert_eq!(h.ctx.store.stats().await.unwrap().postings, postings_before);

    let forced = h
        .call_tool_ok(
            "indexDocument",
            json!({ "file_path": path.to_str().unwrap(), "force_reindex": true }),
        )
        .await;
    assert_eq!(forced["status"], "updated");
    assert_eq!(h.ctx.store.stats().await.unwrap().postings, postings_before);
}

#[tokio::test]
async fn get_document_matches_stored_normalized_text() {
    let h = TestHarness::new();
    let path = h.write_doc("guide.md", "# Title\n\nBody line one.\nBody line two.\n");
    h.call_tool_ok("indexDocument", json!({ "file_path": path.to_str().unwrap() }))
        .await;

    let doc = h
        .call_tool_ok("getDocument", json!({ "file_path": path.to_str().unwrap() }))
        .await;
    let stored = h.ctx.store.get_by_path(path.to_str().unwrap()).await.unwrap();
    assert_eq!(doc["content"].as_str().unwrap(), stored.normalized_text);
    assert_eq!(doc["document_id"].as_i64().unwrap(), stored.id);
    assert!(doc["metadata"]["title"].is_string());
    assert!(doc["indexed_at"].is_string());
}

// ---------------------------------------------------------------------------
// getDocument variants
// ---------------------------------------------------------------------------

#[tokio::test]
async fn get_document_by_id_and_format_shaping() {
    let h = TestHarness::new();
    let path = h.write_doc("guide.md", "# My Guide\n\nBody text.\n");
    let indexed = h
        .call_tool_ok("indexDocument", json!({ "file_path": path.to_str().unwrap() }))
        .await;
    let id = indexed["document_id"].as_i64().unwrap();

    let doc = h
        .call_tool_ok("getDocument", json!({ "document_id": id, "format": "markdown" }))
        .await;
    assert!(doc["content"].as_str().unwrap().starts_with("# My Guide\n\n"));

    let doc = h
        .call_tool_ok(
            "getDocument",
            json!({ "document_id": id, "include_metadata": false }),
        )
        .await;
    assert!(doc.get("metadata").is_none());
}

#[tokio::test]
async fn get_document_truncates_at_utf8_boundary() {
    let h = TestHarness::new();
    let path = h.write_doc("notes.txt", "héllo wörld, this text is long enough to cut\n");
    h.call_tool_ok("indexDocument", json!({ "file_path": path.to_str().unwrap() }))
        .await;

    let doc = h
        .call_tool_ok(
            "getDocument",
            json!({ "file_path": path.to_str().unwrap(), "max_content_bytes": 8 }),
        )
        .await;
    assert_eq!(doc["truncated"], true);
    let content = doc["content"].as_str().unwrap();
    assert!(content.len() <= 8);
    assert!(content.starts_with("héllo"));
}

// ---------------------------------------------------------------------------
// Boundary behaviors
// ---------------------------------------------------------------------------

#[tokio::test]
async fn empty_query_variants() {
    let h = TestHarness::new();

    // A literal empty string falls to schema validation.
    let (code, stable) = h.call_tool_err("searchDocuments", json!({ "query": "" })).await;
    assert_eq!(code, -32602);
    assert_eq!(stable, "INVALID_PARAMS");

    // Queries with no searchable terms are INVALID_QUERY.
    let (_, stable) = h.call_tool_err("searchDocuments", json!({ "query": "   " })).await;
    assert_eq!(stable, "INVALID_QUERY");
    let (_, stable) =
        h.call_tool_err("searchDocuments", json!({ "query": "the of a" })).await;
    assert_eq!(stable, "INVALID_QUERY");
}

#[tokio::test]
async fn limit_bounds_are_schema_rejected() {
    let h = TestHarness::new();
    let (code, _) = h
        .call_tool_err("searchDocuments", json!({ "query": "docker", "limit": 0 }))
        .await;
    assert_eq!(code, -32602);
    let (code, _) = h
        .call_tool_err("searchDocuments", json!({ "query": "docker", "limit": 10_000 }))
        .await;
    assert_eq!(code, -32602);
}

#[tokio::test]
async fn get_document_selector_is_exclusive() {
    let h = TestHarness::new();
    let (code, stable) = h
        .call_tool_err(
            "getDocument",
            json!({ "file_path": "a.md", "document_id": 1 }),
        )
        .await;
    assert_eq!(code, -32602);
    assert_eq!(stable, "INVALID_PARAMS");

    let (code, _) = h.call_tool_err("getDocument", json!({})).await;
    assert_eq!(code, -32602);
}

#[tokio::test]
async fn missing_and_unknown_files_have_stable_codes() {
    let h = TestHarness::new();
    let (_, stable) = h
        .call_tool_err("indexDocument", json!({ "file_path": "missing.md" }))
        .await;
    assert_eq!(stable, "FILE_NOT_FOUND");

    let (_, stable) = h
        .call_tool_err("getDocument", json!({ "file_path": "missing.md" }))
        .await;
    assert_eq!(stable, "DOCUMENT_NOT_FOUND");

    let (_, stable) = h.call_tool_err("getDocument", json!({ "document_id": 9999 })).await;
    assert_eq!(stable, "DOCUMENT_NOT_FOUND");
}

#[tokio::test]
async fn oversized_file_is_rejected_without_partial_writes() {
    let h = TestHarness::new_with(|c| c.max_document_bytes = 64);
    let path = h.write_doc("big.md", &"word ".repeat(100));

    let (_, stable) = h
        .call_tool_err("indexDocument", json!({ "file_path": path.to_str().unwrap() }))
        .await;
    assert_eq!(stable, "FILE_TOO_LARGE");
    assert_eq!(h.ctx.store.stats().await.unwrap().documents, 0);
}

#[tokio::test]
async fn unsupported_type_has_stable_code() {
    let h = TestHarness::new();
    let path = h.write_doc("image.png", "not really an image");
    // The whitelist lives in the watcher; the tool answers for any path, so
    // parser resolution is what rejects this.
    let (_, stable) = h
        .call_tool_err("indexDocument", json!({ "file_path": path.to_str().unwrap() }))
        .await;
    assert_eq!(stable, "UNSUPPORTED_TYPE");
}

#[tokio::test]
async fn parser_failure_is_isolated_per_document() {
    let h = TestHarness::new();
    let good = h.write_doc("good.md", "searchable content here\n");
    h.call_tool_ok("indexDocument", json!({ "file_path": good.to_str().unwrap() }))
        .await;

    // An unsupported neighbor fails without affecting the indexed corpus.
    let bad = h.write_doc("bad.bin", "binary-ish");
    let _ = h
        .call_tool_err("indexDocument", json!({ "file_path": bad.to_str().unwrap() }))
        .await;

    let results = h
        .call_tool_ok("searchDocuments", json!({ "query": "searchable" }))
        .await;
    assert_eq!(results["results"].as_array().unwrap().len(), 1);
}

// ---------------------------------------------------------------------------
// Search semantics through the tool layer
// ---------------------------------------------------------------------------

#[tokio::test]
async fn search_respects_limit_and_reports_total() {
    let h = TestHarness::new();
    for i in 0..4 {
        let path = h.write_doc(&format!("doc{i}.md"), "shared keyword corpus\n");
        h.call_tool_ok("indexDocument", json!({ "file_path": path.to_str().unwrap() }))
            .await;
    }

    let results = h
        .call_tool_ok("searchDocuments", json!({ "query": "corpus", "limit": 2 }))
        .await;
    assert_eq!(results["results"].as_array().unwrap().len(), 2);
    assert_eq!(results["total_found"], 4);
    assert!(results["execution_time_ms"].is_u64());
}

#[tokio::test]
async fn search_file_type_filter_and_exclusions() {
    let h = TestHarness::new();
    let md = h.write_doc("a.md", "docker compose deployment\n");
    let txt = h.write_doc("b.txt", "docker swarm deployment\n");
    h.call_tool_ok("indexDocument", json!({ "file_path": md.to_str().unwrap() })).await;
    h.call_tool_ok("indexDocument", json!({ "file_path": txt.to_str().unwrap() })).await;

    let results = h
        .call_tool_ok(
            "searchDocuments",
            json!({ "query": "docker", "file_types": ["txt"] }),
        )
        .await;
    let paths: Vec<&str> = results["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["path"].as_str().unwrap())
        .collect();
    assert_eq!(paths, vec![txt.to_str().unwrap()]);

    let results = h
        .call_tool_ok("searchDocuments", json!({ "query": "docker -swarm" }))
        .await;
    let paths: Vec<&str> = results["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["path"].as_str().unwrap())
        .collect();
    assert_eq!(paths, vec![md.to_str().unwrap()]);
}

// ---------------------------------------------------------------------------
// Concurrency (S5)
// ---------------------------------------------------------------------------

#[tokio::test]
async fn twenty_concurrent_searches_all_answer_with_matching_ids() {
    let h = TestHarness::new();
    for (name, body) in [
        ("alpha.md", "alpha content body\n"),
        ("beta.md", "beta content body\n"),
        ("gamma.md", "gamma content body\n"),
    ] {
        let path = h.write_doc(name, body);
        h.call_tool_ok("indexDocument", json!({ "file_path": path.to_str().unwrap() }))
            .await;
    }

    let queries = ["alpha", "beta", "gamma"];
    let mut tasks = tokio::task::JoinSet::new();
    for id in 1..=20i64 {
        let ctx = h.ctx.clone();
        let query = queries[(id as usize) % queries.len()].to_string();
        tasks.spawn(async move {
            let msg = json!({
                "jsonrpc": "2.0",
                "id": id,
                "method": "tools/call",
                "params": {
                    "name": "searchDocuments",
                    "arguments": { "query": query }
                }
            });
            let resp = mydocs_mcp::protocol::dispatch_request(&ctx, &msg).await.unwrap();
            (id, resp)
        });
    }

    let mut seen = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        let (id, resp) = joined.unwrap();
        assert_eq!(resp["id"].as_i64().unwrap(), id, "response id matches request id");
        assert!(resp.get("error").is_none(), "search failed: {resp}");
        seen.push(id);
    }
    seen.sort();
    assert_eq!(seen, (1..=20).collect::<Vec<i64>>());
}
