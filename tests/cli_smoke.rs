use std::io::Write;
use std::process::{Command, Stdio};

/// End-to-end smoke test over the `ragdb` binary: ingest a file, query it,
/// pin a result, check status, then delete it. No RPC/tool-protocol surface
/// exists in this crate, so this drives the CLI directly rather than stdio JSON-RPC.
#[test]
fn ingest_query_pin_delete_round_trip() {
    let bin = env!("CARGO_BIN_EXE_ragdb");

    let db_dir = tempfile::tempdir().expect("tempdir for db");
    let base_dir = tempfile::tempdir().expect("tempdir for base");

    let doc_path = base_dir.path().join("paris.txt");
    std::fs::write(
        &doc_path,
        "Paris is the capital of France. The Seine river runs through the city. \
         Croissants are a popular breakfast pastry there.",
    )
    .expect("write source file");

    let run = |args: &[&str]| -> serde_json::Value {
        let output = Command::new(bin)
            .env("RAGDB_EMBED_BACKEND", "hash")
            .arg("--db")
            .arg(db_dir.path())
            .arg("--base-dir")
            .arg(base_dir.path())
            .args(args)
            .stdin(Stdio::null())
            .output()
            .expect("spawn ragdb");
        assert!(
            output.status.success(),
            "ragdb {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        serde_json::from_slice(&output.stdout)
            .unwrap_or_else(|e| panic!("ragdb {:?} did not print json: {e}\nstdout: {}", args, String::from_utf8_lossy(&output.stdout)))
    };

    let ingest = run(&["ingest-file", doc_path.to_str().unwrap()]);
    assert_eq!(ingest["file_path"], doc_path.to_str().unwrap());
    assert!(ingest["chunk_count"].as_u64().unwrap() >= 1);

    let results = run(&["query", "capital of France", "--limit", "5"]);
    let results = results.as_array().expect("query results array");
    assert!(!results.is_empty(), "expected at least one search result");
    assert!(results[0]["file_path"]
        .as_str()
        .unwrap()
        .ends_with("paris.txt"));

    let chunk_index = results[0]["chunk_index"].as_u64().unwrap() as u32;
    let pin = run(&[
        "feedback-pin",
        "capital of France",
        doc_path.to_str().unwrap(),
        &chunk_index.to_string(),
    ]);
    assert_eq!(pin["ok"], true);

    let stats = run(&["feedback-stats"]);
    assert_eq!(stats["event_count"].as_u64().unwrap(), 1);

    let status = run(&["status"]);
    assert_eq!(status["document_count"].as_u64().unwrap(), 1);
    assert!(status["chunk_count"].as_u64().unwrap() >= 1);

    let files = run(&["list-files"]);
    let files = files.as_array().expect("list-files array");
    assert_eq!(files.len(), 1);

    let delete = run(&["delete-file", doc_path.to_str().unwrap()]);
    assert_eq!(delete["deleted"], true);

    let files_after = run(&["list-files"]);
    assert!(files_after.as_array().unwrap().is_empty());
}

#[test]
fn ingest_data_html_then_delete_by_source() {
    let bin = env!("CARGO_BIN_EXE_ragdb");

    let db_dir = tempfile::tempdir().expect("tempdir for db");
    let base_dir = tempfile::tempdir().expect("tempdir for base");

    let mut child = Command::new(bin)
        .env("RAGDB_EMBED_BACKEND", "hash")
        .arg("--db")
        .arg(db_dir.path())
        .arg("--base-dir")
        .arg(base_dir.path())
        .arg("ingest-data")
        .arg("--source")
        .arg("https://example.com/article")
        .arg("--format")
        .arg("html")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn ragdb ingest-data");

    child
        .stdin
        .take()
        .unwrap()
        .write_all(b"<html><body><p>Rust is a systems programming language focused on safety.</p></body></html>")
        .expect("write html to stdin");

    let output = child.wait_with_output().expect("wait for ingest-data");
    assert!(
        output.status.success(),
        "ingest-data failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let ingest: serde_json::Value = serde_json::from_slice(&output.stdout).expect("ingest-data json");
    assert!(ingest["chunk_count"].as_u64().unwrap() >= 1);

    let delete_output = Command::new(bin)
        .env("RAGDB_EMBED_BACKEND", "hash")
        .arg("--db")
        .arg(db_dir.path())
        .arg("--base-dir")
        .arg(base_dir.path())
        .arg("delete-source")
        .arg("https://example.com/article")
        .output()
        .expect("spawn ragdb delete-source");
    assert!(delete_output.status.success());
    let delete: serde_json::Value = serde_json::from_slice(&delete_output.stdout).expect("delete-source json");
    assert_eq!(delete["deleted"], true);
}
