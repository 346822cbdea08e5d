use std::path::Path;

use assert_cmd::Command;
use pb_reflect::testing;
use predicates::prelude::*;
use serde_json::{json, Value as Json};
use tempfile::TempDir;

/// A temp dir holding the fixture descriptor set and an empty config home.
struct Fixture {
    dir: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("library.bin"), testing::library_descriptor_set_bytes()).unwrap();
        Self { dir }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn descriptor_set(&self) -> String {
        format!(
            "{}:{},{}",
            self.path().join("library.bin").display(),
            testing::LIBRARY_SERVICE,
            testing::SHELF_SERVICE
        )
    }

    fn write(&self, name: &str, contents: &str) -> String {
        let path = self.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path.display().to_string()
    }

    /// A command isolated from the caller's environment and config.
    #[allow(deprecated)]
    fn bare(&self) -> Command {
        let mut cmd = Command::cargo_bin("protobridge").unwrap();
        cmd.env("XDG_CONFIG_HOME", self.path().join("config-home"))
            .env("HOME", self.path())
            .env_remove("PROTOBRIDGE_REFLECTION_URL")
            .env_remove("PROTOBRIDGE_DESCRIPTOR_SET")
            .env_remove("PROTOBRIDGE_CONFIG")
            .env_remove("PROTOBRIDGE_TARGET")
            .env_remove("RUST_LOG")
            .arg("--no-color");
        cmd
    }

    fn pb(&self) -> Command {
        let mut cmd = self.bare();
        cmd.arg("--descriptor-set").arg(self.descriptor_set());
        cmd
    }

    fn json(&self, args: &[&str]) -> Json {
        let output = self.pb().args(args).assert().success().get_output().stdout.clone();
        serde_json::from_slice(&output).unwrap()
    }
}

#[test]
fn test_tools_lists_every_method() {
    let fixture = Fixture::new();
    fixture
        .pb()
        .arg("tools")
        .assert()
        .success()
        .stdout(predicate::str::contains("GetBook"))
        .stdout(predicate::str::contains("library.v1.ShelfService.GetShelf"));

    let tools = fixture.json(&["tools", "--json"]);
    assert_eq!(tools.as_array().unwrap().len(), 7);
}

#[test]
fn test_tools_service_filter_and_read_mask() {
    let fixture = Fixture::new();
    let tools = fixture.json(&[
        "tools",
        "--json",
        "--service",
        testing::SHELF_SERVICE,
        "--response-read-mask",
    ]);
    let tools = tools.as_array().unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0]["name"], "GetShelf");
    assert!(tools[0]["json_schema"]["properties"]["response_read_mask"].is_object());
}

#[test]
fn test_tool_set_starts_undiscovered() {
    let fixture = Fixture::new();
    let set = fixture.json(&["tool-set", testing::LIBRARY_SERVICE]);
    assert_eq!(set["name"], testing::LIBRARY_SERVICE);
    assert_eq!(set["discovery_tool"]["name"], "LibraryService_Discover");
    assert_eq!(set["discover_timestamps"]["GetBook"], 0);

    let set = fixture.json(&["tool-set", testing::LIBRARY_SERVICE, "--discover", "GetBook"]);
    assert!(set["discover_timestamps"]["GetBook"].as_i64().unwrap() > 0);
    assert_eq!(set["discover_timestamps"]["ListBooks"], 0);
}

#[test]
fn test_tool_set_rejects_unknown_discovery() {
    let fixture = Fixture::new();
    fixture
        .pb()
        .args(["tool-set", testing::LIBRARY_SERVICE, "--discover", "BurnBook"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("BurnBook"));
}

#[test]
fn test_parse_method_call() {
    let fixture = Fixture::new();
    let call = json!({
        "id": "call-1",
        "name": "GetBook",
        "arguments": {"name": "shelves/1/books/2"},
        "annotations": {
            "tool-type": "rpc-request",
            "grpc-service": testing::LIBRARY_SERVICE,
            "grpc-method": "library.v1.LibraryService.GetBook",
            "proto-message": "library.v1.GetBookRequest",
        },
    });
    let path = fixture.write("call.json", &call.to_string());

    let parsed = fixture.json(&["parse", &path]);
    assert_eq!(parsed["rpc_request"]["method"], "library.v1.LibraryService.GetBook");
    assert_eq!(parsed["rpc_request"]["request"], json!({"name": "shelves/1/books/2"}));
    assert!(parsed["rpc_request"]["read_mask"].is_null());
}

#[test]
fn test_parse_discovery_call_against_tool_set() {
    let fixture = Fixture::new();
    let set = fixture.json(&["tool-set", testing::LIBRARY_SERVICE]);
    let set_path = fixture.write("set.json", &set.to_string());
    let call = json!({
        "id": "call-1",
        "name": "LibraryService_Discover",
        "arguments": {"tools": ["GetBook", "ListBooks"]},
        "annotations": set["discovery_tool"]["annotations"],
    });
    let call_path = fixture.write("discover.json", &call.to_string());

    let parsed = fixture.json(&["parse", &call_path, "--tool-set", &set_path]);
    assert_eq!(
        parsed["discovery"],
        json!({"tool_set_name": testing::LIBRARY_SERVICE, "tool_names": ["GetBook", "ListBooks"]})
    );
}

#[test]
fn test_parse_undiscovered_tool_fails() {
    let fixture = Fixture::new();
    let set = fixture.json(&["tool-set", testing::LIBRARY_SERVICE]);
    let set_path = fixture.write("set.json", &set.to_string());
    let get = set["tools"]
        .as_array()
        .unwrap()
        .iter()
        .find(|tool| tool["name"] == "GetBook")
        .unwrap();
    let call = json!({
        "id": "call-1",
        "name": "GetBook",
        "arguments": {"name": "shelves/1/books/2"},
        "annotations": get["annotations"],
    });
    let call_path = fixture.write("call.json", &call.to_string());

    fixture
        .pb()
        .args(["parse", &call_path, "--tool-set", &set_path])
        .assert()
        .failure()
        .stderr(predicate::str::contains("has not been discovered"));
}

#[test]
fn test_missing_schema_source_fails() {
    let fixture = Fixture::new();
    fixture
        .bare()
        .arg("tools")
        .assert()
        .failure()
        .stderr(predicate::str::contains("no schema source"));
}

#[test]
fn test_config_file_supplies_source() {
    let fixture = Fixture::new();
    let config = format!(
        "[source]\ndescriptor_sets = [{:?}]\n\n[schema]\nmax_depth = 2\n",
        fixture.descriptor_set()
    );
    let config_path = fixture.write("config.toml", &config);

    fixture
        .bare()
        .args(["--config", &config_path, "tools", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"GetBook\""));
}

#[test]
fn test_invalid_config_file_fails() {
    let fixture = Fixture::new();
    let config_path = fixture.write("config.toml", "[source\n");
    fixture
        .bare()
        .args(["--config", &config_path, "tools"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to parse config file"));
}

#[test]
fn test_call_requires_a_target() {
    let fixture = Fixture::new();
    fixture
        .pb()
        .args(["call", "library.v1.LibraryService.GetBook", "--data", "{}"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no target server"));
}

#[test]
fn test_debug_log_reports_schema_resolution() {
    let fixture = Fixture::new();
    fixture
        .pb()
        .env("RUST_LOG", "protobridge=debug")
        .args(["tools", "--json"])
        .assert()
        .success()
        .stderr(predicate::str::contains("resolving schema"))
        .stderr(predicate::str::contains("schema resolved"));
}

#[test]
fn test_default_log_level_keeps_schema_resolution_quiet() {
    let fixture = Fixture::new();
    fixture
        .pb()
        .args(["tools", "--json"])
        .assert()
        .success()
        .stderr(predicate::str::contains("resolving schema").not());
}
