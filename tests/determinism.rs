// Copyright 2026 Ragbench Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use serde_json::Value;
use serde_json::json;
use tempfile::TempDir;

fn ragbench_cmd(config_root: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("ragbench"));
    cmd.env("XDG_CONFIG_HOME", config_root);
    cmd.env("HOME", config_root);
    cmd.env("APPDATA", config_root);
    cmd
}

fn normalize_json(mut value: Value) -> Value {
    if let Some(stats) = value.get_mut("stats")
        && let Some(obj) = stats.as_object_mut()
    {
        obj.insert("took_ms".to_string(), json!(0));
    }
    strip_mtime(&mut value);
    value
}

fn strip_mtime(value: &mut Value) {
    match value {
        Value::Object(map) => {
            if map.contains_key("mtime") {
                map.insert("mtime".to_string(), json!(""));
            }
            for v in map.values_mut() {
                strip_mtime(v);
            }
        }
        Value::Array(items) => {
            for v in items {
                strip_mtime(v);
            }
        }
        _ => {}
    }
}

fn run_json(cmd: &mut Command, cwd: &Path) -> Value {
    let output = cmd.current_dir(cwd).output().expect("run command");
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str(&stdout).expect("parse json")
}

fn assert_repeatable(config_root: &Path, args: &[&str], runs: usize, cwd: &Path) -> Value {
    let mut baseline: Option<Value> = None;
    for _ in 0..runs {
        let mut cmd = ragbench_cmd(config_root);
        cmd.args(args);
        let json = normalize_json(run_json(&mut cmd, cwd));
        if let Some(ref expected) = baseline {
            assert_eq!(&json, expected);
        } else {
            baseline = Some(json);
        }
    }
    baseline.expect("at least one run")
}

fn read_json(path: &Path) -> Value {
    serde_json::from_str(&fs::read_to_string(path).expect("read")).expect("parse")
}

#[test]
fn deterministic_outputs() {
    let config_temp = TempDir::new().expect("config tempdir");
    let config_root = config_temp.path();
    let temp = TempDir::new().expect("tempdir");
    let root = temp.path();
    fs::create_dir_all(root.join("repo/src")).expect("repo dir");
    fs::write(
        root.join("repo/src/config.rs"),
        "pub struct Config {\n    pub path: String,\n}\n\npub fn load_config(path: &str) -> Config {\n    Config { path: path.into() }\n}\n",
    )
    .expect("write file");
    fs::write(
        root.join("repo/src/render.rs"),
        "pub fn render(page: &str) -> String {\n    format!(\"<html>{page}</html>\")\n}\n",
    )
    .expect("write file");
    let items = [
        json!({"id": "q1", "question": "load config from a path", "answer": "load_config",
               "metadata": {"groundTruth": {"file": "src/config.rs", "startLine": 5, "endLine": 7}}}),
        json!({"id": "q2", "question": "render html page", "answer": "render",
               "metadata": {"lineBase": 0, "groundTruth": {"file": "src/render.rs", "startLine": 0, "endLine": 2}}}),
    ];
    let dataset: Vec<String> = items.iter().map(Value::to_string).collect();
    fs::write(root.join("dataset.jsonl"), dataset.join("\n")).expect("write dataset");

    assert_repeatable(
        config_root,
        &["chunk", "repo", "--chunk-size", "40", "--chunk-overlap", "8", "--json"],
        3,
        root,
    );

    let run = |out: &str, name: &str, size: &str, overlap: &str| {
        ragbench_cmd(config_root)
            .args(["run", "--dataset", "dataset.jsonl", "--corpus", "repo", "--k", "1,3"])
            .args(["--name", name, "--chunk-size", size, "--chunk-overlap", overlap])
            .args(["--out", out])
            .current_dir(root)
            .assert()
            .success();
    };
    run("a.json", "wide", "40", "8");
    run("b.json", "wide", "40", "8");
    let a = read_json(&root.join("a.json"));
    assert_eq!(a, read_json(&root.join("b.json")));
    assert_eq!(a["kValues"], json!([1, 3]));
    assert_eq!(a["results"].as_array().map(Vec::len), Some(2));
    // zero-based ground truth is stored rebased
    assert_eq!(
        a["results"][1]["metadata"]["groundTruth"],
        json!({"file": "src/render.rs", "startLine": 1, "endLine": 3})
    );

    run("c.json", "narrow", "20", "0");

    let report = assert_repeatable(
        config_root,
        &[
            "compare",
            "a.json",
            "c.json",
            "--format",
            "json",
            "--iterations",
            "500",
            "--seed",
            "42",
            "--json",
        ],
        2,
        root,
    );
    assert_eq!(report["report"]["iterations"], json!(500));
}
