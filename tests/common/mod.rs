#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use phishnet::settings::PipelineSettings;
use serde_json::{Value, json};

pub const DATABASE: &str = "netsec";
pub const COLLECTION: &str = "phishing_data";
pub const FEATURES: [&str; 3] = ["having_IP_Address", "SSLfinal_State", "web_traffic"];

pub const SCHEMA: &str = "columns:
  - having_IP_Address: int64
  - SSLfinal_State: int64
  - web_traffic: int64
  - Result: int64
numerical_columns:
  - having_IP_Address
  - SSLfinal_State
  - web_traffic
";

pub const MODEL_PARAMS: &str = "models:
  decision_tree:
    model: DecisionTreeClassifier
    params:
      max_depth: [2, 3]
  logistic_regression:
    model: LogisticRegression
    params:
      C: [1.0]
";

/// One row of the synthetic table: `SSLfinal_State` tracks the label except on
/// every seventh row, the other features are label-independent noise.
pub fn row(i: usize) -> [Value; 4] {
    let label: i64 = if i % 2 == 0 { 1 } else { -1 };
    let ssl = if i % 7 == 0 { -label } else { label };
    let ip = if i == 10 {
        json!("na")
    } else {
        json!((i as i64 / 3) % 3 - 1)
    };
    let traffic = (i as i64 * 5 % 3) - 1;
    [ip, json!(ssl), json!(traffic), json!(label)]
}

/// Writes `<root>/store/netsec/phishing_data.json` with 100 documents and
/// returns the store URI.
pub fn seed_store(root: &Path) -> String {
    let store_root = root.join("store");
    let collection_dir = store_root.join(DATABASE);
    fs::create_dir_all(&collection_dir).unwrap();
    let documents: Vec<Value> = (0..100)
        .map(|i| {
            let [ip, ssl, traffic, label] = row(i);
            json!({
                "_id": format!("doc{i}"),
                "having_IP_Address": ip,
                "SSLfinal_State": ssl,
                "web_traffic": traffic,
                "Result": label,
            })
        })
        .collect();
    fs::write(
        collection_dir.join(format!("{COLLECTION}.json")),
        serde_json::to_vec(&documents).unwrap(),
    )
    .unwrap();
    format!("file://{}", store_root.display())
}

/// Settings rooted in `root`, with schema and candidate files written beside them.
pub fn settings(root: &Path) -> PipelineSettings {
    let schema_path = root.join("schema.yaml");
    let model_params_path = root.join("model_params.yaml");
    fs::write(&schema_path, SCHEMA).unwrap();
    fs::write(&model_params_path, MODEL_PARAMS).unwrap();
    PipelineSettings {
        artifact_dir: root.join("artifacts"),
        final_model_dir: root.join("final_models"),
        schema_path,
        model_params_path,
        ..PipelineSettings::default()
    }
}

/// Feature-only CSV for batch prediction.
pub fn write_prediction_input(path: &Path) -> PathBuf {
    let mut content = FEATURES.join(",");
    content.push('\n');
    for i in 0..12 {
        let [ip, ssl, traffic, _] = row(i);
        let cell = |v: &Value| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        content.push_str(&format!("{},{},{}\n", cell(&ip), cell(&ssl), cell(&traffic)));
    }
    fs::write(path, content).unwrap();
    path.to_path_buf()
}
