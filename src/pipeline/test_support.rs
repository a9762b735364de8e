//! Stand-in extraction engines for tests: small shell scripts.

use std::path::{Path, PathBuf};

/// Write an executable `/bin/sh` script into `dir` and return its path.
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Shell snippet that writes both contract artifacts next to the input (`$1`).
pub fn contract_writer(text: &str, fields_json: &str) -> String {
    format!(
        r#"out=$(dirname "$1")
cat > "$out/processing_result.json" <<'JSON'
{{"file_type": "pdf", "file_name": "upload", "text": "{text}", "error": ""}}
JSON
cat > "$out/important_details.json" <<'JSON'
{fields_json}
JSON"#
    )
}
