//! Security invariant tests for the SproutPay payment link service.
//!
//! These scan the production sources of every workspace crate so that a later
//! change cannot quietly drop a property the payment flow depends on.

use regex::Regex;
use std::path::Path;
use walkdir::WalkDir;

/// Read all .rs source files from production crates (excluding tests and this crate).
fn production_source_files() -> Vec<(String, String)> {
    let root = Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .parent()
        .unwrap();

    let crates_dir = root.join("crates");
    let mut files = Vec::new();

    for entry in WalkDir::new(&crates_dir).into_iter().filter_map(|e| e.ok()) {
        let path = entry.path();

        if path.extension().and_then(|e| e.to_str()) != Some("rs") {
            continue;
        }

        let path_str = path.to_str().unwrap_or("");
        if path_str.contains("security-audit") {
            continue;
        }
        if path_str.contains("tests/") || path_str.contains("\\tests\\") {
            continue;
        }

        if let Ok(content) = std::fs::read_to_string(path) {
            files.push((path_str.to_string(), content));
        }
    }

    files
}

/// Drop everything from the first `#[cfg(test)]` or `mod tests` onwards.
fn production_lines(content: &str) -> String {
    let mut result = Vec::new();

    for line in content.lines() {
        if line.contains("#[cfg(test)]") || line.trim().starts_with("mod tests") {
            break;
        }
        result.push(line);
    }

    result.join("\n")
}

fn file_ending(files: &[(String, String)], suffix: &str) -> String {
    files
        .iter()
        .find(|(path, _)| path.replace('\\', "/").ends_with(suffix))
        .map(|(_, content)| production_lines(content))
        .unwrap_or_else(|| panic!("{suffix} not found"))
}

#[test]
fn no_hardcoded_private_keys_in_production_code() {
    let hex_64_re = Regex::new(r"0x[a-fA-F0-9]{64}").unwrap();
    let files = production_source_files();

    for (path, content) in &files {
        let prod_content = production_lines(content);

        if let Some(mat) = hex_64_re.find(&prod_content) {
            let line_num = prod_content[..mat.start()].lines().count() + 1;
            panic!(
                "Potential hardcoded secret found at {}:{}: {}",
                path,
                line_num,
                mat.as_str()
            );
        }
    }
}

#[test]
fn constant_time_uses_subtle_crate() {
    let files = production_source_files();

    for (path, content) in &files {
        let prod_content = production_lines(content);

        if prod_content.contains("fn constant_time_eq") {
            assert!(
                prod_content.contains("use subtle") || prod_content.contains("subtle::"),
                "File {} defines constant_time_eq without the subtle crate. \
                 Use sproutpay::security::constant_time_eq.",
                path
            );
        }
    }
}

#[test]
fn bearer_tokens_compared_in_constant_time() {
    let files = production_source_files();

    for (path, content) in &files {
        let prod_content = production_lines(content);

        if prod_content.contains("strip_prefix(\"Bearer \")") {
            assert!(
                prod_content.contains("constant_time_eq"),
                "Bearer token at {} is not compared with constant_time_eq.",
                path
            );
        }
    }
}

#[test]
fn money_is_never_floating_point() {
    let float_money_re =
        Regex::new(r"\b\w*(amount|fee|balance|price)\w*\s*:\s*(Option<)?f(32|64)\b").unwrap();
    let files = production_source_files();

    for (path, content) in &files {
        let prod_content = production_lines(content);

        for (i, line) in prod_content.lines().enumerate() {
            assert!(
                !float_money_re.is_match(line),
                "Floating point money at {}:{}: {}. Use rust_decimal::Decimal.",
                path,
                i + 1,
                line.trim()
            );
        }
    }
}

#[test]
fn status_writes_bump_updated_at() {
    let update_re = Regex::new(r"(?s)UPDATE payment_links(.*?)WHERE").unwrap();
    let status_re = Regex::new(r"\bstatus\s*=").unwrap();
    let files = production_source_files();
    let mut checked = 0;

    for (path, content) in &files {
        let prod_content = production_lines(content);

        for cap in update_re.captures_iter(&prod_content) {
            let set_clause = &cap[1];
            if !status_re.is_match(set_clause) {
                continue;
            }
            checked += 1;
            assert!(
                set_clause.contains("updated_at"),
                "Status write at {} does not bump updated_at: {}",
                path,
                set_clause.trim()
            );
        }
    }

    assert!(checked > 0, "no payment link status writes found");
}

#[test]
fn status_writes_are_compare_and_set() {
    let update_re = Regex::new(r"(?s)UPDATE payment_links(.*?)WHERE([^\x22]*)").unwrap();
    let status_re = Regex::new(r"\bstatus\s*=").unwrap();
    let files = production_source_files();

    for (path, content) in &files {
        let prod_content = production_lines(content);

        for cap in update_re.captures_iter(&prod_content) {
            if !status_re.is_match(&cap[1]) {
                continue;
            }
            let guard = &cap[2];
            assert!(
                guard.contains("status IN") || guard.contains("status ="),
                "Status write at {} is not guarded by the current status: WHERE{}",
                path,
                guard.trim_end()
            );
        }
    }
}

#[test]
fn secret_holding_configs_redact_debug() {
    let derived_re =
        Regex::new(r"#\[derive\([^)]*\bDebug\b[^)]*\)\]\s*pub struct (\w+)\s*\{[^}]*(PrivateKeySigner|metrics_token)")
            .unwrap();
    let files = production_source_files();

    for (path, content) in &files {
        let prod_content = production_lines(content);

        if let Some(cap) = derived_re.captures(&prod_content) {
            panic!(
                "{} derives Debug on {} which holds a secret. Implement Debug by hand and redact it.",
                path, &cap[1]
            );
        }
    }

    let config = file_ending(&files, "sproutpay-api/src/config.rs");
    assert!(config.contains("impl std::fmt::Debug for SproutConfig"));
    assert!(config.contains("[REDACTED]"));
}

#[test]
fn secrets_are_never_logged() {
    let log_re = Regex::new(r"tracing::\w+!\([^;]*(to_bytes|private_key|PRIVATE_KEY|metrics_token)")
        .unwrap();
    let files = production_source_files();

    for (path, content) in &files {
        let prod_content = production_lines(content);

        if let Some(mat) = log_re.find(&prod_content) {
            panic!("Secret material may be logged at {}: {}", path, mat.as_str());
        }
    }
}

#[test]
fn signed_operations_verify_before_acting() {
    let files = production_source_files();
    let machine = file_ending(&files, "sproutpay-api/src/machine.rs");

    for op in [
        "fn create(",
        "fn accept(",
        "fn early_release(",
        "fn release(",
        "fn dispute(",
        "fn settle_channel(",
    ] {
        let start = machine
            .find(op)
            .unwrap_or_else(|| panic!("status machine has no {op}"));
        let body = &machine[start..];
        let end = body[1..].find("\n    pub ").map(|i| i + 1).unwrap_or(body.len());
        let body = &body[..end];

        let verify = body
            .find("signed.verify()?")
            .unwrap_or_else(|| panic!("{op} does not verify the wallet signature"));
        if let Some(first_db) = body.find("self.db.") {
            assert!(verify < first_db, "{op} touches the store before verifying the signature");
        }
        if let Some(first_net) = body.find("self.network.") {
            assert!(verify < first_net, "{op} calls the network before verifying the signature");
        }
    }
}

#[test]
fn error_responses_do_not_leak_internals() {
    let files = production_source_files();

    let dangerous_patterns = [
        "database error:",
        "database lock poisoned",
        "stack trace",
        "RUST_BACKTRACE",
    ];

    for (path, content) in &files {
        if !content.contains("HttpResponse::") {
            continue;
        }

        let prod_content = production_lines(content);

        for pattern in &dangerous_patterns {
            for (i, line) in prod_content.lines().enumerate() {
                if line.contains(pattern) && line.contains("json") {
                    panic!(
                        "Potentially sensitive error detail '{}' found in HTTP response at {}:{}. \
                         Internal details should be logged server-side only.",
                        pattern,
                        path,
                        i + 1
                    );
                }
            }
        }
    }

    let error = file_ending(&files, "sproutpay-api/src/error.rs");
    assert!(
        error.contains("\"An internal error occurred\""),
        "database and internal errors must map to a generic message"
    );
}
