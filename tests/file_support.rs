//! Integration tests for multi-format file support.
//!
//! Covers binary extraction in the filesystem connector: Office ingest and
//! search, skip-and-count on extraction failure, the low-text PDF signal,
//! stored content types, and the max_extract_bytes size cap.

use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

fn harv_binary() -> std::path::PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop();
    path.pop();
    path.push("harv");
    path
}

/// Minimal valid PDF containing one short text phrase. Builds body then xref
/// with correct byte offsets so pdf-extract can parse it. The text is well
/// under the low-text threshold, so the pipeline treats it as a scan.
fn minimal_pdf_with_phrase() -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let o1 = out.len();
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    let o2 = out.len();
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    let o3 = out.len();
    out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
    let o4 = out.len();
    out.extend_from_slice(b"4 0 obj << /Length 44 >> stream\nBT /F1 12 Tf 100 700 Td (tiny pdf phrase) Tj ET\nendstream endobj\n");
    let o5 = out.len();
    out.extend_from_slice(
        b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
    );
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    out.extend_from_slice(format!("{:010} 00000 n \n", o1).as_bytes());
    out.extend_from_slice(format!("{:010} 00000 n \n", o2).as_bytes());
    out.extend_from_slice(format!("{:010} 00000 n \n", o3).as_bytes());
    out.extend_from_slice(format!("{:010} 00000 n \n", o4).as_bytes());
    out.extend_from_slice(format!("{:010} 00000 n \n", o5).as_bytes());
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

fn minimal_docx_with_text(phrase: &str) -> Vec<u8> {
    use std::io::Write;
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        zip.start_file(
            "word/document.xml",
            zip::write::SimpleFileOptions::default(),
        )
        .unwrap();
        let xml = format!(
            "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body><w:p><w:r><w:t>{}</w:t></w:r></w:p></w:body></w:document>",
            phrase
        );
        zip.write_all(xml.as_bytes()).unwrap();
        zip.finish().unwrap();
    }
    buf
}

fn setup_file_support_env() -> (TempDir, std::path::PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    fs::create_dir_all(root.join("config")).unwrap();
    fs::create_dir_all(root.join("data")).unwrap();
    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/harv.sqlite"

[chunking]
target_tokens = 700
overlap_tokens = 80

[retrieval]
final_limit = 12

[server]
bind = "127.0.0.1:7331"

[connectors.filesystem]
root = "{}/files"
include_globs = ["**/*.md", "**/*.txt", "**/*.pdf", "**/*.docx"]
exclude_globs = []
follow_symlinks = false
max_extract_bytes = 1000
"#,
        root.display(),
        root.display()
    );

    fs::write(root.join("config").join("harv.toml"), config_content).unwrap();

    fs::write(
        files_dir.join("readme.md"),
        "# Readme\n\nPlain text file for tests.\n",
    )
    .unwrap();

    (tmp, root.join("config").join("harv.toml"))
}

fn run_harv(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = harv_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run harv: {}", e));
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn docx_ingest_and_search() {
    let (tmp, config_path) = setup_file_support_env();
    let files_dir = tmp.path().join("files");
    fs::write(
        files_dir.join("spec.docx"),
        minimal_docx_with_text("office test phrase"),
    )
    .unwrap();

    run_harv(&config_path, &["init"]);
    let (stdout, stderr, success) = run_harv(&config_path, &["harvest", "filesystem"]);
    assert!(
        success,
        "harvest failed: stdout={}, stderr={}",
        stdout, stderr
    );
    assert!(
        stdout.contains("upserted documents: 2"),
        "spec.docx and readme.md should be ingested: {}",
        stdout
    );

    let (search_out, _, success) = run_harv(&config_path, &["search", "office test phrase"]);
    assert!(success, "search failed");
    assert!(
        search_out.contains("office test phrase") || search_out.contains("spec.docx"),
        "search should return phrase or filename, got: {}",
        search_out
    );
}

#[test]
fn docx_idempotent_reharvest() {
    let (tmp, config_path) = setup_file_support_env();
    let files_dir = tmp.path().join("files");
    fs::write(
        files_dir.join("spec.docx"),
        minimal_docx_with_text("office test phrase"),
    )
    .unwrap();

    run_harv(&config_path, &["init"]);
    let (stdout1, _, _) = run_harv(&config_path, &["harvest", "filesystem", "--full"]);
    let (stdout2, _, _) = run_harv(&config_path, &["harvest", "filesystem", "--full"]);
    assert!(stdout1.contains("upserted documents: 2"), "{}", stdout1);
    assert!(
        stdout2.contains("upserted documents: 2"),
        "second harvest should upsert same count: {}",
        stdout2
    );
}

#[test]
fn corrupt_pdf_skipped_and_counted() {
    let (tmp, config_path) = setup_file_support_env();
    let files_dir = tmp.path().join("files");
    fs::write(files_dir.join("bad.pdf"), b"not a valid pdf").unwrap();
    fs::write(files_dir.join("good.md"), "# Good\n\nThis is good.\n").unwrap();

    run_harv(&config_path, &["init"]);
    let (stdout, stderr, success) = run_harv(&config_path, &["harvest", "filesystem"]);
    assert!(
        success,
        "harvest must succeed: stdout={}, stderr={}",
        stdout, stderr
    );
    assert!(
        stdout.contains("extraction skipped: 1"),
        "expected extraction skipped: 1, got: {}",
        stdout
    );
    assert!(
        stdout.contains("upserted documents: 2"),
        "good.md and readme.md should be ingested: {}",
        stdout
    );
}

#[test]
fn low_text_pdf_skipped_and_counted() {
    let (tmp, config_path) = setup_file_support_env();
    let files_dir = tmp.path().join("files");
    // Parses fine but yields far less text than the low-text threshold.
    fs::write(files_dir.join("scan.pdf"), minimal_pdf_with_phrase()).unwrap();

    run_harv(&config_path, &["init"]);
    let (stdout, _, success) = run_harv(&config_path, &["harvest", "filesystem"]);
    assert!(success, "harvest must succeed: {}", stdout);
    assert!(
        stdout.contains("extraction skipped: 1"),
        "low-text PDF should be skipped, got: {}",
        stdout
    );
    assert!(
        stdout.contains("upserted documents: 1"),
        "only readme.md should be ingested: {}",
        stdout
    );
}

#[test]
fn docx_content_type_stored() {
    let (tmp, config_path) = setup_file_support_env();
    let files_dir = tmp.path().join("files");
    fs::write(
        files_dir.join("spec.docx"),
        minimal_docx_with_text("office test phrase"),
    )
    .unwrap();

    run_harv(&config_path, &["init"]);
    run_harv(&config_path, &["harvest", "filesystem"]);
    let (search_out, _, _) = run_harv(&config_path, &["search", "office test phrase"]);
    let id = search_out
        .lines()
        .find(|l| l.trim().starts_with("id:"))
        .and_then(|l| l.split("id:").nth(1))
        .map(|s| s.trim().to_string());
    let doc_id = id.expect("search should surface the docx document");
    let (get_out, _, _) = run_harv(&config_path, &["get", &doc_id]);
    assert!(
        get_out.contains("wordprocessingml"),
        "stored document should carry the docx content type, got: {}",
        get_out
    );
}

#[test]
fn oversized_binary_skipped_and_counted() {
    let (tmp, config_path) = setup_file_support_env();
    let files_dir = tmp.path().join("files");
    // Over the 1000-byte max_extract_bytes in the test config.
    let big_pdf = vec![0u8; 2000];
    fs::write(files_dir.join("big.pdf"), &big_pdf).unwrap();
    fs::write(files_dir.join("small.md"), "# Small\n\nOk.\n").unwrap();

    run_harv(&config_path, &["init"]);
    let (stdout, _, success) = run_harv(&config_path, &["harvest", "filesystem"]);
    assert!(success, "harvest must succeed");
    assert!(
        stdout.contains("extraction skipped: 1"),
        "big.pdf should be skipped: {}",
        stdout
    );
    assert!(
        stdout.contains("upserted documents: 2"),
        "small.md and readme.md should be ingested: {}",
        stdout
    );
}
