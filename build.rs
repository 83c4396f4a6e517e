use grep::regex::RegexMatcher;
use grep::searcher::{Searcher, Sink, SinkMatch};
use std::error::Error;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Source directories owned by this crate. Everything else in the tree is left alone.
const SOURCE_DIRS: &[&str] = &["select", "cli", "tests", "benches"];

// Collects every matching line of one file so the error lists them all.
struct ViolationCollector {
    violations: Vec<String>,
    file_path: PathBuf,
}

impl ViolationCollector {
    fn new(file_path: &Path) -> Self {
        Self {
            violations: Vec::new(),
            file_path: file_path.to_path_buf(),
        }
    }

    fn check_and_get_error_message(&self, what: &str, advice: &str) -> Option<String> {
        if self.violations.is_empty() {
            return None;
        }

        let file_name = self.file_path.to_str().unwrap_or("?");
        let mut error_msg = format!(
            "\n❌ ERROR: Found {} {what} in {file_name}:\n",
            self.violations.len()
        );
        for violation in &self.violations {
            error_msg.push_str(&format!("   {violation}\n"));
        }
        error_msg.push_str(&format!("\n⚠️ {what} are not allowed in this project.\n"));
        error_msg.push_str(&format!("   {advice}\n"));
        Some(error_msg)
    }
}

impl Sink for ViolationCollector {
    type Error = std::io::Error;

    fn matched(&mut self, _: &Searcher, mat: &SinkMatch) -> Result<bool, Self::Error> {
        let line_number = mat.line_number().unwrap_or(0);
        let line_text = std::str::from_utf8(mat.bytes()).unwrap_or("").trim_end();
        self.violations.push(format!("{line_number}:{line_text}"));
        Ok(true)
    }
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    for dir in SOURCE_DIRS {
        println!("cargo:rerun-if-changed={dir}");
    }

    let checks: [(&str, &str, &str); 2] = [
        (
            r"\b(_[a-zA-Z0-9_]+)\b",
            "underscore-prefixed names",
            "Either use the variable (removing the underscore) or remove it completely.",
        ),
        (
            r"#\s*\[\s*allow\s*\(\s*dead_code\s*\)\s*\]",
            "#[allow(dead_code)] attributes",
            "Either use the code (removing the attribute) or remove it completely.",
        ),
    ];
    for (pattern, what, advice) in checks {
        if let Err(e) = scan_sources(pattern, what, advice) {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}

fn rust_sources() -> impl Iterator<Item = PathBuf> {
    SOURCE_DIRS.iter().flat_map(|dir| {
        WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
            .map(|e| e.path().to_path_buf())
    })
}

fn scan_sources(pattern: &str, what: &str, advice: &str) -> Result<(), Box<dyn Error>> {
    let matcher = RegexMatcher::new_line_matcher(pattern)?;
    let mut searcher = Searcher::new();
    for path in rust_sources() {
        let mut collector = ViolationCollector::new(&path);
        searcher.search_path(&matcher, &path, &mut collector)?;
        if let Some(error_message) = collector.check_and_get_error_message(what, advice) {
            return Err(error_message.into());
        }
    }
    Ok(())
}
