//! Best-effort static import scanning
//!
//! Finds the local files a target imports so they can ride along as repair
//! context. Nothing here resolves packages or the standard library: a name
//! that does not map to an existing file is simply dropped.

use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static PY_IMPORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*import[ \t]+([^\n#]+)").expect("valid regex"));

static PY_FROM_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*from[ \t]+(\.*[\w.]*)[ \t]+import\b").expect("valid regex")
});

static JS_REQUIRE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"require\(\s*['"]([^'"]+)['"]\s*\)"#).expect("valid regex"));

static JS_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^[ \t]*import\s+(?:[^'";]*?\s+from\s+)?['"]([^'"]+)['"]"#)
        .expect("valid regex")
});

static RS_MOD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*(?:pub(?:\([^)]*\))?[ \t]+)?mod[ \t]+(\w+)[ \t]*;").expect("valid regex")
});

/// Source languages the scanner understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Language {
    Python,
    JavaScript,
    Rust,
}

impl Language {
    fn detect(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str())? {
            "py" => Some(Self::Python),
            "js" | "mjs" | "cjs" | "ts" | "tsx" | "jsx" => Some(Self::JavaScript),
            "rs" => Some(Self::Rust),
            _ => None,
        }
    }
}

/// Scans a file's imports and maps them onto files on disk
#[derive(Debug, Clone, Default)]
pub struct ImportScanner {
    /// Extra roots to resolve module names against
    search_paths: Vec<PathBuf>,
}

impl ImportScanner {
    pub fn new(search_paths: Vec<PathBuf>) -> Self {
        Self { search_paths }
    }

    /// Existing local files imported by `target`.
    ///
    /// Unreadable targets and unknown languages yield an empty list.
    pub fn related_files(&self, target: &Path) -> Vec<PathBuf> {
        let Some(language) = Language::detect(target) else {
            return Vec::new();
        };

        let source = match fs::read_to_string(target) {
            Ok(source) => source,
            Err(e) => {
                tracing::debug!(path = %target.display(), error = %e, "cannot scan imports");
                return Vec::new();
            }
        };

        let base = target.parent().unwrap_or(Path::new(".")).to_path_buf();

        let candidates = match language {
            Language::Python => self.python_candidates(&source, &base),
            Language::JavaScript => js_candidates(&source, &base),
            Language::Rust => rust_candidates(&source, target, &base),
        };

        let mut related = Vec::new();
        for candidate in candidates {
            if candidate.is_file() && !same_file(&candidate, target) && !related.contains(&candidate)
            {
                related.push(candidate);
            }
        }

        tracing::debug!(path = %target.display(), count = related.len(), "related files");
        related
    }

    fn python_candidates(&self, source: &str, base: &Path) -> Vec<PathBuf> {
        let mut modules = Vec::new();

        for caps in PY_IMPORT.captures_iter(source) {
            for item in caps[1].split(',') {
                // `import a.b as c` -> `a.b`
                if let Some(name) = item.split_whitespace().next() {
                    modules.push(name.trim_end_matches(';').to_string());
                }
            }
        }
        for caps in PY_FROM_IMPORT.captures_iter(source) {
            modules.push(caps[1].to_string());
        }

        let mut roots = vec![base.to_path_buf()];
        roots.extend(self.search_paths.iter().cloned());

        let mut candidates = Vec::new();
        for module in modules {
            let relative_depth = module.chars().take_while(|c| *c == '.').count();
            let dotted = &module[relative_depth..];
            if dotted.is_empty() {
                continue;
            }
            let rel: PathBuf = dotted.split('.').collect();

            if relative_depth > 0 {
                // `from .x import y` resolves against the importing package only
                let mut root = base.to_path_buf();
                for _ in 1..relative_depth {
                    root.pop();
                }
                candidates.extend(python_module_files(&root, &rel));
            } else {
                for root in &roots {
                    candidates.extend(python_module_files(root, &rel));
                }
            }
        }
        candidates
    }
}

fn python_module_files(root: &Path, rel: &Path) -> [PathBuf; 2] {
    [
        root.join(rel).with_extension("py"),
        root.join(rel).join("__init__.py"),
    ]
}

fn js_candidates(source: &str, base: &Path) -> Vec<PathBuf> {
    let modules = JS_REQUIRE
        .captures_iter(source)
        .chain(JS_IMPORT.captures_iter(source))
        .map(|caps| caps[1].to_string())
        .filter(|module| module.starts_with("./") || module.starts_with("../"));

    let mut candidates = Vec::new();
    for module in modules {
        let path = base.join(&module);
        candidates.push(path.clone());
        for ext in ["js", "ts", "mjs", "cjs", "jsx", "tsx"] {
            candidates.push(PathBuf::from(format!("{}.{}", path.display(), ext)));
        }
        candidates.push(path.join("index.js"));
        candidates.push(path.join("index.ts"));
    }
    candidates
}

fn rust_candidates(source: &str, target: &Path, base: &Path) -> Vec<PathBuf> {
    let stem = target.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
    // Submodules of `foo.rs` live in `foo/`; of `mod.rs`, `lib.rs`, `main.rs` beside them
    let module_dir = if matches!(stem, "mod" | "lib" | "main") {
        base.to_path_buf()
    } else {
        base.join(stem)
    };

    let mut candidates = Vec::new();
    for caps in RS_MOD.captures_iter(source) {
        let name = &caps[1];
        candidates.push(module_dir.join(format!("{}.rs", name)));
        candidates.push(module_dir.join(name).join("mod.rs"));
    }
    candidates
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, content: &str) -> PathBuf {
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_python_imports() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "calculator.py", "def add(a, b): ...\n");
        write(dir.path(), "utils/strings.py", "def rev(s): ...\n");
        write(dir.path(), "pkg/__init__.py", "");
        let target = write(
            dir.path(),
            "test_calc.py",
            "import os, sys\nimport calculator as calc\nfrom utils.strings import rev\nfrom pkg import thing\nimport json\n",
        );

        let related = ImportScanner::default().related_files(&target);
        assert_eq!(
            related,
            vec![
                dir.path().join("calculator.py"),
                dir.path().join("utils/strings.py"),
                dir.path().join("pkg/__init__.py"),
            ]
        );
    }

    #[test]
    fn test_python_relative_and_search_paths() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "app/helpers.py", "");
        write(dir.path(), "testfiles/temperature.py", "");
        let target = write(
            dir.path(),
            "app/main.py",
            "from .helpers import h\nimport temperature\n",
        );

        let scanner = ImportScanner::new(vec![dir.path().join("testfiles")]);
        let related = scanner.related_files(&target);
        assert_eq!(
            related,
            vec![
                dir.path().join("testfiles/temperature.py"),
                dir.path().join("app/helpers.py"),
            ]
        );
    }

    #[test]
    fn test_javascript_imports() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "lib/math.js", "");
        write(dir.path(), "format.ts", "");
        let target = write(
            dir.path(),
            "main.js",
            "const math = require('./lib/math');\nimport { fmt } from \"./format\";\nconst fs = require('fs');\n",
        );

        let related = ImportScanner::default().related_files(&target);
        assert_eq!(
            related,
            vec![dir.path().join("lib/math.js"), dir.path().join("format.ts")]
        );
    }

    #[test]
    fn test_rust_mods() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "src/parser.rs", "");
        write(dir.path(), "src/lexer/mod.rs", "");
        let target = write(
            dir.path(),
            "src/lib.rs",
            "pub mod parser;\nmod lexer;\nmod tests { }\npub(crate) mod missing;\n",
        );

        let related = ImportScanner::default().related_files(&target);
        assert_eq!(
            related,
            vec![
                dir.path().join("src/parser.rs"),
                dir.path().join("src/lexer/mod.rs"),
            ]
        );
    }

    #[test]
    fn test_unreadable_or_unknown_is_empty() {
        let dir = TempDir::new().unwrap();
        let scanner = ImportScanner::default();

        assert!(scanner.related_files(&dir.path().join("missing.py")).is_empty());

        let target = write(dir.path(), "notes.txt", "import calculator\n");
        assert!(scanner.related_files(&target).is_empty());
    }

    #[test]
    fn test_self_import_excluded() {
        let dir = TempDir::new().unwrap();
        let target = write(dir.path(), "calc.py", "import calc\n");
        assert!(ImportScanner::default().related_files(&target).is_empty());
    }
}
