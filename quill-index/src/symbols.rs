use once_cell::sync::Lazy;
use regex::Regex;

/// Declaration and import extraction shared by every language the
/// indexer recognizes. This is deliberately pattern-based: a host
/// document-symbol provider takes precedence when one is wired in, and
/// files nothing matches simply index with an empty symbol list.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExtractedSymbols {
    pub symbols: Vec<String>,
    pub imported_symbols: Vec<String>,
    pub imported_from: Vec<String>,
}

struct DeclPattern {
    regex: Regex,
}

static DECLARATIONS: Lazy<Vec<DeclPattern>> = Lazy::new(|| {
    let patterns = [
        // Rust items.
        r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:async\s+)?(?:unsafe\s+)?(?:fn|struct|enum|trait|mod|type|const|static)\s+([A-Za-z_][A-Za-z0-9_]*)",
        // Python defs and classes.
        r"^\s*(?:async\s+)?(?:def|class)\s+([A-Za-z_][A-Za-z0-9_]*)",
        // JS/TS functions, classes, interfaces, enums, type aliases.
        r"^\s*(?:export\s+)?(?:default\s+)?(?:abstract\s+)?(?:async\s+)?(?:function|class|interface|enum)\s+([A-Za-z_$][A-Za-z0-9_$]*)",
        r"^\s*(?:export\s+)?type\s+([A-Za-z_$][A-Za-z0-9_$]*)\s*=",
        r"^\s*(?:export\s+)?(?:const|let)\s+([A-Za-z_$][A-Za-z0-9_$]*)\s*=\s*(?:async\s*)?(?:\([^)]*\)|[A-Za-z_$][A-Za-z0-9_$]*)\s*=>",
        // Go funcs (with optional receiver) and types.
        r"^\s*func\s+(?:\([^)]*\)\s*)?([A-Za-z_][A-Za-z0-9_]*)\s*\(",
        r"^\s*type\s+([A-Za-z_][A-Za-z0-9_]*)\s+(?:struct|interface)\b",
        // Java/C#/Kotlin-style classes.
        r"^\s*(?:public|private|protected|internal)?\s*(?:static\s+)?(?:final\s+)?(?:class|interface|enum|record)\s+([A-Za-z_][A-Za-z0-9_]*)",
    ];
    patterns
        .into_iter()
        .map(|pattern| DeclPattern {
            regex: Regex::new(pattern)
                .unwrap_or_else(|err| unreachable!("declaration pattern failed: {err}")),
        })
        .collect()
});

static RUST_USE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:pub\s+)?use\s+([A-Za-z_][A-Za-z0-9_:]*)(?:::\{([^}]*)\})?")
        .unwrap_or_else(|err| unreachable!("rust use pattern failed: {err}"))
});

static PY_FROM_IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*from\s+([.\w]+)\s+import\s+(.+)")
        .unwrap_or_else(|err| unreachable!("python import pattern failed: {err}"))
});

static PY_IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*import\s+([\w.]+)")
        .unwrap_or_else(|err| unreachable!("python import pattern failed: {err}"))
});

static JS_IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^\s*import\s+(?:\{([^}]*)\}|\*\s+as\s+(\w+)|(\w+))?\s*(?:,\s*\{([^}]*)\})?\s*(?:from\s+)?["']([^"']+)["']"#)
        .unwrap_or_else(|err| unreachable!("js import pattern failed: {err}"))
});

static JS_REQUIRE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?:const|let|var)\s+(?:\{([^}]*)\}|(\w+))\s*=\s*require\(["']([^"']+)["']\)"#)
        .unwrap_or_else(|err| unreachable!("require pattern failed: {err}"))
});

/// Extract declared symbols plus import edges from one file. Names are
/// deduplicated preserving first-seen order; module paths are filtered
/// to local and package-relative ones.
pub fn extract_symbols(content: &str) -> ExtractedSymbols {
    let mut out = ExtractedSymbols::default();
    for line in content.lines() {
        for pattern in DECLARATIONS.iter() {
            if let Some(captures) = pattern.regex.captures(line)
                && let Some(name) = captures.get(1)
            {
                push_unique(&mut out.symbols, name.as_str());
            }
        }
        extract_imports(line, &mut out);
    }
    out
}

fn extract_imports(line: &str, out: &mut ExtractedSymbols) {
    if let Some(captures) = RUST_USE.captures(line) {
        let path = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
        if is_local_module(path) {
            push_unique(&mut out.imported_from, path);
            match captures.get(2) {
                Some(group) => {
                    for name in group.as_str().split(',') {
                        let name = name.trim().trim_end_matches(" as _").trim();
                        let leaf = name.split_whitespace().next().unwrap_or(name);
                        if !leaf.is_empty() && leaf != "self" {
                            push_unique(&mut out.imported_symbols, leaf);
                        }
                    }
                }
                None => {
                    if let Some(leaf) = path.rsplit("::").next()
                        && leaf != "*"
                    {
                        push_unique(&mut out.imported_symbols, leaf);
                    }
                }
            }
        }
        return;
    }

    if let Some(captures) = PY_FROM_IMPORT.captures(line) {
        let module = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
        if is_local_module(module) {
            push_unique(&mut out.imported_from, module);
            for name in captures.get(2).map(|m| m.as_str()).unwrap_or_default().split(',') {
                let name = name.trim().split_whitespace().next().unwrap_or("");
                if !name.is_empty() && name != "*" {
                    push_unique(&mut out.imported_symbols, name);
                }
            }
        }
        return;
    }
    if let Some(captures) = PY_IMPORT.captures(line) {
        let module = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
        if is_local_module(module) {
            push_unique(&mut out.imported_from, module);
        }
        return;
    }

    if let Some(captures) = JS_IMPORT.captures(line) {
        let module = captures.get(5).map(|m| m.as_str()).unwrap_or_default();
        if is_local_module(module) {
            push_unique(&mut out.imported_from, module);
            for group in [captures.get(1), captures.get(4)].into_iter().flatten() {
                for name in group.as_str().split(',') {
                    let name = name.trim().split_whitespace().next().unwrap_or("");
                    if !name.is_empty() {
                        push_unique(&mut out.imported_symbols, name);
                    }
                }
            }
            for single in [captures.get(2), captures.get(3)].into_iter().flatten() {
                push_unique(&mut out.imported_symbols, single.as_str());
            }
        }
        return;
    }
    if let Some(captures) = JS_REQUIRE.captures(line) {
        let module = captures.get(3).map(|m| m.as_str()).unwrap_or_default();
        if is_local_module(module) {
            push_unique(&mut out.imported_from, module);
            if let Some(group) = captures.get(1) {
                for name in group.as_str().split(',') {
                    let name = name.trim();
                    if !name.is_empty() {
                        push_unique(&mut out.imported_symbols, name);
                    }
                }
            }
            if let Some(single) = captures.get(2) {
                push_unique(&mut out.imported_symbols, single.as_str());
            }
        }
    }
}

/// Local or package-relative module path: `./x`, `../x`, leading-dot
/// python modules, or rust `crate`/`super`/`self` paths.
fn is_local_module(path: &str) -> bool {
    path.starts_with('.')
        || path.starts_with("crate")
        || path.starts_with("super")
        || path.starts_with("self")
}

fn push_unique(list: &mut Vec<String>, value: &str) {
    if !list.iter().any(|existing| existing == value) {
        list.push(value.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn rust_declarations_are_found() {
        let src = "pub struct Store {}\nimpl Store {}\npub(crate) async fn refresh() {}\nconst LIMIT: usize = 8;";
        let extracted = extract_symbols(src);
        assert_eq!(extracted.symbols, vec!["Store", "refresh", "LIMIT"]);
    }

    #[test]
    fn python_and_js_declarations_are_found() {
        let src = "class Indexer:\n    def refresh(self):\n        pass\nexport function query(text) {}\nexport const score = (hit) => hit.value;";
        let extracted = extract_symbols(src);
        assert_eq!(extracted.symbols, vec!["Indexer", "refresh", "query", "score"]);
    }

    #[test]
    fn duplicate_names_collapse() {
        let src = "fn run() {}\nfn run() {}";
        let extracted = extract_symbols(src);
        assert_eq!(extracted.symbols, vec!["run"]);
    }

    #[test]
    fn rust_use_imports_keep_local_paths_only() {
        let src = "use crate::index::store::IndexStore;\nuse std::collections::HashMap;\nuse super::model::{IndexEntry, IndexChunk};";
        let extracted = extract_symbols(src);
        assert_eq!(
            extracted.imported_from,
            vec!["crate::index::store::IndexStore", "super::model"]
        );
        assert_eq!(
            extracted.imported_symbols,
            vec!["IndexStore", "IndexEntry", "IndexChunk"]
        );
    }

    #[test]
    fn js_imports_capture_named_and_default() {
        let src = "import { score, rank } from './scoring';\nimport Engine from './engine';\nimport axios from 'axios';\nconst { debounce } = require('./timers');";
        let extracted = extract_symbols(src);
        assert_eq!(
            extracted.imported_from,
            vec!["./scoring", "./engine", "./timers"]
        );
        assert_eq!(
            extracted.imported_symbols,
            vec!["score", "rank", "Engine", "debounce"]
        );
    }

    #[test]
    fn python_relative_imports_are_kept() {
        let src = "from .store import IndexStore\nimport os\nfrom ..util import clamp";
        let extracted = extract_symbols(src);
        assert_eq!(extracted.imported_from, vec![".store", "..util"]);
        assert_eq!(extracted.imported_symbols, vec!["IndexStore", "clamp"]);
    }
}
