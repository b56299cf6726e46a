//! Python import namespaces and the move-file rewrite.

use regex::Regex;

use crate::error::CommandError;
use crate::session::FileMap;

/// Dotted import path of a source file.
///
/// `src/pkg/mod.py` with code path `src` becomes `pkg.mod`.
pub fn path_to_namespace(path: &str, code_path: &str) -> String {
    let prefix = format!("{}/", code_path.trim_end_matches('/'));
    let path = path.strip_prefix(&prefix).unwrap_or(path);
    let path = path.strip_suffix(".py").unwrap_or(path);
    path.replace('/', ".")
}

/// Replace `old` with `new` on import lines only.
pub fn fix_imports(content: &str, old: &str, new: &str) -> Result<String, CommandError> {
    let pattern = Regex::new(&format!(r"\b{}\b", regex::escape(old)))
        .map_err(|e| CommandError::ExecutionFailed(e.to_string()))?;

    Ok(content
        .split_inclusive('\n')
        .map(|line| {
            if line.contains("import") {
                pattern.replace_all(line, new).into_owned()
            } else {
                line.to_string()
            }
        })
        .collect())
}

/// Move `old` to `new` and rewrite imports of it across every file.
pub fn move_file(
    files: &mut FileMap,
    old: &str,
    new: &str,
    code_path: &str,
) -> Result<String, CommandError> {
    let content = files.remove(old).ok_or_else(|| CommandError::FileNotFound {
        action: "move",
        path: old.to_string(),
    })?;
    files.insert(new.to_string(), content);

    let old_ns = path_to_namespace(old, code_path);
    let new_ns = path_to_namespace(new, code_path);
    if old_ns != new_ns {
        for content in files.values_mut() {
            if content.contains(&old_ns) {
                *content = fix_imports(content, &old_ns, &new_ns)?;
            }
        }
    }

    Ok(format!("File {} has been moved to {}.", old, new))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_to_namespace() {
        assert_eq!(path_to_namespace("src/pkg/util.py", "src"), "pkg.util");
        assert_eq!(path_to_namespace("pkg/a.py", "src"), "pkg.a");
        assert_eq!(path_to_namespace("src/data.json", "src/"), "data.json");
    }

    #[test]
    fn test_fix_imports_respects_word_boundaries() {
        let source = "import pkg.a\nfrom pkg.ab import x\nprint('pkg.a')\n";
        let fixed = fix_imports(source, "pkg.a", "pkg.sub.a").unwrap();
        assert_eq!(
            fixed,
            "import pkg.sub.a\nfrom pkg.ab import x\nprint('pkg.a')\n"
        );
    }

    #[test]
    fn test_move_rewrites_references() {
        let mut files: FileMap = [
            ("pkg/a.py", "def f():\n    return 1\n"),
            ("main.py", "from pkg.a import f\nx = 'pkg.a'\nprint(f())\n"),
            ("other.py", "import os\n"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let msg = move_file(&mut files, "pkg/a.py", "pkg/sub/a.py", "src").unwrap();
        assert_eq!(msg, "File pkg/a.py has been moved to pkg/sub/a.py.");
        assert!(!files.contains_key("pkg/a.py"));
        assert_eq!(files["pkg/sub/a.py"], "def f():\n    return 1\n");
        assert_eq!(
            files["main.py"],
            "from pkg.sub.a import f\nx = 'pkg.a'\nprint(f())\n"
        );
        assert_eq!(files["other.py"], "import os\n");
    }

    #[test]
    fn test_move_missing_file() {
        let mut files = FileMap::new();
        let err = move_file(&mut files, "a.py", "b.py", "src").unwrap_err();
        assert_eq!(err.to_string(), "Cannot move file a.py as it does not exist.");
    }
}
