//! In-process ES module bundler.
//!
//! Supports the static subset of module syntax a small site script uses:
//!
//! | Source | Rewritten to |
//! |---|---|
//! | `import x, { a, b as c } from './m.js'` | `var __import_0 = __bundle_require__("m"); var x = __import_0.default, a = ...` |
//! | `import * as ns from './m.js'` | `var ns = __bundle_require__(...)` |
//! | `import './m.js'` | `__bundle_require__(...)` |
//! | `export const/let/var/function/class name` | the declaration, plus a live getter |
//! | `export default function name` / `class Name` | the declaration, plus a live `default` getter |
//! | `export default expr` | `__exports.default = expr` |
//! | `export { a, b as c }` | live getters |
//! | `export { a } from './m.js'`, `export * from './m.js'` | re-export getters |
//!
//! Specifiers must be relative (`./`, `../`); `.js` and `/index.js` are tried
//! when the file is not found as written. Anything else that looks like a
//! module statement is an error naming the file and line. Every rewrite keeps
//! the module's line count so positions in devtools match the source.
//!
//! Modules are emitted sorted by id (the path relative to the project root),
//! so the output only changes when a source does.

use super::{Bundle, Bundler, ScriptError};
use crate::artifact::relative_display;
use crate::config::Mode;
use regex::{Captures, Regex};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static IMPORT_FROM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?m)^([ \t]*)import\s+(?:([\w$]+)\s*,\s*)?([\w$]+|\*\s*as\s+[\w$]+|\{[^}]*\})\s*from\s*["']([^"'\n]+)["'][ \t]*;?"#,
    )
    .expect("valid regex")
});
static IMPORT_SIDE_EFFECT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^([ \t]*)import\s*["']([^"'\n]+)["'][ \t]*;?"#).expect("valid regex")
});
static EXPORT_FROM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?m)^([ \t]*)export\s*(\*(?:\s*as\s+[\w$]+)?|\{[^}]*\})\s*from\s*["']([^"'\n]+)["'][ \t]*;?"#,
    )
    .expect("valid regex")
});
static EXPORT_LIST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^([ \t]*)export\s*\{([^}]*)\}[ \t]*;?"#).expect("valid regex")
});
static EXPORT_DEFAULT_DECL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?m)^([ \t]*)export\s+default\s+((?:async\s+)?function\b\s*\*?\s*|class\s+)([\w$]+)"#,
    )
    .expect("valid regex")
});
static EXPORT_DEFAULT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?m)^([ \t]*)export\s+default\s+"#).expect("valid regex"));
static EXPORT_DECL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?m)^([ \t]*)export\s+((?:async\s+)?function\s*\*?\s*|class\s+|const\s+|let\s+|var\s+)([\w$]+)"#,
    )
    .expect("valid regex")
});
static LEFTOVER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^[ \t]*(?:export\b|import\b\s*[\w${*"'])[^\n]*"#).expect("valid regex")
});

/// `a, b as c` → `[(imported or local, alias)]`.
fn specifier_list(list: &str) -> Vec<(String, String)> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|item| match item.split_once(" as ") {
            Some((name, alias)) => (name.trim().to_string(), alias.trim().to_string()),
            None => (item.to_string(), item.to_string()),
        })
        .collect()
}

/// Newlines matched by `text`, re-emitted so line numbers survive a rewrite.
fn line_padding(text: &str) -> String {
    "\n".repeat(text.matches('\n').count())
}

/// A module after rewriting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transformed {
    pub code: String,
    /// Resolved dependencies, in source order.
    pub deps: Vec<PathBuf>,
}

struct Rewriter<'a, R> {
    file: &'a Path,
    resolve: R,
    counter: usize,
    deps: Vec<PathBuf>,
    /// Exported name → expression that yields its current value.
    exports: BTreeMap<String, String>,
    stars: Vec<String>,
    error: Option<ScriptError>,
}

impl<R> Rewriter<'_, R>
where
    R: FnMut(&Path, &str) -> Result<(String, PathBuf), ScriptError>,
{
    /// `__bundle_require__("id")` for `specifier`, recording the dependency.
    fn require(&mut self, specifier: &str) -> String {
        match (self.resolve)(self.file, specifier) {
            Ok((id, path)) => {
                if !self.deps.contains(&path) {
                    self.deps.push(path);
                }
                format!("__bundle_require__({})", js_string(&id))
            }
            Err(e) => {
                self.error.get_or_insert(e);
                "undefined".to_string()
            }
        }
    }

    fn next_binding(&mut self) -> String {
        let name = format!("__import_{}", self.counter);
        self.counter += 1;
        name
    }

    fn import_from(&mut self, caps: &Captures) -> String {
        let indent = &caps[1];
        let binding = self.next_binding();
        let require = self.require(&caps[4]);
        let mut vars = Vec::new();
        if let Some(default) = caps.get(2) {
            vars.push(format!("{} = {binding}.default", default.as_str()));
        }
        let clause = caps[3].trim();
        if let Some(list) = clause.strip_prefix('{').and_then(|c| c.strip_suffix('}')) {
            for (imported, local) in specifier_list(list) {
                vars.push(format!("{local} = {binding}.{imported}"));
            }
        } else if let Some(ns) = clause.strip_prefix('*') {
            let ns = ns.trim().trim_start_matches("as").trim();
            vars.push(format!("{ns} = {binding}"));
        } else {
            vars.push(format!("{clause} = {binding}.default"));
        }
        let mut out = format!("{indent}var {binding} = {require};");
        if !vars.is_empty() {
            out.push_str(&format!(" var {};", vars.join(", ")));
        }
        out + &line_padding(&caps[0])
    }

    fn import_side_effect(&mut self, caps: &Captures) -> String {
        let require = self.require(&caps[2]);
        format!("{}{require};{}", &caps[1], line_padding(&caps[0]))
    }

    fn export_from(&mut self, caps: &Captures) -> String {
        let indent = &caps[1];
        let clause = caps[2].trim();
        let require = self.require(&caps[3]);
        let padding = line_padding(&caps[0]);
        if clause == "*" {
            self.stars.push(require);
            return format!("{indent}{padding}");
        }
        let binding = self.next_binding();
        if let Some(ns) = clause.strip_prefix('*') {
            let ns = ns.trim().trim_start_matches("as").trim();
            self.exports.insert(ns.to_string(), binding.clone());
        } else if let Some(list) = clause.strip_prefix('{').and_then(|c| c.strip_suffix('}')) {
            for (imported, exported) in specifier_list(list) {
                self.exports
                    .insert(exported, format!("{binding}.{imported}"));
            }
        }
        format!("{indent}var {binding} = {require};{padding}")
    }

    fn export_list(&mut self, caps: &Captures) -> String {
        for (local, exported) in specifier_list(&caps[2]) {
            self.exports.insert(exported, local);
        }
        format!("{}{}", &caps[1], line_padding(&caps[0]))
    }

    /// Named default declarations stay bound in module scope.
    fn export_default_decl(&mut self, caps: &Captures) -> String {
        let name = caps[3].to_string();
        self.exports.insert("default".to_string(), name.clone());
        format!("{}{}{name}", &caps[1], &caps[2])
    }

    fn export_decl(&mut self, caps: &Captures) -> String {
        let name = caps[3].to_string();
        self.exports.insert(name.clone(), name.clone());
        format!("{}{}{name}", &caps[1], &caps[2])
    }

    /// First line of the rewritten module: live getters and star re-exports.
    fn preamble(&self) -> String {
        let mut out = String::new();
        if !self.exports.is_empty() {
            let getters: Vec<String> = self
                .exports
                .iter()
                .map(|(name, expr)| {
                    format!("{}: function () {{ return {expr}; }}", js_string(name))
                })
                .collect();
            out.push_str(&format!(
                "__bundle_export__(__exports, {{ {} }}); ",
                getters.join(", ")
            ));
        }
        for star in &self.stars {
            out.push_str(&format!("__bundle_star__(__exports, {star}); "));
        }
        out
    }
}

fn js_string(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

/// Rewrite one module's import and export statements.
///
/// `resolve` maps `(importing file, specifier)` to `(module id, path)`.
pub fn transform<R>(source: &str, file: &Path, resolve: R) -> Result<Transformed, ScriptError>
where
    R: FnMut(&Path, &str) -> Result<(String, PathBuf), ScriptError>,
{
    let mut rw = Rewriter {
        file,
        resolve,
        counter: 0,
        deps: Vec::new(),
        exports: BTreeMap::new(),
        stars: Vec::new(),
        error: None,
    };

    let code = IMPORT_FROM.replace_all(source, |c: &Captures| rw.import_from(c));
    let code = IMPORT_SIDE_EFFECT.replace_all(&code, |c: &Captures| rw.import_side_effect(c));
    let code = EXPORT_FROM.replace_all(&code, |c: &Captures| rw.export_from(c));
    let code = EXPORT_LIST.replace_all(&code, |c: &Captures| rw.export_list(c));
    let code = EXPORT_DEFAULT_DECL.replace_all(&code, |c: &Captures| rw.export_default_decl(c));
    let code = EXPORT_DEFAULT.replace_all(&code, "${1}__exports.default = ");
    let code = EXPORT_DECL
        .replace_all(&code, |c: &Captures| rw.export_decl(c))
        .into_owned();

    if let Some(e) = rw.error.take() {
        return Err(e);
    }
    if let Some(m) = LEFTOVER.find(&code) {
        let line = code[..m.start()].matches('\n').count() + 1;
        return Err(ScriptError::Unsupported {
            file: file.to_path_buf(),
            line,
            statement: m.as_str().trim().to_string(),
        });
    }

    Ok(Transformed {
        code: rw.preamble() + &code,
        deps: rw.deps,
    })
}

/// Bundles relative ES module imports starting from one entry file.
pub struct ModuleBundler {
    root: PathBuf,
}

impl ModuleBundler {
    /// Module ids are paths relative to `root`.
    pub fn new(root: &Path) -> Self {
        Self {
            root: fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf()),
        }
    }

    fn id(&self, path: &Path) -> String {
        relative_display(path, &self.root)
    }

    fn resolve(&self, from: &Path, specifier: &str) -> Result<(String, PathBuf), ScriptError> {
        if !(specifier.starts_with("./") || specifier.starts_with("../")) {
            return Err(ScriptError::BareSpecifier {
                file: from.to_path_buf(),
                specifier: specifier.to_string(),
            });
        }
        let base = from.parent().unwrap_or(Path::new("."));
        let target = base.join(specifier);
        let candidates = [
            target.clone(),
            PathBuf::from(format!("{}.js", target.display())),
            target.join("index.js"),
        ];
        let found = candidates
            .iter()
            .find(|p| p.is_file())
            .ok_or_else(|| ScriptError::Unresolved {
                file: from.to_path_buf(),
                specifier: specifier.to_string(),
            })?;
        let path = fs::canonicalize(found)?;
        Ok((self.id(&path), path))
    }
}

impl Bundler for ModuleBundler {
    fn bundle(&self, entry: &Path, mode: Mode) -> Result<Bundle, ScriptError> {
        let entry = fs::canonicalize(entry)?;
        let mut modules: BTreeMap<String, String> = BTreeMap::new();
        let mut inputs = Vec::new();
        let mut seen = HashSet::new();
        let mut pending = vec![entry.clone()];

        while let Some(path) = pending.pop() {
            if !seen.insert(path.clone()) {
                continue;
            }
            let source = fs::read_to_string(&path)?;
            let transformed = transform(&source, &path, |from, specifier| self.resolve(from, specifier))?;
            pending.extend(transformed.deps.into_iter().rev());
            modules.insert(self.id(&path), transformed.code);
            inputs.push(path);
        }
        inputs.sort();

        Ok(Bundle {
            code: render(&modules, &self.id(&entry), mode),
            inputs,
        })
    }
}

const RUNTIME: &str = r#"  var __cache = {};
  function __bundle_export__(target, getters) {
    for (var name in getters) {
      Object.defineProperty(target, name, { enumerable: true, get: getters[name] });
    }
  }
  function __bundle_star__(target, source) {
    Object.keys(source).forEach(function (name) {
      if (name !== "default" && !Object.prototype.hasOwnProperty.call(target, name)) {
        Object.defineProperty(target, name, { enumerable: true, get: function () { return source[name]; } });
      }
    });
  }
  function __bundle_require__(id) {
    if (__cache[id]) {
      return __cache[id].exports;
    }
    var module = (__cache[id] = { exports: {} });
    __modules[id](module.exports, __bundle_require__);
    return module.exports;
  }
"#;

/// Assemble the final script.
pub fn render(modules: &BTreeMap<String, String>, entry_id: &str, mode: Mode) -> String {
    let mut out = String::from("(function () {\n  \"use strict\";\n  var __modules = {\n");
    for (id, code) in modules {
        out.push_str(&format!(
            "    {}: function (__exports, __bundle_require__) {{\n",
            js_string(id)
        ));
        match mode {
            Mode::Development => {
                let source = format!("{code}\n//# sourceURL=webpipe:///{id}");
                out.push_str(&format!("      eval({});\n", js_string(&source)));
            }
            Mode::Production => {
                out.push_str(code);
                if !code.ends_with('\n') {
                    out.push('\n');
                }
            }
        }
        out.push_str("    },\n");
    }
    out.push_str("  };\n");
    out.push_str(RUNTIME);
    out.push_str(&format!("  __bundle_require__({});\n}})();\n", js_string(entry_id)));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn resolve_stub(_: &Path, specifier: &str) -> Result<(String, PathBuf), ScriptError> {
        Ok((specifier.trim_start_matches("./").to_string(), PathBuf::from(specifier)))
    }

    fn rewrite(source: &str) -> Transformed {
        transform(source, Path::new("a.js"), resolve_stub).unwrap()
    }

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn rewrites_import_forms() {
        let out = rewrite(
            "import def, { a, b as c } from './m.js';\nimport * as ns from './n.js';\nimport './side.js';\n",
        );
        assert!(out.code.contains(
            r#"var __import_0 = __bundle_require__("m.js"); var def = __import_0.default, a = __import_0.a, c = __import_0.b;"#
        ));
        assert!(out.code.contains(r#"var __import_1 = __bundle_require__("n.js"); var ns = __import_1;"#));
        assert!(out.code.contains(r#"__bundle_require__("side.js");"#));
        assert_eq!(
            out.deps,
            vec![PathBuf::from("./m.js"), PathBuf::from("./n.js"), PathBuf::from("./side.js")]
        );
    }

    #[test]
    fn rewrites_export_forms_with_live_getters() {
        let out = rewrite(
            "export const a = 1;\nexport function run() {}\nlet x = 2;\nexport { x as y };\nexport default run;\n",
        );
        assert!(out.code.starts_with(
            r#"__bundle_export__(__exports, { "a": function () { return a; }, "run": function () { return run; }, "y": function () { return x; } }); "#
        ));
        assert!(out.code.contains("}); const a = 1;\n"));
        assert!(out.code.contains("\nfunction run() {}\n"));
        assert!(out.code.contains("__exports.default = run;"));
        assert!(!out.code.contains("export "));
    }

    #[test]
    fn named_default_declarations_stay_in_scope() {
        let out = rewrite("export default function setup() {}\nsetup.ready = true;\n");
        assert!(out.code.starts_with(
            r#"__bundle_export__(__exports, { "default": function () { return setup; } }); function setup() {}\n"#
        ));
        assert!(out.code.contains("\nsetup.ready = true;\n"));
        assert!(!out.code.contains("__exports.default ="));

        let out = rewrite("export default class Menu {}\n");
        assert!(out.code.contains(r#""default": function () { return Menu; }"#));
        assert!(out.code.contains("class Menu {}"));

        let out = rewrite("export default function () {}\n");
        assert!(out.code.contains("__exports.default = function () {}"));

        let out = rewrite("export default functionality;\n");
        assert_eq!(out.code, "__exports.default = functionality;\n");
    }

    #[test]
    fn identifiers_starting_with_import_are_plain_code() {
        let source = "let importCount = 0;\nimportCount += 1;\nconst imports = [];\nimports.push(importCount);\n";
        let out = rewrite(source);
        assert_eq!(out.code, source);
        assert!(out.deps.is_empty());
    }

    #[test]
    fn rewrites_reexports() {
        let out = rewrite("export * from './all.js';\nexport { a as b } from './one.js';\n");
        assert!(out.code.contains(r#"__bundle_star__(__exports, __bundle_require__("all.js"));"#));
        assert!(out.code.contains(r#""b": function () { return __import_0.a; }"#));
        assert!(out.code.contains(r#"var __import_0 = __bundle_require__("one.js");"#));
    }

    #[test]
    fn multi_line_imports_keep_line_count() {
        let source = "import {\n  a,\n  b\n} from './m.js';\nconsole.log(a, b);\n";
        let out = rewrite(source);
        assert_eq!(out.code.lines().count(), source.lines().count());
        assert!(out.code.lines().nth(4).unwrap().contains("console.log"));
    }

    #[test]
    fn destructured_export_is_unsupported() {
        let err = transform(
            "const o = {};\nexport const { a } = o;\n",
            Path::new("lib.js"),
            resolve_stub,
        )
        .unwrap_err();
        match err {
            ScriptError::Unsupported { line, statement, .. } => {
                assert_eq!(line, 2);
                assert!(statement.starts_with("export const {"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn dynamic_import_is_left_alone() {
        let out = rewrite("import('./lazy.js').then(m => m.go());\n");
        assert!(out.code.contains("import('./lazy.js')"));
        assert!(out.deps.is_empty());
    }

    #[test]
    fn bundle_resolves_extensions_index_and_cycles() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "js/script.js", "import { b } from './b';\nimport './widgets';\nb();\n");
        write(tmp.path(), "js/b.js", "import { a } from './script.js';\nexport function b() {}\n");
        write(tmp.path(), "js/widgets/index.js", "document.title = 'w';\n");

        let bundler = ModuleBundler::new(tmp.path());
        let bundle = bundler
            .bundle(&tmp.path().join("js/script.js"), Mode::Production)
            .unwrap();
        assert_eq!(bundle.inputs.len(), 3);

        let b = bundle.code.find(r#""js/b.js": function"#).unwrap();
        let s = bundle.code.find(r#""js/script.js": function"#).unwrap();
        let w = bundle.code.find(r#""js/widgets/index.js": function"#).unwrap();
        assert!(b < s && s < w, "modules sorted by id");
        assert!(bundle.code.ends_with("__bundle_require__(\"js/script.js\");\n})();\n"));
    }

    #[test]
    fn bundle_output_is_stable() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "js/script.js", "import { x } from './x.js';\nimport { y } from './y.js';\n");
        write(tmp.path(), "js/x.js", "export const x = 1;\n");
        write(tmp.path(), "js/y.js", "export const y = 2;\n");

        let bundler = ModuleBundler::new(tmp.path());
        let entry = tmp.path().join("js/script.js");
        let first = bundler.bundle(&entry, Mode::Development).unwrap();
        let second = bundler.bundle(&entry, Mode::Development).unwrap();
        assert_eq!(first, second);
        assert!(first.code.contains("sourceURL=webpipe:///js/x.js"));
    }

    #[test]
    fn unresolved_relative_import_names_the_importer() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "js/script.js", "import './missing.js';\n");
        let err = ModuleBundler::new(tmp.path())
            .bundle(&tmp.path().join("js/script.js"), Mode::Production)
            .unwrap_err();
        match err {
            ScriptError::Unresolved { file, specifier } => {
                assert!(file.ends_with("script.js"));
                assert_eq!(specifier, "./missing.js");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
