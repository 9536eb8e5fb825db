//! Static analysis of a submission
//!
//! The source is parsed once and walked once; the resulting
//! [`AnalysisSummary`] feeds the rule checker and every validator.
//! A parse failure is captured in `syntax_error` and never raised.

pub mod queries;
pub mod security;
mod walker;

use rustpython_parser::{ast, Parse};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

pub use security::SecurityPolicy;

/// Name of the standard console writer
pub const WRITE_LINE: &str = "print";

/// Presence flags for structural constructs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StructuralFlags {
    pub has_for: bool,
    pub has_if: bool,
    pub has_list_comp: bool,
    pub has_dict_comp: bool,
    pub has_set_comp: bool,
    pub has_lambda: bool,
    pub has_try_except: bool,
    pub has_yield: bool,
    pub has_with: bool,
    pub has_await: bool,
    pub has_return: bool,
}

impl StructuralFlags {
    pub fn merge(&mut self, other: &StructuralFlags) {
        self.has_for |= other.has_for;
        self.has_if |= other.has_if;
        self.has_list_comp |= other.has_list_comp;
        self.has_dict_comp |= other.has_dict_comp;
        self.has_set_comp |= other.has_set_comp;
        self.has_lambda |= other.has_lambda;
        self.has_try_except |= other.has_try_except;
        self.has_yield |= other.has_yield;
        self.has_with |= other.has_with;
        self.has_await |= other.has_await;
        self.has_return |= other.has_return;
    }
}

/// A decorator as written, e.g. `dataclass(frozen=True)`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DecoratorInfo {
    /// Dotted callee name (`functools.lru_cache`)
    pub name: String,
    /// Keyword arguments rendered as source-like literals (`frozen` -> `True`)
    pub keywords: BTreeMap<String, String>,
}

impl DecoratorInfo {
    /// Last dotted segment: `dataclasses.dataclass` -> `dataclass`
    pub fn base_name(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }

    /// Matches either the full dotted name or its last segment
    pub fn matches(&self, wanted: &str) -> bool {
        let wanted = wanted.trim_start_matches('@');
        self.name == wanted || self.base_name() == wanted
    }

    pub fn is_property(&self) -> bool {
        matches!(self.base_name(), "property" | "cached_property" | "setter" | "getter")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FunctionInfo {
    pub name: String,
    pub is_async: bool,
    pub decorators: Vec<DecoratorInfo>,
    /// Contains a `yield` in its own body (nested definitions excluded)
    pub is_generator: bool,
    pub flags: StructuralFlags,
    /// Names assigned anywhere in the body
    pub variables_defined: BTreeSet<String>,
    pub variables_used_in_prints: BTreeSet<String>,
}

impl FunctionInfo {
    pub fn has_decorator(&self, decorator: &str) -> bool {
        self.decorators.iter().any(|d| d.matches(decorator))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClassInfo {
    pub name: String,
    pub decorators: Vec<DecoratorInfo>,
    pub bases: Vec<String>,
    pub methods: BTreeMap<String, FunctionInfo>,
    pub properties: BTreeSet<String>,
    /// Class-level assignments plus `self.<name>` assignments in methods
    pub attributes: BTreeSet<String>,
    pub flags: StructuralFlags,
    /// Names assigned anywhere in the class body, methods included
    pub variables_defined: BTreeSet<String>,
    pub variables_used_in_prints: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrintArg {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub name: String,
}

impl PrintArg {
    pub fn variable(name: impl Into<String>) -> Self {
        Self {
            kind: "variable",
            name: name.into(),
        }
    }
}

/// Shape of one write-line call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PrintCall {
    pub is_formatted_string: bool,
    pub args: Vec<PrintArg>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnalysisSummary {
    pub syntax_error: Option<String>,
    pub imports: BTreeSet<String>,
    pub disallowed_imports: BTreeSet<String>,
    pub function_calls: BTreeSet<String>,
    pub disallowed_calls: BTreeSet<String>,
    pub flags: StructuralFlags,
    pub defined_functions: BTreeMap<String, FunctionInfo>,
    pub defined_classes: BTreeMap<String, ClassInfo>,
    pub variables_defined: BTreeSet<String>,
    pub variables_used_in_prints: BTreeSet<String>,
    pub print_calls: Vec<PrintCall>,
}

impl AnalysisSummary {
    pub fn is_valid(&self) -> bool {
        self.syntax_error.is_none()
    }

    pub fn is_secure(&self) -> bool {
        self.disallowed_imports.is_empty() && self.disallowed_calls.is_empty()
    }
}

/// Parse and analyse a submission in a single pass
pub fn analyze(source: &str, policy: &SecurityPolicy) -> AnalysisSummary {
    let suite = match ast::Suite::parse(source, "<submission>") {
        Ok(suite) => suite,
        Err(err) => {
            let offset = u32::from(err.offset) as usize;
            let (line, column) = line_column(source, offset);
            let message = format!("línea {}, columna {}: {}", line, column, err.error);
            debug!("Submission failed to parse: {}", message);
            return AnalysisSummary {
                syntax_error: Some(message),
                ..Default::default()
            };
        }
    };

    let scan = walker::Scan::of_body(&suite);
    let disallowed_imports = policy.screen_imports(&scan.imports);
    let disallowed_calls = policy.screen_calls(&scan.function_calls);

    AnalysisSummary {
        syntax_error: None,
        imports: scan.imports,
        disallowed_imports,
        function_calls: scan.function_calls,
        disallowed_calls,
        flags: scan.flags,
        defined_functions: scan.functions,
        defined_classes: scan.classes,
        variables_defined: scan.variables_defined,
        variables_used_in_prints: scan.variables_used_in_prints,
        print_calls: scan.print_calls,
    }
}

/// 1-based line and column of a byte offset
fn line_column(source: &str, offset: usize) -> (usize, usize) {
    let offset = offset.min(source.len());
    let before = source.get(..offset).unwrap_or(source);
    let line = before.matches('\n').count() + 1;
    let column = before
        .rsplit('\n')
        .next()
        .map(|s| s.chars().count())
        .unwrap_or(0)
        + 1;
    (line, column)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyze_default(source: &str) -> AnalysisSummary {
        analyze(source, &SecurityPolicy::default())
    }

    #[test]
    fn test_syntax_error_short_circuits() {
        let summary = analyze_default("print('hola'\n");
        assert!(!summary.is_valid());
        assert!(summary.syntax_error.as_deref().unwrap().contains("línea"));
        assert!(summary.imports.is_empty());
        assert!(summary.print_calls.is_empty());
    }

    #[test]
    fn test_imports_and_denylist() {
        let summary = analyze_default("import os.path\nfrom math import sqrt\nimport socket as s\n");
        assert!(summary.imports.contains("os"));
        assert!(summary.imports.contains("math"));
        assert!(summary.disallowed_imports.contains("os"));
        assert!(summary.disallowed_imports.contains("socket"));
        assert!(!summary.disallowed_imports.contains("math"));
        assert!(!summary.is_secure());
    }

    #[test]
    fn test_disallowed_calls_at_any_depth() {
        let summary = analyze_default("def f():\n    return [eval(x) for x in '12']\n");
        assert!(summary.function_calls.contains("eval"));
        assert!(summary.disallowed_calls.contains("eval"));
    }

    #[test]
    fn test_fstring_print_variables() {
        let source = r#"
largo = 10
ancho = 5
area = largo * ancho
print(f"El área de un rectángulo de {largo}x{ancho} es {area}.")
"#;
        let summary = analyze_default(source);
        assert_eq!(summary.print_calls.len(), 1);
        assert!(summary.print_calls[0].is_formatted_string);
        for name in ["largo", "ancho", "area"] {
            assert!(summary.variables_defined.contains(name));
            assert!(summary.variables_used_in_prints.contains(name));
        }
    }

    #[test]
    fn test_non_trivial_placeholders_do_not_count() {
        let summary = analyze_default("x = 2\nprint(f\"{x * 2} {len('a')} {obj.attr}\")\n");
        assert!(summary.variables_used_in_prints.is_empty());
        assert!(summary.print_calls[0].is_formatted_string);
    }

    #[test]
    fn test_bare_name_print_args() {
        let summary = analyze_default("nombre = 'Ana'\nprint('Hola', nombre)\nprint(nombre.upper())\n");
        assert_eq!(summary.print_calls.len(), 2);
        assert!(!summary.print_calls[0].is_formatted_string);
        assert_eq!(summary.print_calls[0].args, vec![PrintArg::variable("nombre")]);
        assert!(summary.print_calls[1].args.is_empty());
        assert!(summary.variables_used_in_prints.contains("nombre"));
    }

    #[test]
    fn test_structural_flags() {
        let source = r#"
squares = [n * n for n in range(3)]
index = {n: n for n in range(3)}
unique = {n for n in range(3)}
double = lambda v: v * 2
for item in squares:
    if item > 1:
        print(item)
try:
    value = int("x")
except ValueError:
    value = 0
with open_thing() as handle:
    pass
"#;
        let flags = analyze_default(source).flags;
        assert!(flags.has_for);
        assert!(flags.has_if);
        assert!(flags.has_list_comp);
        assert!(flags.has_dict_comp);
        assert!(flags.has_set_comp);
        assert!(flags.has_lambda);
        assert!(flags.has_try_except);
        assert!(flags.has_with);
        assert!(!flags.has_yield);
        assert!(!flags.has_await);
        assert!(!flags.has_return);
    }

    #[test]
    fn test_variables_defined_from_all_targets() {
        let source = "a, (b, c) = 1, (2, 3)\nd += 1\ne: int = 4\nfor f in []: pass\nif (g := 5): pass\n";
        let summary = analyze_default(source);
        for name in ["a", "b", "c", "d", "e", "f", "g"] {
            assert!(summary.variables_defined.contains(name), "missing {}", name);
        }
    }

    #[test]
    fn test_line_column() {
        assert_eq!(line_column("ab\ncd", 0), (1, 1));
        assert_eq!(line_column("ab\ncd", 4), (2, 2));
    }
}
