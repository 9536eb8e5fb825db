//! Evaluates a [`RuleSet`] against an [`AnalysisSummary`]
//!
//! Every check produces a human message; an empty list means the rules hold.

use crate::analysis::queries::function_has_decorator;
use crate::analysis::security::top_level_module;
use crate::analysis::{AnalysisSummary, ClassInfo, FunctionInfo, StructuralFlags};
use std::collections::BTreeSet;
use crate::core::error::{call_denied, import_denied};

use super::{DecoratorRequirement, RuleSet, StructuralRequirements};

/// Part of the program a rule set is evaluated against
#[derive(Debug, Clone, Copy)]
pub enum Scope<'a> {
    Program,
    Function(&'a FunctionInfo),
    Class(&'a ClassInfo),
}

impl<'a> Scope<'a> {
    fn flags(&self, summary: &'a AnalysisSummary) -> &'a StructuralFlags {
        match self {
            Scope::Program => &summary.flags,
            Scope::Function(function) => &function.flags,
            Scope::Class(class) => &class.flags,
        }
    }

    fn variables_defined(&self, summary: &'a AnalysisSummary) -> &'a BTreeSet<String> {
        match self {
            Scope::Program => &summary.variables_defined,
            Scope::Function(function) => &function.variables_defined,
            Scope::Class(class) => &class.variables_defined,
        }
    }

    fn variables_used_in_prints(&self, summary: &'a AnalysisSummary) -> &'a BTreeSet<String> {
        match self {
            Scope::Program => &summary.variables_used_in_prints,
            Scope::Function(function) => &function.variables_used_in_prints,
            Scope::Class(class) => &class.variables_used_in_prints,
        }
    }

    fn label(&self) -> String {
        match self {
            Scope::Program => "tu código".to_string(),
            Scope::Function(function) => format!("la función '{}'", function.name),
            Scope::Class(class) => format!("la clase '{}'", class.name),
        }
    }

    fn is_generator(&self, summary: &AnalysisSummary) -> bool {
        match self {
            Scope::Program => summary.flags.has_yield,
            Scope::Function(function) => function.is_generator,
            Scope::Class(class) => class.methods.values().any(|m| m.is_generator),
        }
    }

    fn is_async(&self, summary: &AnalysisSummary) -> bool {
        match self {
            Scope::Program => summary.defined_functions.values().any(|f| f.is_async),
            Scope::Function(function) => function.is_async,
            Scope::Class(class) => class.methods.values().any(|m| m.is_async),
        }
    }
}

/// Disallowed imports and calls, one message each
pub fn security_failures(summary: &AnalysisSummary) -> Vec<String> {
    summary
        .disallowed_imports
        .iter()
        .map(|m| import_denied(m))
        .chain(summary.disallowed_calls.iter().map(|c| call_denied(c)))
        .collect()
}

/// Names from `required_variable_definitions` never assigned within the scope
pub fn definition_failures(rules: &RuleSet, summary: &AnalysisSummary, scope: Scope<'_>) -> Vec<String> {
    let defined = scope.variables_defined(summary);
    rules
        .required_variable_definitions
        .iter()
        .filter(|name| !defined.contains(name.as_str()))
        .map(|name| format!("Debes definir la variable '{}'.", name))
        .collect()
}

/// `required_variables_in_print`: a missing definition is reported instead of the missing use
pub fn print_variable_failures(rules: &RuleSet, summary: &AnalysisSummary, scope: Scope<'_>) -> Vec<String> {
    let defined = scope.variables_defined(summary);
    let printed = scope.variables_used_in_prints(summary);
    rules
        .required_variables_in_print
        .iter()
        .filter_map(|name| {
            if !defined.contains(name.as_str()) {
                Some(format!("Debes definir la variable '{}'.", name))
            } else if !printed.contains(name.as_str()) {
                Some(format!(
                    "Debes usar la variable '{}' dentro de print().",
                    name
                ))
            } else {
                None
            }
        })
        .collect()
}

/// Structural presence rules for the given scope
pub fn presence_failures(rules: &RuleSet, summary: &AnalysisSummary, scope: Scope<'_>) -> Vec<String> {
    let flags = scope.flags(summary);
    let target = scope.label();
    let mut failures = Vec::new();

    let mut require = |wanted: bool, present: bool, construct: &str| {
        if wanted && !present {
            failures.push(format!("{} debe usar {}.", capitalize(&target), construct));
        }
    };

    require(rules.require_for_loop, flags.has_for, "un bucle for");
    require(
        rules.require_if_statement.unwrap_or(false),
        flags.has_if,
        "una sentencia if",
    );
    require(
        rules.require_list_comprehension,
        flags.has_list_comp,
        "una comprensión de listas",
    );
    require(
        rules.require_dict_comprehension,
        flags.has_dict_comp,
        "una comprensión de diccionarios",
    );
    require(
        rules.require_set_comprehension,
        flags.has_set_comp,
        "una comprensión de conjuntos",
    );
    require(rules.require_lambda, flags.has_lambda, "una función lambda");
    require(
        rules.require_try_except,
        flags.has_try_except,
        "un bloque try/except",
    );
    require(
        rules.require_yield,
        scope.is_generator(summary),
        "yield (debe ser un generador)",
    );
    require(
        rules.require_with_statement,
        flags.has_with,
        "una sentencia with",
    );
    require(
        rules.require_return_statement,
        flags.has_return,
        "una sentencia return",
    );
    require(
        rules.require_async,
        scope.is_async(summary),
        "async def (debe ser asíncrona)",
    );
    require(rules.require_await, flags.has_await, "await");

    failures
}

/// Full rule evaluation. Security is only screened at program scope and
/// short-circuits everything else.
pub fn check_rules(rules: &RuleSet, summary: &AnalysisSummary, scope: Scope<'_>) -> Vec<String> {
    if let Scope::Program = scope {
        let security = security_failures(summary);
        if !security.is_empty() {
            return security;
        }
    }

    let mut failures = presence_failures(rules, summary, scope);
    failures.extend(definition_failures(rules, summary, scope));
    failures.extend(print_variable_failures(rules, summary, scope));
    failures
}

/// Failure message when `module` is not imported
pub fn missing_import(summary: &AnalysisSummary, module: &str) -> Option<String> {
    if summary.imports.contains(top_level_module(module)) {
        None
    } else {
        Some(format!("Debes importar el módulo '{}'.", module))
    }
}

/// Failure message when the function lacks the decorator (or does not exist)
pub fn missing_decorator(summary: &AnalysisSummary, req: &DecoratorRequirement) -> Option<String> {
    let decorator = req.decorator.trim_start_matches('@');
    if function_has_decorator(summary, &req.function, decorator) {
        None
    } else if !summary.defined_functions.contains_key(&req.function) {
        Some(format!("No se encontró la función '{}'.", req.function))
    } else {
        Some(format!(
            "La función '{}' debe usar el decorador @{}.",
            req.function, decorator
        ))
    }
}

pub fn structural_failures(req: &StructuralRequirements, summary: &AnalysisSummary) -> Vec<String> {
    req.imports
        .iter()
        .filter_map(|module| missing_import(summary, module))
        .chain(
            req.decorators
                .iter()
                .filter_map(|d| missing_decorator(summary, d)),
        )
        .collect()
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{analyze, queries, SecurityPolicy};
    use serde_json::json;

    fn summary(source: &str) -> AnalysisSummary {
        analyze(source, &SecurityPolicy::default())
    }

    fn rules(value: serde_json::Value) -> RuleSet {
        RuleSet::from_value(&value).unwrap()
    }

    #[test]
    fn test_security_short_circuits() {
        let summary = summary("import os\nx = 1\n");
        let failures = check_rules(
            &rules(json!({"require_for_loop": true})),
            &summary,
            Scope::Program,
        );
        assert_eq!(failures.len(), 1);
        assert!(failures[0].contains("'os'"));
    }

    #[test]
    fn test_presence_rules() {
        let summary = summary("total = sum([n for n in range(3)])\nprint(total)\n");
        let failures = check_rules(
            &rules(json!({"require_list_comprehension": true, "require_for_loop": true})),
            &summary,
            Scope::Program,
        );
        assert_eq!(failures.len(), 1);
        assert!(failures[0].contains("bucle for"));
    }

    #[test]
    fn test_missing_definition_takes_precedence() {
        let summary = summary("nombre = 'Ana'\nprint('Hola Ana')\n");
        let failures = print_variable_failures(
            &rules(json!({"required_variables_in_print": ["nombre", "edad"]})),
            &summary,
            Scope::Program,
        );
        assert_eq!(failures.len(), 2);
        assert!(failures[0].contains("dentro de print()"));
        assert!(failures[1].contains("definir la variable 'edad'"));
    }

    #[test]
    fn test_function_scope_rules() {
        let source = r#"
async def descargar(url):
    await esperar()
    return url

def sincrona():
    return 1
"#;
        let summary = summary(source);
        let scoped = rules(json!({"require_async": true, "require_await": true}));

        let async_fn = queries::find_function(&summary, "descargar").unwrap();
        assert!(check_rules(&scoped, &summary, Scope::Function(async_fn)).is_empty());

        let sync_fn = queries::find_function(&summary, "sincrona").unwrap();
        let failures = check_rules(&scoped, &summary, Scope::Function(sync_fn));
        assert_eq!(failures.len(), 2);
        assert!(failures[0].starts_with("La función 'sincrona'"));
    }

    #[test]
    fn test_require_yield_scoped_to_function() {
        let summary = summary("def gen():\n    yield 1\n\ndef normal():\n    return [1]\n");
        let scoped = rules(json!({"require_yield": true}));
        let normal = queries::find_function(&summary, "normal").unwrap();
        assert_eq!(check_rules(&scoped, &summary, Scope::Function(normal)).len(), 1);
        let gen = queries::find_function(&summary, "gen").unwrap();
        assert!(check_rules(&scoped, &summary, Scope::Function(gen)).is_empty());
    }

    #[test]
    fn test_structural_requirements() {
        let summary = summary("import functools\n@functools.lru_cache\ndef fib(n):\n    return n\ndef g():\n    pass\n");
        let req: StructuralRequirements = serde_json::from_value(json!({
            "imports": ["functools", "itertools"],
            "decorators": [
                {"function": "fib", "decorator": "@lru_cache"},
                {"function": "g", "decorator": "staticmethod"},
                {"function": "h", "decorator": "cache"}
            ]
        }))
        .unwrap();
        let failures = structural_failures(&req, &summary);
        assert_eq!(failures.len(), 3);
        assert!(failures[0].contains("'itertools'"));
        assert!(failures[1].contains("@staticmethod"));
        assert!(failures[2].contains("No se encontró la función 'h'"));
    }

    #[test]
    fn test_required_definitions() {
        let summary = summary("a = 1\n");
        let failures = definition_failures(
            &rules(json!({"required_variable_definitions": ["a", "b"]})),
            &summary,
            Scope::Program,
        );
        assert_eq!(failures, vec!["Debes definir la variable 'b'.".to_string()]);
    }

    #[test]
    fn test_variable_rules_follow_scope() {
        let source = r#"
total = 0
print(total)

def resumen(items):
    cuenta = len(items)
    print(f"{cuenta} elementos")
    return cuenta

def vacia():
    return None
"#;
        let summary = summary(source);
        let scoped = rules(json!({
            "required_variable_definitions": ["cuenta"],
            "required_variables_in_print": ["cuenta"]
        }));

        let resumen = queries::find_function(&summary, "resumen").unwrap();
        assert!(check_rules(&scoped, &summary, Scope::Function(resumen)).is_empty());

        let vacia = queries::find_function(&summary, "vacia").unwrap();
        let failures = check_rules(&scoped, &summary, Scope::Function(vacia));
        assert_eq!(failures.len(), 2, "{:?}", failures);
        assert!(failures.iter().all(|f| f.contains("definir la variable 'cuenta'")));

        let total = rules(json!({"required_variables_in_print": ["total"]}));
        assert_eq!(check_rules(&total, &summary, Scope::Function(resumen)).len(), 1);
        assert!(check_rules(&total, &summary, Scope::Program).is_empty());
    }
}
