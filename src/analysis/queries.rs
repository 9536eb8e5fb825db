//! Lookups over an [`AnalysisSummary`] used by the class and exam validators

use super::{AnalysisSummary, ClassInfo, FunctionInfo};

pub fn find_class<'a>(summary: &'a AnalysisSummary, name: &str) -> Option<&'a ClassInfo> {
    summary.defined_classes.get(name)
}

pub fn find_function<'a>(summary: &'a AnalysisSummary, name: &str) -> Option<&'a FunctionInfo> {
    summary.defined_functions.get(name)
}

impl ClassInfo {
    /// Method, property or attribute with this name
    pub fn has_member(&self, name: &str) -> bool {
        self.methods.contains_key(name)
            || self.properties.contains(name)
            || self.attributes.contains(name)
    }

    pub fn has_decorator(&self, decorator: &str) -> bool {
        self.decorators.iter().any(|d| d.matches(decorator))
    }

    pub fn is_dataclass(&self) -> bool {
        self.has_decorator("dataclass")
    }

    pub fn is_frozen_dataclass(&self) -> bool {
        self.decorators.iter().any(|d| {
            d.matches("dataclass") && d.keywords.get("frozen").map(String::as_str) == Some("True")
        })
    }
}

pub fn function_has_decorator(summary: &AnalysisSummary, function: &str, decorator: &str) -> bool {
    find_function(summary, function).is_some_and(|f| f.has_decorator(decorator))
}

pub fn is_generator(summary: &AnalysisSummary, function: &str) -> bool {
    find_function(summary, function).is_some_and(|f| f.is_generator)
}

/// The only class in the program, when there is exactly one
pub fn sole_class(summary: &AnalysisSummary) -> Option<&ClassInfo> {
    let mut classes = summary.defined_classes.values();
    match (classes.next(), classes.next()) {
        (Some(class), None) => Some(class),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{analyze, SecurityPolicy};

    fn summary(source: &str) -> AnalysisSummary {
        analyze(source, &SecurityPolicy::default())
    }

    #[test]
    fn test_frozen_dataclass_with_property() {
        let source = r#"
from dataclasses import dataclass

@dataclass(frozen=True)
class Punto:
    x: int
    y: int

    @property
    def norma(self):
        return (self.x ** 2 + self.y ** 2) ** 0.5

    def __str__(self):
        return f"({self.x}, {self.y})"
"#;
        let summary = summary(source);
        let class = find_class(&summary, "Punto").unwrap();
        assert!(class.is_dataclass());
        assert!(class.is_frozen_dataclass());
        assert!(class.properties.contains("norma"));
        assert!(class.has_member("x"));
        assert!(class.has_member("__str__"));
        assert!(!class.has_member("z"));
        assert_eq!(sole_class(&summary).map(|c| c.name.as_str()), Some("Punto"));
    }

    #[test]
    fn test_plain_dataclass_is_not_frozen() {
        let summary = summary("import dataclasses\n@dataclasses.dataclass\nclass A:\n    v: int = 0\n");
        let class = find_class(&summary, "A").unwrap();
        assert!(class.is_dataclass());
        assert!(!class.is_frozen_dataclass());
    }

    #[test]
    fn test_self_attributes_collected() {
        let source = "class Cuenta:\n    def __init__(self, saldo):\n        self.saldo = saldo\n";
        let summary = summary(source);
        let class = find_class(&summary, "Cuenta").unwrap();
        assert!(class.attributes.contains("saldo"));
        assert!(class.methods.contains_key("__init__"));
    }

    #[test]
    fn test_generator_detection_ignores_nested_definitions() {
        let source = r#"
def pares(n):
    for i in range(n):
        if i % 2 == 0:
            yield i

def fabrica():
    def interna():
        yield 1
    return interna
"#;
        let summary = summary(source);
        assert!(is_generator(&summary, "pares"));
        assert!(is_generator(&summary, "interna"));
        assert!(!is_generator(&summary, "fabrica"));
        assert!(!is_generator(&summary, "missing"));
    }

    #[test]
    fn test_function_decorators() {
        let source = "import functools\n@functools.lru_cache(maxsize=None)\ndef fib(n):\n    return n\n";
        let summary = summary(source);
        assert!(function_has_decorator(&summary, "fib", "lru_cache"));
        assert!(function_has_decorator(&summary, "fib", "@functools.lru_cache"));
        assert!(!function_has_decorator(&summary, "fib", "cache"));
    }

    #[test]
    fn test_async_function() {
        let summary = summary("async def f():\n    await g()\n");
        let f = find_function(&summary, "f").unwrap();
        assert!(f.is_async);
        assert!(f.flags.has_await);
    }
}
