//! Failure taxonomy of the validation engine
//!
//! Every variant is converted into a failing [`ValidationVerdict`] at the
//! dispatcher; nothing here is ever surfaced to a caller as an error.

use thiserror::Error;

use super::utils::tail_chars;
use super::verdict::ValidationVerdict;
use crate::engine::LoaderError;

/// Maximum stderr characters quoted in a runtime failure message
const STDERR_PREVIEW_CHARS: usize = 1500;

#[derive(Debug, Error)]
pub enum GradeError {
    #[error("Error de sintaxis: {0}")]
    Syntax(String),

    #[error("{}", security_message(.imports, .calls))]
    SecurityViolation {
        imports: Vec<String>,
        calls: Vec<String>,
    },

    #[error("{}", .0.join("\n"))]
    StaticRuleViolation(Vec<String>),

    #[error("{}", runtime_message(.exit_code, .stderr))]
    RuntimeFailure {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Tiempo de ejecución excedido ({seconds}s). ¿Hay un bucle infinito?")]
    TimedOut { seconds: f64 },

    #[error("Se esperaba:\n{expected}\nPero se obtuvo:\n{actual}")]
    OutputMismatch { expected: String, actual: String },

    #[error("No se encontró '{0}' en tu código.")]
    TargetNotDefined(String),

    #[error("Error al ejecutar ({kind}): {message}")]
    InvocationFailed { kind: String, message: String },

    #[error("No se pudo cargar tu código: {0}")]
    LoadFailed(String),

    #[error("Configuración del ejercicio inválida: {0}")]
    Config(String),
}

pub(crate) fn import_denied(module: &str) -> String {
    format!("No está permitido importar el módulo '{}'.", module)
}

pub(crate) fn call_denied(call: &str) -> String {
    format!("No está permitido usar la función '{}'.", call)
}

fn security_message(imports: &[String], calls: &[String]) -> String {
    imports
        .iter()
        .map(|m| import_denied(m))
        .chain(calls.iter().map(|c| call_denied(c)))
        .collect::<Vec<_>>()
        .join("\n")
}

fn runtime_message(exit_code: &Option<i32>, stderr: &str) -> String {
    let code = exit_code
        .map(|c| c.to_string())
        .unwrap_or_else(|| "desconocido".to_string());
    let stderr = stderr.trim();
    if stderr.is_empty() {
        format!("Tu programa terminó con un error (código {}).", code)
    } else {
        format!(
            "Tu programa terminó con un error (código {}):\n{}",
            code,
            tail_chars(stderr, STDERR_PREVIEW_CHARS)
        )
    }
}

impl GradeError {
    /// Stable tag recorded in `details.error_kind`
    pub fn kind(&self) -> &'static str {
        match self {
            GradeError::Syntax(_) => "syntax_error",
            GradeError::SecurityViolation { .. } => "security_violation",
            GradeError::StaticRuleViolation(_) => "static_rule_violation",
            GradeError::RuntimeFailure { .. } => "runtime_failure",
            GradeError::TimedOut { .. } => "timed_out",
            GradeError::OutputMismatch { .. } => "output_mismatch",
            GradeError::TargetNotDefined(_) => "target_not_defined",
            GradeError::InvocationFailed { .. } => "invocation_failed",
            GradeError::LoadFailed(_) => "load_failed",
            GradeError::Config(_) => "config_error",
        }
    }

    pub fn into_verdict(self) -> ValidationVerdict {
        let verdict = ValidationVerdict::fail(self.to_string()).with_detail("error_kind", self.kind());
        match self {
            GradeError::RuntimeFailure { exit_code, stderr } => {
                let verdict = verdict.with_detail("stderr", stderr).with_detail("timed_out", false);
                match exit_code {
                    Some(code) => verdict.with_detail("exit_code", code),
                    None => verdict,
                }
            }
            GradeError::TimedOut { .. } => verdict.with_detail("timed_out", true),
            GradeError::SecurityViolation { imports, calls } => verdict
                .with_detail("disallowed_imports", imports)
                .with_detail("disallowed_calls", calls),
            GradeError::StaticRuleViolation(failures) => verdict.with_detail("failures", failures),
            GradeError::OutputMismatch { expected, actual } => verdict
                .with_detail("expected", expected)
                .with_detail("actual", actual),
            _ => verdict,
        }
    }
}

impl From<LoaderError> for GradeError {
    fn from(err: LoaderError) -> Self {
        match err {
            LoaderError::TargetNotDefined(name) => GradeError::TargetNotDefined(name),
            LoaderError::InvocationFailed { kind, message } => {
                GradeError::InvocationFailed { kind, message }
            }
            LoaderError::LoadFailed(message) => GradeError::LoadFailed(message),
            LoaderError::TimedOut { seconds } => GradeError::TimedOut { seconds },
            LoaderError::Protocol(message) => GradeError::LoadFailed(message),
        }
    }
}
