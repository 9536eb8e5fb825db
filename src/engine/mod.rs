//! Execution engine
//!
//! Everything that actually runs a submission goes through
//! [`ExecutionBackend`]: whole-program runs (optionally with print-type
//! interception) and module-level invocations through the dynamic loader.

pub mod backend;
pub mod interception;
pub mod loader;
pub mod python;
#[cfg(test)]
pub mod stub;
pub mod value;

pub use backend::{
    ExecutionBackend, InvocationReport, InvocationRequest, LoaderError, LoaderOp, PrintRecord,
    SandboxOutcome, ScriptRequest,
};
pub use python::PythonBackend;
pub use value::PyValue;
