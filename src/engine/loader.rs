//! Dynamic loader protocol
//!
//! The harness below is started with a JSON request on stdin. It imports the
//! submission under a fresh module name, runs each op in order and writes a
//! JSON report after the sentinel line. A failing op does not stop the rest.
//! The sentinel is taken out of the request before the submission loads, and
//! a report is only accepted from a harness that exited cleanly with exactly
//! one sentinel in its output.

use serde::{Deserialize, Serialize};

use super::backend::{InvocationReport, LoaderError, LoaderOp};
use super::interception::{split_trailer, TrailerError};
use super::value::PyValue;
use crate::core::utils::tail_chars;

pub const LOADER_HARNESS: &str = r#"import asyncio
import builtins
import contextlib
import functools
import importlib.util
import inspect
import io
import itertools
import json
import math
import sys

GENERATOR_LIMIT = 10000
OUTPUT_LIMIT = 65536
I64_MIN, I64_MAX = -(2 ** 63), 2 ** 63 - 1
SAFE_BUILTIN_NAMES = (
    "abs", "all", "any", "bool", "dict", "divmod", "enumerate", "filter",
    "float", "frozenset", "getattr", "hasattr", "int", "isinstance", "len",
    "list", "map", "max", "min", "print", "range", "repr", "reversed",
    "round", "set", "sorted", "str", "sum", "tuple", "type", "zip",
    "Exception", "ValueError", "TypeError", "KeyError", "IndexError",
    "AttributeError", "ZeroDivisionError",
)
SAFE_BUILTINS = {name: getattr(builtins, name) for name in SAFE_BUILTIN_NAMES}


class OpError(Exception):
    def __init__(self, kind, name, message):
        super().__init__(message)
        self.payload = {"kind": kind, "name": name, "type": None, "message": message}


def describe(exc):
    return {"kind": "raised", "name": None, "type": type(exc).__name__, "message": str(exc)}


def safe_repr(value):
    try:
        return repr(value)[:2000]
    except BaseException:
        return "<%s>" % type(value).__name__


def encode(value, depth=0):
    if depth > 50:
        return {"t": "object", "v": {"type_name": type(value).__name__, "repr": safe_repr(value)}}
    if value is None:
        return {"t": "none"}
    if isinstance(value, bool):
        return {"t": "bool", "v": value}
    if isinstance(value, int) and I64_MIN <= value <= I64_MAX:
        return {"t": "int", "v": int(value)}
    if isinstance(value, float) and math.isfinite(value):
        return {"t": "float", "v": float(value)}
    if isinstance(value, str):
        return {"t": "str", "v": str(value)}
    if isinstance(value, list):
        return {"t": "list", "v": [encode(item, depth + 1) for item in value]}
    if isinstance(value, tuple):
        return {"t": "tuple", "v": [encode(item, depth + 1) for item in value]}
    if isinstance(value, (set, frozenset)):
        items = sorted(value, key=safe_repr)
        return {"t": "set", "v": [encode(item, depth + 1) for item in items]}
    if isinstance(value, dict):
        pairs = [[encode(k, depth + 1), encode(v, depth + 1)] for k, v in value.items()]
        return {"t": "dict", "v": pairs}
    return {"t": "object", "v": {"type_name": type(value).__name__, "repr": safe_repr(value)}}


async def drain_async(agen):
    items = []
    async for item in agen:
        items.append(item)
        if len(items) >= GENERATOR_LIMIT:
            break
    return items


def settle(value):
    if inspect.iscoroutine(value):
        value = asyncio.run(value)
    if inspect.isasyncgen(value):
        value = asyncio.run(drain_async(value))
    if inspect.isgenerator(value):
        value = list(itertools.islice(value, GENERATOR_LIMIT))
    return value


def resolve(module, name):
    if not hasattr(module, name):
        raise OpError("not_defined", name, "'%s' is not defined" % name)
    return getattr(module, name)


def instance(state, label):
    if label not in state:
        raise OpError("bad_op", label, "unknown instance label '%s'" % label)
    return state[label]


def dispatch(module, op, state):
    kind = op.get("op")
    if kind == "call_function":
        target = resolve(module, op["name"])
        return settle(target(*op["args"], **op["kwargs"]))
    if kind == "instantiate":
        cls = resolve(module, op["class_name"])
        obj = cls(*op["args"], **op["kwargs"])
        state[op["label"]] = obj
        return obj
    if kind == "get_attribute":
        obj = instance(state, op["label"])
        if not hasattr(obj, op["name"]):
            raise OpError("not_defined", op["name"], "attribute '%s' is not defined" % op["name"])
        return getattr(obj, op["name"])
    if kind == "get_property":
        obj = instance(state, op["label"])
        attr = inspect.getattr_static(type(obj), op["name"], None)
        if not isinstance(attr, (property, functools.cached_property)):
            raise OpError("not_property", op["name"], "'%s' is not a property" % op["name"])
        return getattr(obj, op["name"])
    if kind == "call_method":
        obj = instance(state, op["label"])
        method = getattr(obj, op["name"], None)
        if method is None or not callable(method):
            raise OpError("not_defined", op["name"], "method '%s' is not defined" % op["name"])
        result = settle(method(*op["args"], **op["kwargs"]))
        if op.get("save_as"):
            state[op["save_as"]] = result
        return result
    if kind == "to_string":
        return str(instance(state, op["label"]))
    if kind == "evaluate":
        cls = resolve(module, op["class_name"])
        namespace = {"__builtins__": SAFE_BUILTINS, op["class_name"]: cls}
        exec(op["setup"], namespace)
        return settle(eval(op["expression"], namespace))
    raise OpError("bad_op", str(kind), "unknown op '%s'" % kind)


def run_op(module, op, state, captured):
    try:
        with contextlib.redirect_stdout(captured):
            value = dispatch(module, op, state)
            encoded = encode(value)
        return {"ok": True, "value": encoded}
    except OpError as err:
        return {"ok": False, "error": err.payload}
    except BaseException as exc:
        return {"ok": False, "error": describe(exc)}


def load(request, captured):
    name = request["module_name"]
    spec = importlib.util.spec_from_file_location(name, request["module_path"])
    module = importlib.util.module_from_spec(spec)
    sys.modules[name] = module
    with contextlib.redirect_stdout(captured):
        spec.loader.exec_module(module)
    return module


def make_reporter(sentinel):
    out = sys.__stdout__
    dumps = json.dumps

    def report(payload):
        out.write("\n" + sentinel + "\n" + dumps(payload) + "\n")
        out.flush()

    return report


def main():
    request = json.loads(sys.stdin.read())
    report = make_reporter(request.pop("sentinel"))
    sys.stdin = io.StringIO("")
    captured = io.StringIO()
    outcome = {"load_error": None, "output": "", "results": []}
    module = None
    try:
        module = load(request, captured)
    except BaseException as exc:
        outcome["load_error"] = describe(exc)
    if module is not None:
        state = {}
        for op in request["ops"]:
            outcome["results"].append(run_op(module, op, state, captured))
    outcome["output"] = captured.getvalue()[-OUTPUT_LIMIT:]
    report(outcome)


main()
"#;

#[derive(Debug, Serialize)]
pub struct LoaderRequest<'a> {
    pub sentinel: &'a str,
    pub module_name: &'a str,
    pub module_path: &'a str,
    pub ops: &'a [LoaderOp],
}

#[derive(Debug, Deserialize)]
struct HarnessError {
    kind: String,
    name: Option<String>,
    #[serde(rename = "type")]
    type_name: Option<String>,
    message: String,
}

impl HarnessError {
    fn into_loader_error(self) -> LoaderError {
        match self.kind.as_str() {
            "not_defined" => LoaderError::TargetNotDefined(self.name.unwrap_or(self.message)),
            "not_property" => LoaderError::InvocationFailed {
                kind: "AttributeError".to_string(),
                message: self.message,
            },
            "raised" => LoaderError::InvocationFailed {
                kind: self.type_name.unwrap_or_else(|| "Exception".to_string()),
                message: self.message,
            },
            _ => LoaderError::Protocol(self.message),
        }
    }
}

#[derive(Debug, Deserialize)]
struct OpResult {
    ok: bool,
    #[serde(default)]
    value: Option<PyValue>,
    #[serde(default)]
    error: Option<HarnessError>,
}

#[derive(Debug, Deserialize)]
struct HarnessReport {
    load_error: Option<HarnessError>,
    #[serde(default)]
    output: String,
    #[serde(default)]
    results: Vec<OpResult>,
}

/// Turn the harness's stdout into a report
///
/// `stderr` and `exit_code` explain a missing trailer (the interpreter died
/// before reporting). A trailer followed by an unclean exit is rejected.
pub fn parse_report(
    stdout: &str,
    stderr: &str,
    exit_code: Option<i32>,
    sentinel: &str,
    expected_ops: usize,
) -> Result<InvocationReport, LoaderError> {
    let trailer = match split_trailer(stdout, sentinel) {
        Ok((_, trailer)) => trailer,
        Err(TrailerError::Missing) => {
            let stderr = stderr.trim();
            return Err(if stderr.is_empty() {
                LoaderError::Protocol(format!(
                    "loader exited with {:?} without a report",
                    exit_code
                ))
            } else {
                LoaderError::LoadFailed(tail_chars(stderr, 1500))
            });
        }
        Err(e) => return Err(LoaderError::Protocol(format!("untrusted report: {}", e))),
    };
    if exit_code != Some(0) {
        return Err(LoaderError::Protocol(format!(
            "untrusted report: {}",
            TrailerError::UncleanExit(exit_code)
        )));
    }

    let line = trailer.lines().next().unwrap_or_default();
    let report: HarnessReport = serde_json::from_str(line)
        .map_err(|e| LoaderError::Protocol(format!("malformed report: {}", e)))?;

    if let Some(error) = report.load_error {
        let detail = match error.type_name {
            Some(type_name) => format!("{}: {}", type_name, error.message),
            None => error.message,
        };
        return Err(LoaderError::LoadFailed(detail));
    }
    if report.results.len() != expected_ops {
        return Err(LoaderError::Protocol(format!(
            "expected {} results, got {}",
            expected_ops,
            report.results.len()
        )));
    }

    let results = report
        .results
        .into_iter()
        .map(|result| match (result.ok, result.value, result.error) {
            (true, Some(value), _) => Ok(value),
            (false, _, Some(error)) => Err(error.into_loader_error()),
            _ => Err(LoaderError::Protocol("inconsistent op result".to_string())),
        })
        .collect();

    Ok(InvocationReport {
        results,
        output: report.output,
    })
}
