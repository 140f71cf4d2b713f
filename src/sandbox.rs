//! Embedded Python execution with scoped stdout capture

use crate::convert::{json_to_py, py_to_json};
use crate::types::{Arguments, EvalOutput, ExecutionResult};
use crate::validate::{ExecutableProgram, ENTRY_POINT};
use anyhow::anyhow;
use rustpython_vm::builtins::{PyBaseExceptionRef, PyCode, PyList, PyStr};
use rustpython_vm::compiler::Mode;
use rustpython_vm::function::{FuncArgs, KwArgs};
use rustpython_vm::{AsObject, Interpreter, PyObjectRef, PyRef, PyResult, Settings, VirtualMachine};
use std::path::Path;

const CAPTURE_CLASS: &str = "_StdoutCapture";

/// Replacement for `sys.stdout` while the entry point runs. Kept in Python
/// so `print` sees an ordinary file-like object. `__slots__` keeps submitted
/// code from rebinding the methods through `sys.stdout`; such an attempt
/// raises inside the guarded call instead.
const CAPTURE_SETUP: &str = r#"
class _StdoutCapture:
    __slots__ = ("_chunks",)

    def __init__(self):
        self._chunks = []

    def write(self, text):
        text = str(text)
        self._chunks.append(text)
        return len(text)

    def flush(self):
        pass

    def getvalue(self):
        return "".join(self._chunks)
"#;

/// Executes validated programs inside an embedded interpreter.
///
/// One sandbox serves many sequential requests. The interpreter handle is
/// not `Send`, so a sandbox stays on the thread that created it.
pub struct PythonSandbox {
    interpreter: Interpreter,
    capture_code: PyRef<PyCode>,
}

impl PythonSandbox {
    /// Create a sandbox with the frozen standard library available to
    /// submitted code
    pub fn new() -> crate::Result<Self> {
        let interpreter = Interpreter::with_init(Settings::default(), |vm| {
            vm.add_native_modules(rustpython_stdlib::get_module_inits());
            vm.add_frozen(rustpython_pylib::FROZEN_STDLIB);
        });
        let capture_code = interpreter.enter(|vm| {
            vm.compile(CAPTURE_SETUP, Mode::Exec, "<stdout-capture>".to_owned())
                .map_err(|err| anyhow!("stdout capture setup does not compile: {err}"))
        })?;
        Ok(Self {
            interpreter,
            capture_code,
        })
    }

    /// Idempotently register `dir` at the front of the interpreter's module
    /// search path. Returns true when this call inserted it.
    pub fn ensure_search_path(&self, dir: &Path) -> crate::Result<bool> {
        let entry = dir.to_string_lossy().into_owned();
        self.interpreter.enter(|vm| {
            let path = vm
                .sys_module
                .as_object()
                .get_attr("path", vm)
                .map_err(|exc| fatal(vm, exc).context("sys.path unavailable"))?;
            let path = path
                .downcast::<PyList>()
                .map_err(|_| anyhow!("sys.path is not a list"))?;
            let present = path
                .borrow_vec()
                .iter()
                .any(|item| item.payload::<PyStr>().is_some_and(|s| s.as_str() == entry));
            if !present {
                path.borrow_vec_mut()
                    .insert(0, vm.ctx.new_str(entry.as_str()).into());
                tracing::debug!(dir = %entry, "registered module search path");
            }
            Ok(!present)
        })
    }

    /// Compile the program, bind the entry point in a fresh scope, and call
    /// it with the request arguments, capturing stdout for the duration of
    /// the call.
    ///
    /// A raised exception is an expected outcome and lands in the returned
    /// [`ExecutionResult`]; `Err` is reserved for interpreter-level faults.
    pub fn execute(
        &self,
        program: &ExecutableProgram,
        arguments: &Arguments,
    ) -> crate::Result<ExecutionResult> {
        self.interpreter.enter(|vm| {
            let code = vm
                .compile(program.source(), Mode::Exec, "<submission>".to_owned())
                .map_err(|err| anyhow!("validated program does not compile: {err}"))?;

            let scope = vm.new_scope_with_builtins();
            vm.run_code_obj(code, scope.clone())
                .map_err(|exc| fatal(vm, exc).context("binding the entry point"))?;

            let entry = scope
                .globals
                .get_item(ENTRY_POINT, vm)
                .map_err(|exc| fatal(vm, exc).context("entry point not bound after execution"))?;

            let args = build_args(vm, arguments).map_err(|exc| fatal(vm, exc))?;
            let capture = self.new_capture(vm)?;
            let redirect =
                RedirectGuard::install(vm, capture.clone()).map_err(|exc| fatal(vm, exc))?;
            let outcome = entry.call(args, vm);
            drop(redirect);

            let captured = read_capture(vm, &capture).map_err(|exc| fatal(vm, exc))?;
            let stdout = split_captured_lines(&captured);
            tracing::debug!(lines = stdout.len(), "captured stdout");

            match outcome {
                Ok(value) => {
                    let eval_output = if vm.is_none(&value) {
                        EvalOutput::Absent
                    } else {
                        match py_to_json(vm, &value) {
                            Ok(json) => EvalOutput::Value(json),
                            Err(refused) => {
                                tracing::debug!(
                                    value_type = %refused.type_name,
                                    "return value is not transport-encodable"
                                );
                                EvalOutput::Unserializable
                            }
                        }
                    };
                    Ok(ExecutionResult::returned(eval_output, stdout))
                }
                Err(exc) => {
                    let message = exception_message(vm, &exc);
                    let mut trace = String::new();
                    if vm.write_exception(&mut trace, &exc).is_ok() {
                        tracing::debug!(%message, trace = %trace.trim_end(), "entry point raised");
                    }
                    Ok(ExecutionResult::raised(stdout, message))
                }
            }
        })
    }

    /// Instantiate a fresh capture object in a private scope
    fn new_capture(&self, vm: &VirtualMachine) -> crate::Result<PyObjectRef> {
        let scope = vm.new_scope_with_builtins();
        vm.run_code_obj(self.capture_code.clone(), scope.clone())
            .map_err(|exc| fatal(vm, exc).context("stdout capture setup failed"))?;
        let class = scope
            .globals
            .get_item(CAPTURE_CLASS, vm)
            .map_err(|exc| fatal(vm, exc))?;
        class.call((), vm).map_err(|exc| fatal(vm, exc))
    }
}

fn build_args(vm: &VirtualMachine, arguments: &Arguments) -> PyResult<FuncArgs> {
    let mut positional = Vec::with_capacity(arguments.args.len());
    for value in &arguments.args {
        positional.push(json_to_py(vm, value)?);
    }
    let keywords = arguments
        .kwargs
        .iter()
        .map(|(key, value)| Ok((key.clone(), json_to_py(vm, value)?)))
        .collect::<PyResult<KwArgs>>()?;
    Ok(FuncArgs::new(positional, keywords))
}

fn read_capture(vm: &VirtualMachine, capture: &PyObjectRef) -> PyResult<String> {
    let getvalue = capture.get_attr("getvalue", vm)?;
    let value = getvalue.call((), vm)?;
    let text = value.str(vm)?;
    Ok(text.as_str().to_owned())
}

/// Split captured text on every boundary `str.splitlines` recognizes, with
/// no trailing empty entry
fn split_captured_lines(text: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                lines.push(std::mem::take(&mut current));
            }
            '\n' | '\x0b' | '\x0c' | '\x1c' | '\x1d' | '\x1e' | '\u{85}' | '\u{2028}'
            | '\u{2029}' => lines.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Swaps `sys.stdout` for the capture object and restores the original on
/// drop, on every exit path
struct RedirectGuard<'vm> {
    vm: &'vm VirtualMachine,
    saved: Option<PyObjectRef>,
}

impl<'vm> RedirectGuard<'vm> {
    fn install(vm: &'vm VirtualMachine, capture: PyObjectRef) -> PyResult<Self> {
        let saved = vm.sys_module.as_object().get_attr("stdout", vm).ok();
        vm.sys_module.as_object().set_attr("stdout", capture, vm)?;
        Ok(Self { vm, saved })
    }
}

impl Drop for RedirectGuard<'_> {
    fn drop(&mut self) {
        let saved = self.saved.take().unwrap_or_else(|| self.vm.ctx.none());
        let _ = self
            .vm
            .sys_module
            .as_object()
            .set_attr("stdout", saved, self.vm);
    }
}

/// The caller-facing message: the exception's first argument, else its type
/// name. The formatted traceback never leaves the logs.
fn exception_message(vm: &VirtualMachine, exc: &PyBaseExceptionRef) -> String {
    let args = exc.args();
    if let Some(first) = args.as_slice().first() {
        if let Ok(text) = first.str(vm) {
            return text.as_str().to_owned();
        }
    }
    exception_type_name(vm, exc)
}

fn exception_type_name(vm: &VirtualMachine, exc: &PyBaseExceptionRef) -> String {
    exc.class()
        .as_object()
        .get_attr("__name__", vm)
        .ok()
        .and_then(|name| name.str(vm).ok())
        .map(|name| name.as_str().to_owned())
        .unwrap_or_else(|| "Exception".to_owned())
}

/// Render an interpreter-level failure for the fault channel
fn fatal(vm: &VirtualMachine, exc: PyBaseExceptionRef) -> anyhow::Error {
    let mut rendered = String::new();
    if vm.write_exception(&mut rendered, &exc).is_err() || rendered.is_empty() {
        rendered = exception_type_name(vm, &exc);
    }
    anyhow!("{}", rendered.trim_end())
}
