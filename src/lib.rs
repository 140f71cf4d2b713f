//! Run one submitted Python function per request.
//!
//! A request carries raw source text that must define a single function
//! named `my_function`, optionally decorated with a dependency annotation.
//! The pipeline validates the source against that structural contract and
//! installs any declared packages into an instance-scoped search path. It
//! then executes the function in an embedded interpreter with stdout
//! captured for the duration of the call. Whatever happens, the caller gets
//! back one structured response with a status code, the return value, the
//! captured output, and at most one error message.
//!
//! ```no_run
//! use pysprinter::{Handler, Request};
//!
//! # fn main() -> pysprinter::Result<()> {
//! let handler = Handler::new()?;
//! let response = handler.handle(&Request::new("def my_function():\n    return 3"))?;
//! assert_eq!(response.status_code, 200);
//! # Ok(())
//! # }
//! ```

mod config;
mod convert;
mod deps;
mod handler;
mod sandbox;
mod types;
mod validate;

pub use config::InstanceConfig;
pub use deps::{DependencyResolver, InstallError};
pub use handler::{Handler, RequestId};
pub use sandbox::PythonSandbox;
pub use types::{
    Arguments, EvalOutput, ExecutionResult, Request, Response, RETURN_NOT_SERIALIZABLE,
    STATUS_CLIENT_ERROR, STATUS_OK,
};
pub use validate::{
    validate, DependencyManifest, ExecutableProgram, ParsedProgram, ValidateError, ENTRY_POINT,
    REQUIREMENTS_DECORATOR,
};

/// Re-export common error types
pub type Result<T> = anyhow::Result<T>;
