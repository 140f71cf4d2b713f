//! Core types for the request pipeline

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Success status code
pub const STATUS_OK: u16 = 200;

/// Status code for every reported failure
pub const STATUS_CLIENT_ERROR: u16 = 400;

/// Fixed message used when a return value cannot be encoded for transport
pub const RETURN_NOT_SERIALIZABLE: &str = "Function return value is not JSON-serializable.";

/// Request consumed from the invocation transport
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Submitted source text; must define the entry point
    pub code: String,

    /// Positional arguments for the entry point
    #[serde(default)]
    pub args: Vec<Value>,

    /// Keyword arguments for the entry point
    #[serde(default)]
    pub kwargs: Map<String, Value>,
}

impl Request {
    /// Create a request with no arguments
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            args: Vec::new(),
            kwargs: Map::new(),
        }
    }

    /// Append a positional argument
    pub fn with_arg(mut self, value: Value) -> Self {
        self.args.push(value);
        self
    }

    /// Add a keyword argument
    pub fn with_kwarg(mut self, key: impl Into<String>, value: Value) -> Self {
        self.kwargs.insert(key.into(), value);
        self
    }
}

/// Arguments handed to the entry point, detached from the wire form
#[derive(Debug, Clone, Default)]
pub struct Arguments {
    /// Positional values, passed in order
    pub args: Vec<Value>,

    /// Keyword values, passed by name
    pub kwargs: Map<String, Value>,
}

impl Arguments {
    /// No arguments at all
    pub fn none() -> Self {
        Self::default()
    }
}

impl From<&Request> for Arguments {
    fn from(request: &Request) -> Self {
        Self {
            args: request.args.clone(),
            kwargs: request.kwargs.clone(),
        }
    }
}

/// Entry-point return value as seen at the transport boundary
#[derive(Debug, Clone, PartialEq)]
pub enum EvalOutput {
    /// The function returned `None`, or an error preempted any value
    Absent,

    /// A transport-encodable value
    Value(Value),

    /// The function returned a value the wire format cannot carry
    Unserializable,
}

/// What one invocation of the entry point produced
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    /// Return value, always [`EvalOutput::Absent`] when `error` is set
    pub eval_output: EvalOutput,

    /// Captured stdout lines, in emission order
    pub stdout: Vec<String>,

    /// Message of a raised exception, if any
    pub error: Option<String>,
}

impl ExecutionResult {
    /// Result for a call that returned normally
    pub fn returned(eval_output: EvalOutput, stdout: Vec<String>) -> Self {
        Self {
            eval_output,
            stdout,
            error: None,
        }
    }

    /// Result for a call that raised: no value, and the message becomes the
    /// final captured line
    pub fn raised(mut stdout: Vec<String>, message: String) -> Self {
        stdout.push(message.clone());
        Self {
            eval_output: EvalOutput::Absent,
            stdout,
            error: Some(message),
        }
    }

    /// Check if the invocation produced a reportable value or nothing at all
    pub fn success(&self) -> bool {
        self.error.is_none() && !matches!(self.eval_output, EvalOutput::Unserializable)
    }
}

/// Externally visible response, constructed exactly once per request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// 200 on success, 400 on any reported failure
    #[serde(rename = "statusCode")]
    pub status_code: u16,

    /// Entry-point return value, absent on any failure
    pub eval_output: Option<Value>,

    /// Captured stdout lines
    pub stdout: Option<Vec<String>>,

    /// Caller-facing error description
    pub error: Option<String>,
}

impl Response {
    /// Response for a request rejected before execution
    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            status_code: STATUS_CLIENT_ERROR,
            eval_output: None,
            stdout: Some(Vec::new()),
            error: Some(error.into()),
        }
    }

    /// Project an execution result into the wire form, applying the
    /// serialization policy for the return value
    pub fn from_execution(result: ExecutionResult) -> Self {
        let mut error = result.error;
        let eval_output = match result.eval_output {
            EvalOutput::Value(value) => Some(value),
            EvalOutput::Absent => None,
            EvalOutput::Unserializable => {
                error = Some(RETURN_NOT_SERIALIZABLE.to_string());
                None
            }
        };
        let status_code = if error.is_none() {
            STATUS_OK
        } else {
            STATUS_CLIENT_ERROR
        };
        Self {
            status_code,
            eval_output,
            stdout: Some(result.stdout),
            error,
        }
    }

    /// Check for a success status
    pub fn is_success(&self) -> bool {
        self.status_code == STATUS_OK
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_defaults_missing_arguments() {
        let request: Request = serde_json::from_value(json!({"code": "def my_function(): pass"}))
            .expect("code alone is a complete request");
        assert!(request.args.is_empty());
        assert!(request.kwargs.is_empty());
    }

    #[test]
    fn test_response_wire_field_names() {
        let response = Response::from_execution(ExecutionResult::returned(
            EvalOutput::Value(json!(3)),
            vec![],
        ));
        let wire = serde_json::to_value(&response).expect("response serializes");
        assert_eq!(wire["statusCode"], json!(200));
        assert_eq!(wire["eval_output"], json!(3));
        assert_eq!(wire["stdout"], json!([]));
        assert_eq!(wire["error"], json!(null));
    }

    #[test]
    fn test_raised_appends_message_to_stdout() {
        let result = ExecutionResult::raised(vec!["step one".into()], "bad".into());
        assert_eq!(result.stdout, vec!["step one", "bad"]);
        assert_eq!(result.error.as_deref(), Some("bad"));
        assert_eq!(result.eval_output, EvalOutput::Absent);
        assert!(!result.success());
    }

    #[test]
    fn test_unserializable_value_is_discarded_with_fixed_error() {
        let result = ExecutionResult::returned(EvalOutput::Unserializable, vec!["kept".into()]);
        let response = Response::from_execution(result);
        assert_eq!(response.status_code, STATUS_CLIENT_ERROR);
        assert_eq!(response.eval_output, None);
        assert_eq!(response.stdout, Some(vec!["kept".to_string()]));
        assert_eq!(response.error.as_deref(), Some(RETURN_NOT_SERIALIZABLE));
    }

    #[test]
    fn test_rejected_keeps_empty_stdout() {
        let response = Response::rejected("Code Error: invalid syntax");
        assert_eq!(response.status_code, STATUS_CLIENT_ERROR);
        assert_eq!(response.stdout, Some(Vec::new()));
        assert!(!response.is_success());
    }

    #[test]
    fn test_falsy_return_values_survive_projection() {
        let response = Response::from_execution(ExecutionResult::returned(
            EvalOutput::Value(json!(0)),
            vec![],
        ));
        assert_eq!(response.status_code, STATUS_OK);
        assert_eq!(response.eval_output, Some(json!(0)));
    }
}
