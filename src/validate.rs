//! Submission validation and dependency annotation extraction

use rustpython_parser::ast::{self, Constant, Expr, Ranged, Stmt};
use rustpython_parser::{parse, Mode};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use thiserror::Error;

/// Required name of the single submitted function
pub const ENTRY_POINT: &str = "my_function";

/// Recognized dependency-annotation decorator name
pub const REQUIREMENTS_DECORATOR: &str = "requirements";

const SOURCE_NAME: &str = "<submission>";

/// Why a submission was rejected before execution
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidateError {
    /// The source text does not parse
    #[error("invalid syntax")]
    Syntax,

    /// The source parses but violates the structural contract
    #[error("{0}")]
    Contract(String),
}

fn contract(reason: impl Into<String>) -> ValidateError {
    ValidateError::Contract(reason.into())
}

fn non_string_entry() -> ValidateError {
    contract(format!(
        "@{REQUIREMENTS_DECORATOR} keys and values must be string literals"
    ))
}

/// Declared third-party packages, in source order with the last occurrence
/// of a repeated name winning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyManifest {
    entries: Vec<(String, Option<String>)>,
}

impl DependencyManifest {
    /// Package names with their optional pinned versions
    pub fn entries(&self) -> &[(String, Option<String>)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// One installer specifier per entry: `name` or `name==version`
    pub fn specifiers(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|(name, version)| match version {
                Some(version) => format!("{name}=={version}"),
                None => name.clone(),
            })
            .collect()
    }
}

/// A submission that passed validation, with its annotation still in place
#[derive(Debug, Clone)]
pub struct ParsedProgram {
    source: String,
    manifest: Option<DependencyManifest>,
    annotation_span: Option<Range<usize>>,
}

impl ParsedProgram {
    /// Source text exactly as submitted
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Declared dependencies, if the submission carried an annotation
    pub fn manifest(&self) -> Option<&DependencyManifest> {
        self.manifest.as_ref()
    }

    /// Remove the dependency annotation, leaving a program the interpreter
    /// can run without the decorator name being bound
    pub fn strip_annotation(self) -> ExecutableProgram {
        let ParsedProgram {
            source,
            annotation_span,
            ..
        } = self;
        let source = match annotation_span {
            Some(span) => format!("{}{}", &source[..span.start], &source[span.end..]),
            None => source,
        };
        ExecutableProgram { source }
    }
}

/// A validated program with its annotation removed, ready for the sandbox
#[derive(Debug, Clone)]
pub struct ExecutableProgram {
    source: String,
}

impl ExecutableProgram {
    pub fn source(&self) -> &str {
        &self.source
    }
}

/// Parse the submission and enforce the structural contract: exactly one
/// top-level statement, a plain function named after the entry point, with
/// at most one decorator which must be a dependency annotation.
pub fn validate(source: &str) -> Result<ParsedProgram, ValidateError> {
    let module = match parse(source, Mode::Module, SOURCE_NAME) {
        Ok(ast::Mod::Module(module)) => module,
        Ok(_) => return Err(ValidateError::Syntax),
        Err(err) => {
            tracing::debug!(error = %err, "submission failed to parse");
            return Err(ValidateError::Syntax);
        }
    };

    let stmt = match module.body.as_slice() {
        [] => return Err(contract("empty code")),
        [stmt] => stmt,
        _ => return Err(contract("only one top-level function definition is allowed")),
    };

    let def = match stmt {
        Stmt::FunctionDef(def) => def,
        Stmt::AsyncFunctionDef(_) => {
            return Err(contract("async functions are not allowed; define a plain function"))
        }
        _ => return Err(contract("the only allowed top-level statement is a function definition")),
    };

    if def.name.as_str() != ENTRY_POINT {
        return Err(contract(format!(
            "the function must be named \"{ENTRY_POINT}\""
        )));
    }

    let (manifest, annotation_span) = match def.decorator_list.as_slice() {
        [] => (None, None),
        [decorator] => (
            Some(extract_manifest(decorator)?),
            Some(annotation_span(source, decorator)),
        ),
        _ => return Err(contract("at most one decorator is allowed on the entry point")),
    };

    Ok(ParsedProgram {
        source: source.to_owned(),
        manifest,
        annotation_span,
    })
}

/// Read the package mapping out of a `@requirements({...})` decorator
fn extract_manifest(decorator: &Expr) -> Result<DependencyManifest, ValidateError> {
    let not_requirements = || {
        contract(format!(
            "the only allowed decorator is @{REQUIREMENTS_DECORATOR}({{str: str}})"
        ))
    };

    let call = match decorator {
        Expr::Call(call) => call,
        _ => return Err(not_requirements()),
    };

    let named_requirements = matches!(
        call.func.as_ref(),
        Expr::Name(name) if name.id.as_str() == REQUIREMENTS_DECORATOR
    );
    if !named_requirements {
        return Err(not_requirements());
    }

    let dict = match (call.args.as_slice(), call.keywords.as_slice()) {
        ([Expr::Dict(dict)], []) => dict,
        _ => {
            return Err(contract(format!(
                "@{REQUIREMENTS_DECORATOR} takes a single dict literal"
            )))
        }
    };

    if dict.keys.is_empty() {
        return Err(contract(format!(
            "the @{REQUIREMENTS_DECORATOR} mapping must not be empty"
        )));
    }

    let mut entries: Vec<(String, Option<String>)> = Vec::with_capacity(dict.keys.len());
    for (key, value) in dict.keys.iter().zip(&dict.values) {
        let name = match key {
            Some(Expr::Constant(ast::ExprConstant {
                value: Constant::Str(name),
                ..
            })) => name.clone(),
            _ => return Err(non_string_entry()),
        };
        let version = match value {
            Expr::Constant(ast::ExprConstant {
                value: Constant::Str(version),
                ..
            }) => {
                if version.is_empty() {
                    None
                } else {
                    Some(version.clone())
                }
            }
            _ => return Err(non_string_entry()),
        };
        // later duplicate replaces the earlier one
        entries.retain(|(existing, _)| existing != &name);
        entries.push((name, version));
    }

    Ok(DependencyManifest { entries })
}

/// Byte span of the whole annotation line, from its `@` marker through the
/// trailing newline
fn annotation_span(source: &str, decorator: &Expr) -> Range<usize> {
    let expr_start = usize::from(decorator.start());
    let expr_end = usize::from(decorator.end());
    let start = source[..expr_start].rfind('@').unwrap_or(expr_start);
    let end = source[expr_end..]
        .find('\n')
        .map(|offset| expr_end + offset + 1)
        .unwrap_or(source.len());
    start..end
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reason(source: &str) -> String {
        match validate(source) {
            Err(ValidateError::Contract(reason)) => reason,
            other => panic!("expected a contract violation, got {other:?}"),
        }
    }

    #[test]
    fn test_plain_function_passes() {
        let parsed = validate("def my_function():\n    return 3\n").expect("valid submission");
        assert!(parsed.manifest().is_none());
        assert_eq!(parsed.source(), "def my_function():\n    return 3\n");
    }

    #[test]
    fn test_unparseable_source_is_a_syntax_error() {
        assert!(matches!(
            validate("def my_function(:\n    pass"),
            Err(ValidateError::Syntax)
        ));
    }

    #[test]
    fn test_empty_source_is_rejected() {
        assert_eq!(reason(""), "empty code");
    }

    #[test]
    fn test_two_functions_are_rejected() {
        let source = "def my_function():\n    pass\n\ndef other():\n    pass\n";
        assert!(reason(source).contains("only one"));
    }

    #[test]
    fn test_non_function_statement_is_rejected() {
        assert!(reason("x = 1\n").contains("function definition"));
    }

    #[test]
    fn test_async_function_is_rejected() {
        assert!(reason("async def my_function():\n    pass\n").contains("async"));
    }

    #[test]
    fn test_wrong_name_is_rejected() {
        assert!(reason("def other():\n    pass\n").contains("my_function"));
    }

    #[test]
    fn test_manifest_is_extracted() {
        let source = "@requirements({\"requests\": \"2.31.0\", \"flask\": \"\"})\ndef my_function():\n    pass\n";
        let parsed = validate(source).expect("valid submission");
        let manifest = parsed.manifest().expect("manifest present");
        assert_eq!(
            manifest.entries(),
            &[
                ("requests".to_string(), Some("2.31.0".to_string())),
                ("flask".to_string(), None),
            ]
        );
        assert_eq!(manifest.specifiers(), vec!["requests==2.31.0", "flask"]);
    }

    #[test]
    fn test_repeated_package_keeps_last_version() {
        let source = "@requirements({\"requests\": \"2.30.0\", \"requests\": \"2.31.0\"})\ndef my_function():\n    pass\n";
        let manifest = validate(source)
            .expect("valid submission")
            .manifest()
            .cloned()
            .expect("manifest present");
        assert_eq!(manifest.len(), 1);
        assert_eq!(manifest.specifiers(), vec!["requests==2.31.0"]);
    }

    #[test]
    fn test_unknown_decorator_is_rejected() {
        assert!(reason("@lru_cache({\"a\": \"1\"})\ndef my_function():\n    pass\n")
            .contains(REQUIREMENTS_DECORATOR));
        assert!(reason("@staticmethod\ndef my_function():\n    pass\n")
            .contains(REQUIREMENTS_DECORATOR));
    }

    #[test]
    fn test_second_decorator_is_rejected() {
        let source =
            "@requirements({\"a\": \"1\"})\n@requirements({\"b\": \"2\"})\ndef my_function():\n    pass\n";
        assert!(reason(source).contains("at most one decorator"));
    }

    #[test]
    fn test_empty_mapping_is_rejected() {
        assert!(reason("@requirements({})\ndef my_function():\n    pass\n")
            .contains("must not be empty"));
    }

    #[test]
    fn test_non_string_values_are_rejected() {
        assert!(reason("@requirements({\"requests\": 2})\ndef my_function():\n    pass\n")
            .contains("string literals"));
        assert!(reason("@requirements({1: \"2\"})\ndef my_function():\n    pass\n")
            .contains("string literals"));
    }

    #[test]
    fn test_non_dict_argument_is_rejected() {
        assert!(reason("@requirements([\"requests\"])\ndef my_function():\n    pass\n")
            .contains("dict literal"));
        assert!(reason("@requirements()\ndef my_function():\n    pass\n")
            .contains("dict literal"));
    }

    #[test]
    fn test_strip_removes_exactly_the_annotation_line() {
        let source = "@requirements({\"requests\": \"2.31.0\"})\ndef my_function():\n    return 1\n";
        let program = validate(source).expect("valid submission").strip_annotation();
        assert_eq!(program.source(), "def my_function():\n    return 1\n");
    }

    #[test]
    fn test_strip_without_annotation_is_identity() {
        let source = "def my_function():\n    return 1\n";
        let program = validate(source).expect("valid submission").strip_annotation();
        assert_eq!(program.source(), source);
    }

    #[test]
    fn test_stripped_source_still_parses() {
        let source = "@requirements({\"requests\": \"\"})\ndef my_function(a, b=1):\n    return a + b\n";
        let program = validate(source).expect("valid submission").strip_annotation();
        validate(program.source()).expect("stripped program still satisfies the contract");
    }
}
