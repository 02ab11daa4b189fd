//! Tools: the abstraction over agent capabilities.
//!
//! Tools come in three shapes: typed closures ([`FunctionTool`]),
//! declarative objects implementing [`Tool`], and built-in names resolved
//! against a [`ToolCatalog`]. [`ToolSource`] is the closed set of those
//! shapes; normalizing one yields a [`ToolDef`], the only form the registry,
//! the providers and the hook pipeline ever see.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result, ToolError};
use crate::message::Message;
use crate::provider::ToolDefinition;
use crate::schema::{self, ParamSpec};

/// A request to execute a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID (matches the provider's tool call id)
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Decoded arguments
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: match arguments {
                Value::Object(map) => map,
                _ => Map::new(),
            },
        }
    }
}

/// What a tool produced: text or a JSON value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolOutput {
    Text(String),
    Json(Value),
}

impl ToolOutput {
    /// The output as it is sent back to the model.
    pub fn as_text(&self) -> String {
        match self {
            ToolOutput::Text(text) => text.clone(),
            ToolOutput::Json(Value::String(text)) => text.clone(),
            ToolOutput::Json(value) => value.to_string(),
        }
    }
}

impl std::fmt::Display for ToolOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_text())
    }
}

impl From<String> for ToolOutput {
    fn from(text: String) -> Self {
        ToolOutput::Text(text)
    }
}

impl From<&str> for ToolOutput {
    fn from(text: &str) -> Self {
        ToolOutput::Text(text.to_string())
    }
}

impl From<Value> for ToolOutput {
    fn from(value: Value) -> Self {
        ToolOutput::Json(value)
    }
}

/// The result of running one tool call through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// The call ID this result is for
    pub call_id: String,

    /// The tool that was called
    pub name: String,

    pub output: ToolOutput,

    /// The handler failed, or the tool could not be resolved
    #[serde(default)]
    pub is_error: bool,

    /// A before-hook rejected the call
    #[serde(default)]
    pub denied: bool,
}

impl ToolResult {
    pub fn success(call: &ToolCall, output: impl Into<ToolOutput>) -> Self {
        Self {
            call_id: call.id.clone(),
            name: call.name.clone(),
            output: output.into(),
            is_error: false,
            denied: false,
        }
    }

    pub fn error(call: &ToolCall, message: impl std::fmt::Display) -> Self {
        Self {
            is_error: true,
            ..Self::success(call, format!("Error: {message}"))
        }
    }

    pub fn denied(call: &ToolCall, reason: impl Into<String>) -> Self {
        Self {
            denied: true,
            ..Self::success(call, reason.into())
        }
    }

    /// The `tool` role message carrying this result.
    pub fn to_message(&self) -> Message {
        Message::tool_result(&self.call_id, self.output.as_text(), self.is_error)
    }
}

/// An invocable tool body.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, arguments: Map<String, Value>) -> std::result::Result<ToolOutput, ToolError>;
}

type BoxedFn =
    dyn Fn(Map<String, Value>) -> BoxFuture<'static, std::result::Result<ToolOutput, ToolError>> + Send + Sync;

/// A handler backed by a boxed closure.
pub struct FnHandler(Box<BoxedFn>);

impl FnHandler {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Map<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<ToolOutput, ToolError>> + Send + 'static,
    {
        Self(Box::new(move |arguments| Box::pin(f(arguments))))
    }
}

#[async_trait]
impl ToolHandler for FnHandler {
    async fn call(&self, arguments: Map<String, Value>) -> std::result::Result<ToolOutput, ToolError> {
        (self.0)(arguments).await
    }
}

/// A declarative tool: parameter metadata plus an `execute` operation.
///
/// Built-in tools implement this trait; so can user types.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "bash", "read").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// The parameters this tool accepts.
    fn parameters(&self) -> Vec<ParamSpec>;

    /// Execute the tool with validated arguments.
    async fn execute(&self, arguments: Map<String, Value>) -> std::result::Result<ToolOutput, ToolError>;
}

struct DeclarativeHandler(Arc<dyn Tool>);

#[async_trait]
impl ToolHandler for DeclarativeHandler {
    async fn call(&self, arguments: Map<String, Value>) -> std::result::Result<ToolOutput, ToolError> {
        self.0.execute(arguments).await
    }
}

/// A tool built from a typed closure; the schema is inferred from `A`.
pub struct FunctionTool {
    name: String,
    description: String,
    parameters: Value,
    handler: Arc<dyn ToolHandler>,
}

impl FunctionTool {
    /// Wrap an async closure taking a deserializable arguments struct.
    pub fn new<A, F, Fut, O, E>(name: impl Into<String>, description: impl Into<String>, f: F) -> Self
    where
        A: DeserializeOwned + JsonSchema + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<O, E>> + Send + 'static,
        O: Into<ToolOutput> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let name = name.into();
        let tool_name = name.clone();
        let handler = FnHandler(Box::new(
            move |arguments| -> BoxFuture<'static, std::result::Result<ToolOutput, ToolError>> {
                match serde_json::from_value::<A>(Value::Object(arguments)) {
                    Ok(args) => {
                        let fut = f(args);
                        let tool_name = tool_name.clone();
                        Box::pin(async move {
                            fut.await
                                .map(Into::into)
                                .map_err(|e| ToolError::failed(tool_name, e))
                        })
                    }
                    Err(e) => Box::pin(futures::future::ready(Err(
                        ToolError::InvalidArguments(e.to_string()),
                    ))),
                }
            },
        ));

        Self {
            name,
            description: description.into(),
            parameters: schema::schema_for::<A>(),
            handler: Arc::new(handler),
        }
    }

    /// Wrap a synchronous closure.
    pub fn sync<A, F, O, E>(name: impl Into<String>, description: impl Into<String>, f: F) -> Self
    where
        A: DeserializeOwned + JsonSchema + Send + 'static,
        F: Fn(A) -> std::result::Result<O, E> + Send + Sync + 'static,
        O: Into<ToolOutput> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        Self::new(name, description, move |args: A| futures::future::ready(f(args)))
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A normalized, invocable tool.
#[derive(Clone)]
pub struct ToolDef {
    pub name: String,
    pub description: String,
    /// JSON Schema of the arguments object.
    pub parameters: Value,
    pub handler: Arc<dyn ToolHandler>,
}

impl std::fmt::Debug for ToolDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDef")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("parameters", &self.parameters)
            .finish_non_exhaustive()
    }
}

impl ToolDef {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        handler: impl ToolHandler + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: schema::normalize(parameters),
            handler: Arc::new(handler),
        }
    }

    /// Validate arguments against the schema, then call the handler.
    pub async fn invoke(&self, arguments: Map<String, Value>) -> std::result::Result<ToolOutput, ToolError> {
        let arguments = schema::validate_arguments(&self.parameters, arguments)
            .map_err(ToolError::InvalidArguments)?;
        self.handler.call(arguments).await
    }

    /// Convert into the declaration sent to the model.
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
        }
    }
}

/// The fixed set of tools addressable by name.
pub trait ToolCatalog: Send + Sync {
    /// Every name the catalog knows, in catalog order.
    fn names(&self) -> Vec<String>;

    fn lookup(&self, name: &str) -> Option<Arc<dyn Tool>>;
}

/// Every shape a tool can be registered from.
pub enum ToolSource {
    Function(FunctionTool),
    Declarative(Arc<dyn Tool>),
    Builtin(String),
    Def(ToolDef),
}

impl ToolSource {
    pub fn declarative(tool: impl Tool + 'static) -> Self {
        ToolSource::Declarative(Arc::new(tool))
    }

    /// Normalize into a [`ToolDef`]. Built-in names need a catalog.
    pub fn normalize(self, catalog: Option<&dyn ToolCatalog>) -> Result<ToolDef> {
        let def = match self {
            ToolSource::Function(f) => ToolDef {
                name: f.name,
                description: f.description,
                parameters: f.parameters,
                handler: f.handler,
            },
            ToolSource::Declarative(tool) => declarative_def(tool)?,
            ToolSource::Builtin(name) => {
                let tool = catalog.and_then(|c| c.lookup(&name)).ok_or_else(|| {
                    Error::UnknownTool {
                        name: name.clone(),
                        available: catalog.map(|c| c.names()).unwrap_or_default(),
                    }
                })?;
                declarative_def(tool)?
            }
            ToolSource::Def(def) => def,
        };

        if def.name.trim().is_empty() {
            return Err(Error::Schema {
                tool: def.name,
                reason: "tool name is empty".into(),
            });
        }
        Ok(def)
    }
}

fn declarative_def(tool: Arc<dyn Tool>) -> Result<ToolDef> {
    let parameters = schema::object_schema(tool.name(), &tool.parameters())?;
    Ok(ToolDef {
        name: tool.name().to_string(),
        description: tool.description().to_string(),
        parameters,
        handler: Arc::new(DeclarativeHandler(tool)),
    })
}

impl From<FunctionTool> for ToolSource {
    fn from(tool: FunctionTool) -> Self {
        ToolSource::Function(tool)
    }
}

impl From<ToolDef> for ToolSource {
    fn from(def: ToolDef) -> Self {
        ToolSource::Def(def)
    }
}

impl From<Arc<dyn Tool>> for ToolSource {
    fn from(tool: Arc<dyn Tool>) -> Self {
        ToolSource::Declarative(tool)
    }
}

impl From<&str> for ToolSource {
    fn from(name: &str) -> Self {
        ToolSource::Builtin(name.to_string())
    }
}

impl From<String> for ToolSource {
    fn from(name: String) -> Self {
        ToolSource::Builtin(name)
    }
}

/// The active tool set of one agent.
///
/// Keeps registration order, which is also the order tools are declared to
/// the provider. Registering an existing name replaces the definition in
/// place.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<ToolDef>,
    catalog: Option<Arc<dyn ToolCatalog>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools)
            .field("catalog", &self.catalog.is_some())
            .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry that can resolve built-in names.
    pub fn with_catalog(catalog: Arc<dyn ToolCatalog>) -> Self {
        Self {
            tools: Vec::new(),
            catalog: Some(catalog),
        }
    }

    /// Normalize and register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, source: impl Into<ToolSource>) -> Result<ToolDef> {
        let def = source.into().normalize(self.catalog.as_deref())?;
        self.insert(def.clone());
        Ok(def)
    }

    /// Insert a normalized tool, returning the definition it replaced.
    pub fn insert(&mut self, def: ToolDef) -> Option<ToolDef> {
        match self.tools.iter_mut().find(|t| t.name == def.name) {
            Some(existing) => {
                tracing::debug!(tool = %def.name, "Replacing registered tool");
                Some(std::mem::replace(existing, def))
            }
            None => {
                self.tools.push(def);
                None
            }
        }
    }

    /// Look up a tool by name.
    pub fn resolve(&self, name: &str) -> Result<&ToolDef> {
        self.get(name)
            .ok_or_else(|| Error::ToolNotFound(name.to_string()))
    }

    pub fn get(&self, name: &str) -> Option<&ToolDef> {
        self.tools.iter().find(|t| t.name == name)
    }

    /// Tool declarations in registration order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(ToolDef::definition).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ParamType;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// A simple declarative tool for unit tests.
    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes back the input"
        }
        fn parameters(&self) -> Vec<ParamSpec> {
            vec![
                ParamSpec::required("text", ParamType::String),
                ParamSpec::optional("times", ParamType::Integer).with_default(1),
            ]
        }
        async fn execute(&self, arguments: Map<String, Value>) -> std::result::Result<ToolOutput, ToolError> {
            let text = arguments["text"].as_str().unwrap_or("");
            let times = arguments["times"].as_u64().unwrap_or(1) as usize;
            Ok(text.repeat(times).into())
        }
    }

    struct BrokenTool;

    #[async_trait]
    impl Tool for BrokenTool {
        fn name(&self) -> &str {
            "broken"
        }
        fn description(&self) -> &str {
            "Declares a parameter twice"
        }
        fn parameters(&self) -> Vec<ParamSpec> {
            vec![
                ParamSpec::required("x", ParamType::String),
                ParamSpec::required("x", ParamType::Integer),
            ]
        }
        async fn execute(&self, _: Map<String, Value>) -> std::result::Result<ToolOutput, ToolError> {
            Ok("unreachable".into())
        }
    }

    struct OneToolCatalog;

    impl ToolCatalog for OneToolCatalog {
        fn names(&self) -> Vec<String> {
            vec!["echo".into()]
        }
        fn lookup(&self, name: &str) -> Option<Arc<dyn Tool>> {
            (name == "echo").then(|| Arc::new(EchoTool) as Arc<dyn Tool>)
        }
    }

    #[derive(Deserialize, JsonSchema)]
    struct AddArgs {
        a: i64,
        b: i64,
    }

    fn add_tool() -> FunctionTool {
        FunctionTool::sync("add", "Add two numbers", |args: AddArgs| {
            Ok::<_, String>(json!(args.a + args.b))
        })
    }

    #[test]
    fn register_function_infers_schema() {
        let mut registry = ToolRegistry::new();
        let def = registry.register(add_tool()).unwrap();
        assert_eq!(def.name, "add");
        assert_eq!(def.parameters["properties"]["a"]["type"], "integer");
        let required = def.parameters["required"].as_array().unwrap();
        assert_eq!(required.len(), 2);
    }

    #[tokio::test]
    async fn invoke_function_tool() {
        let def = ToolSource::from(add_tool()).normalize(None).unwrap();
        let output = def.invoke(ToolCall::new("c", "add", json!({"a": 2, "b": 3})).arguments).await.unwrap();
        assert_eq!(output, ToolOutput::Json(json!(5)));

        let err = def.invoke(ToolCall::new("c", "add", json!({"a": "two", "b": 3})).arguments).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn declarative_tool_gets_defaults() {
        let mut registry = ToolRegistry::new();
        registry.register(ToolSource::declarative(EchoTool)).unwrap();
        let def = registry.resolve("echo").unwrap();
        let output = def.invoke(ToolCall::new("c", "echo", json!({"text": "hi"})).arguments).await.unwrap();
        assert_eq!(output.as_text(), "hi");
    }

    #[test]
    fn declarative_tool_with_bad_metadata_fails() {
        let err = ToolRegistry::new()
            .register(ToolSource::declarative(BrokenTool))
            .unwrap_err();
        assert!(matches!(err, Error::Schema { tool, .. } if tool == "broken"));
    }

    #[test]
    fn builtin_names_resolve_through_catalog() {
        let mut registry = ToolRegistry::with_catalog(Arc::new(OneToolCatalog));
        assert_eq!(registry.register("echo").unwrap().name, "echo");

        let err = registry.register("Echo").unwrap_err();
        match err {
            Error::UnknownTool { name, available } => {
                assert_eq!(name, "Echo");
                assert_eq!(available, vec!["echo".to_string()]);
            }
            other => panic!("expected UnknownTool, got {other:?}"),
        }

        assert!(matches!(
            ToolRegistry::new().register("echo"),
            Err(Error::UnknownTool { .. })
        ));
    }

    #[test]
    fn resolve_missing_tool() {
        let registry = ToolRegistry::new();
        assert!(matches!(registry.resolve("nope"), Err(Error::ToolNotFound(n)) if n == "nope"));
    }

    #[tokio::test]
    async fn last_registration_wins() {
        let first_calls = Arc::new(AtomicUsize::new(0));
        let second_calls = Arc::new(AtomicUsize::new(0));

        let counter = |calls: Arc<AtomicUsize>, label: &'static str| {
            ToolDef::new(
                "lookup",
                label,
                json!({"type": "object", "properties": {}}),
                FnHandler::new(move |_| {
                    let calls = calls.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(ToolOutput::from(label))
                    }
                }),
            )
        };

        let mut registry = ToolRegistry::new();
        registry.register(add_tool()).unwrap();
        registry.register(counter(first_calls.clone(), "first")).unwrap();
        registry.register(counter(second_calls.clone(), "second")).unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names(), vec!["add", "lookup"]);

        let def = registry.resolve("lookup").unwrap();
        assert_eq!(def.description, "second");
        let output = def.invoke(Map::new()).await.unwrap();
        assert_eq!(output.as_text(), "second");
        assert_eq!(first_calls.load(Ordering::SeqCst), 0);
        assert_eq!(second_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn definitions_keep_registration_order() {
        let mut registry = ToolRegistry::with_catalog(Arc::new(OneToolCatalog));
        registry.register("echo").unwrap();
        registry.register(add_tool()).unwrap();
        let names: Vec<_> = registry.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["echo", "add"]);
    }

    #[test]
    fn tool_result_constructors() {
        let call = ToolCall::new("call_1", "bash", json!({}));
        let err = ToolResult::error(&call, "boom");
        assert!(err.is_error);
        assert_eq!(err.output.as_text(), "Error: boom");

        let denied = ToolResult::denied(&call, "not allowed");
        assert!(denied.denied && !denied.is_error);
        assert_eq!(denied.to_message().text(), "not allowed");
    }
}
