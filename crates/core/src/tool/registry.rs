use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Value, json};
use tokio::task::AbortHandle;
use tracing::Instrument;
use toolrelay_model::{ModelTool, ToolCallRequest, ToolCallResult};

use crate::tool::object::{ToolObject, ToolObjectImpl};
use crate::tool::{Error, Tool, ToolResult};

/// The set of tools the model can call, keyed by name.
///
/// Tools are registered once when the agent is built. Definitions are
/// reported in registration order.
#[derive(Default)]
pub struct Registry {
    tools: HashMap<String, Arc<dyn ToolObject>>,
    order: Vec<String>,
}

impl Registry {
    /// Registers a tool, replacing any tool with the same name.
    pub fn add_tool<T: Tool>(&mut self, tool: T) {
        let name = tool.name().to_owned();
        if self
            .tools
            .insert(name.clone(), Arc::new(ToolObjectImpl(tool)))
            .is_some()
        {
            warn!("tool `{name}` registered twice, keeping the last one");
        } else {
            self.order.push(name);
        }
    }

    /// Returns `true` if a tool with the given name is registered.
    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Returns the number of registered tools.
    #[inline]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Returns `true` if no tool is registered.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Returns the definitions sent to the model.
    pub fn definitions(&self) -> Vec<ModelTool> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| ModelTool {
                name: tool.name().to_owned(),
                description: tool.description().to_owned(),
                parameters: tool.parameter_schema().clone(),
            })
            .collect()
    }

    /// Runs a tool call and turns its outcome into a result message.
    ///
    /// This never fails: invalid arguments, unknown tools and failing
    /// tools all produce a result whose content describes the error, so
    /// the model can see what went wrong and try again.
    ///
    /// # Cancel safety
    ///
    /// This method is cancel safe. The running tool is aborted when this
    /// operation is cancelled.
    pub async fn dispatch(&self, req: &ToolCallRequest) -> ToolCallResult {
        let span = debug_span!("dispatch", id = %req.id, name = %req.name);
        let content = async {
            match self.run(req).await {
                Ok(value) => {
                    debug!("tool call succeeded");
                    value.to_string()
                }
                Err(err) => {
                    warn!("tool call failed: {err}");
                    json!({ "error": err.to_string() }).to_string()
                }
            }
        }
        .instrument(span)
        .await;
        ToolCallResult {
            id: req.id.clone(),
            name: req.name.clone(),
            content,
        }
    }

    /// Dispatches calls one after another, in order.
    pub async fn dispatch_all(
        &self,
        reqs: &[ToolCallRequest],
    ) -> Vec<ToolCallResult> {
        let mut results = Vec::with_capacity(reqs.len());
        for req in reqs {
            results.push(self.dispatch(req).await);
        }
        results
    }

    async fn run(&self, req: &ToolCallRequest) -> ToolResult<Value> {
        let arguments = parse_arguments(&req.arguments)?;
        let Some(tool) = self.tools.get(&req.name) else {
            let reason = if req.name.is_empty() {
                "tool call has no name".to_owned()
            } else {
                format!("no tool named `{}`", req.name)
            };
            return Err(Error::not_found().with_reason(reason));
        };
        trace!("executing with args: {arguments}");

        let handle = tokio::spawn(Arc::clone(tool).execute(arguments));
        let _guard = AbortOnDrop(handle.abort_handle());
        match handle.await {
            Ok(result) => result,
            Err(err) if err.is_panic() => {
                Err(Error::execution_error().with_reason("tool panicked"))
            }
            Err(err) => Err(Error::execution_error().with_reason(err.to_string())),
        }
    }
}

fn parse_arguments(arguments: &str) -> ToolResult<Value> {
    if arguments.trim().is_empty() {
        return Ok(json!({}));
    }
    match serde_json::from_str(arguments) {
        Ok(value @ Value::Object(_)) => Ok(value),
        Ok(other) => Err(Error::invalid_input()
            .with_reason(format!("arguments must be an object, got {other}"))),
        Err(err) => Err(Error::invalid_input()
            .with_reason(format!("arguments are not valid JSON: {err}"))),
    }
}

struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::future::ready;
    use std::sync::Mutex;

    use serde::{Deserialize, Serialize};
    use serde_json::json;

    use super::*;

    static EMPTY_SCHEMA: &Value = &Value::Null;

    #[derive(Deserialize)]
    struct EchoInput {
        order_id: String,
    }

    #[derive(Serialize)]
    struct EchoOutput {
        order_id: String,
        status: &'static str,
    }

    struct EchoTool;

    impl Tool for EchoTool {
        type Input = EchoInput;
        type Output = EchoOutput;

        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echoes the order id"
        }

        fn parameter_schema(&self) -> &Value {
            EMPTY_SCHEMA
        }

        fn execute(
            &self,
            input: Self::Input,
        ) -> impl Future<Output = ToolResult<Self::Output>> + Send + 'static
        {
            ready(Ok(EchoOutput {
                order_id: input.order_id,
                status: "shipped",
            }))
        }
    }

    struct PanickingTool;

    impl Tool for PanickingTool {
        type Input = Value;
        type Output = Value;

        fn name(&self) -> &str {
            "panic"
        }

        fn description(&self) -> &str {
            "Always panics"
        }

        fn parameter_schema(&self) -> &Value {
            EMPTY_SCHEMA
        }

        fn execute(
            &self,
            input: Self::Input,
        ) -> impl Future<Output = ToolResult<Self::Output>> + Send + 'static
        {
            async move {
                assert!(input.is_null(), "boom");
                Ok(input)
            }
        }
    }

    struct FailingTool;

    impl Tool for FailingTool {
        type Input = Value;
        type Output = Value;

        fn name(&self) -> &str {
            "fail"
        }

        fn description(&self) -> &str {
            "Always fails"
        }

        fn parameter_schema(&self) -> &Value {
            EMPTY_SCHEMA
        }

        fn execute(
            &self,
            _input: Self::Input,
        ) -> impl Future<Output = ToolResult<Self::Output>> + Send + 'static
        {
            ready(Err(Error::execution_error().with_reason("database is down")))
        }
    }

    struct RecordingTool(Arc<Mutex<Vec<String>>>);

    impl Tool for RecordingTool {
        type Input = EchoInput;
        type Output = ();

        fn name(&self) -> &str {
            "record"
        }

        fn description(&self) -> &str {
            "Records the order id"
        }

        fn parameter_schema(&self) -> &Value {
            EMPTY_SCHEMA
        }

        fn execute(
            &self,
            input: Self::Input,
        ) -> impl Future<Output = ToolResult<Self::Output>> + Send + 'static
        {
            let log = Arc::clone(&self.0);
            async move {
                tokio::task::yield_now().await;
                log.lock().unwrap().push(input.order_id);
                Ok(())
            }
        }
    }

    fn registry() -> Registry {
        let mut registry = Registry::default();
        registry.add_tool(EchoTool);
        registry.add_tool(PanickingTool);
        registry.add_tool(FailingTool);
        registry
    }

    fn request(name: &str, arguments: &str) -> ToolCallRequest {
        ToolCallRequest {
            id: "call_1".to_owned(),
            name: name.to_owned(),
            arguments: arguments.to_owned(),
        }
    }

    fn content(result: &ToolCallResult) -> Value {
        serde_json::from_str(&result.content).unwrap()
    }

    #[test]
    fn test_definitions() {
        let registry = registry();
        let names = registry
            .definitions()
            .into_iter()
            .map(|d| d.name)
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["echo", "panic", "fail"]);
        assert!(registry.contains("echo"));
        assert_eq!(registry.len(), 3);
    }

    #[tokio::test]
    async fn test_success() {
        let result = registry()
            .dispatch(&request("echo", r#"{"order_id": "ORD-123"}"#))
            .await;
        assert_eq!(result.id, "call_1");
        assert_eq!(result.name, "echo");
        assert_eq!(
            content(&result),
            json!({"order_id": "ORD-123", "status": "shipped"})
        );
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let result = registry().dispatch(&request("missing", "{}")).await;
        assert_eq!(result.id, "call_1");
        assert_eq!(result.name, "missing");
        assert_eq!(
            content(&result),
            json!({"error": "Not found: no tool named `missing`"})
        );

        let result = registry().dispatch(&request("", "{}")).await;
        assert_eq!(
            content(&result),
            json!({"error": "Not found: tool call has no name"})
        );
    }

    #[tokio::test]
    async fn test_bad_arguments() {
        let registry = registry();

        let result = registry.dispatch(&request("echo", "{\"order_id\"")).await;
        let error = content(&result)["error"].as_str().unwrap().to_owned();
        assert!(error.starts_with("Invalid input: arguments are not valid JSON"));

        let result = registry.dispatch(&request("echo", "[1, 2]")).await;
        let error = content(&result)["error"].as_str().unwrap().to_owned();
        assert!(error.starts_with("Invalid input: arguments must be an object"));

        // Blank arguments are an empty object, which lacks `order_id`.
        let result = registry.dispatch(&request("echo", "  ")).await;
        let error = content(&result)["error"].as_str().unwrap().to_owned();
        assert!(error.starts_with("Invalid input: missing field `order_id`"));
    }

    #[tokio::test]
    async fn test_failing_tools() {
        let registry = registry();

        let result = registry.dispatch(&request("fail", "{}")).await;
        assert_eq!(
            content(&result),
            json!({"error": "Execution error: database is down"})
        );

        let result = registry.dispatch(&request("panic", "{}")).await;
        assert_eq!(
            content(&result),
            json!({"error": "Execution error: tool panicked"})
        );
    }

    #[tokio::test]
    async fn test_dispatch_in_order() {
        let log = Arc::new(Mutex::new(vec![]));
        let mut registry = Registry::default();
        registry.add_tool(RecordingTool(Arc::clone(&log)));

        let reqs = (1..=3)
            .map(|n| ToolCallRequest {
                id: format!("call_{n}"),
                name: "record".to_owned(),
                arguments: format!(r#"{{"order_id": "ORD-{n}"}}"#),
            })
            .collect::<Vec<_>>();
        let results = registry.dispatch_all(&reqs).await;

        let ids = results.iter().map(|r| r.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["call_1", "call_2", "call_3"]);
        assert_eq!(results[0].content, "null");
        assert_eq!(*log.lock().unwrap(), vec!["ORD-1", "ORD-2", "ORD-3"]);
    }
}
