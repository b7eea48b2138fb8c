use std::future::ready;

use schemars::{JsonSchema, schema_for};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use toolrelay_core::tool::{Tool, ToolResult};

/// Parameters of [`FindOrderTool`].
#[derive(Deserialize, JsonSchema)]
pub struct FindOrderToolParameters {
    #[schemars(description = "The full name of the customer.")]
    customer_name: String,
}

/// The outcome of an order lookup.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FindOrderOutput {
    /// The order id, `None` if no order was found.
    pub order_id: Option<String>,
    /// Explains why nothing was found.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// A tool that looks up the order of a customer by name.
///
/// This is a simulation: any full name (first and last) is assumed to have
/// an order whose id derives from the name, e.g. `Jane Doe` has
/// `ORD-JAN08`.
pub struct FindOrderTool {
    parameter_schema: Value,
}

impl FindOrderTool {
    /// Creates a new order lookup tool.
    #[inline]
    pub fn new() -> Self {
        FindOrderTool {
            parameter_schema: schema_for!(FindOrderToolParameters).to_value(),
        }
    }
}

impl Default for FindOrderTool {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl Tool for FindOrderTool {
    type Input = FindOrderToolParameters;
    type Output = FindOrderOutput;

    fn name(&self) -> &str {
        "find_order_by_name"
    }

    fn description(&self) -> &str {
        r#"
Finds a customer's order ID based on their name.
Call this first when a customer asks about their order but doesn't provide an order ID."#
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    fn execute(
        &self,
        input: FindOrderToolParameters,
    ) -> impl Future<Output = ToolResult<FindOrderOutput>> + Send + 'static {
        ready(Ok(find_order(&input.customer_name)))
    }
}

fn find_order(customer_name: &str) -> FindOrderOutput {
    let name = customer_name.trim();
    let first_name = name.split_whitespace().next().unwrap_or_default();
    if !name.contains(' ') || name.chars().count() <= 3 {
        debug!("no order for `{name}`");
        return FindOrderOutput {
            order_id: None,
            message: Some(format!(
                "Could not find an order associated with the name \
                 '{customer_name}'. Please verify the name."
            )),
        };
    }

    let prefix = first_name.chars().take(3).collect::<String>().to_uppercase();
    let order_id = format!("ORD-{prefix}{:02}", name.chars().count());
    debug!("found order {order_id} for `{name}`");
    FindOrderOutput {
        order_id: Some(order_id),
        message: None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_find_order() {
        assert_eq!(
            find_order("Jane Doe").order_id.as_deref(),
            Some("ORD-JAN08")
        );
        assert_eq!(
            find_order("  maximilian von Humboldt ").order_id.as_deref(),
            Some("ORD-MAX23")
        );
    }

    #[test]
    fn test_unknown_customer() {
        let output = find_order("Jane");
        assert_eq!(output.order_id, None);
        assert_eq!(
            serde_json::to_value(&output).unwrap(),
            json!({
                "order_id": null,
                "message": "Could not find an order associated with the name \
                            'Jane'. Please verify the name."
            })
        );
    }

    #[test]
    fn test_schema() {
        let tool = FindOrderTool::new();
        let schema = tool.parameter_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["required"], json!(["customer_name"]));
        assert_eq!(
            schema["properties"]["customer_name"]["type"],
            json!("string")
        );
    }
}
