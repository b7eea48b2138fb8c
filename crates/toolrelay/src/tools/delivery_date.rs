use std::future::ready;

use chrono::{Duration, Local, NaiveDate};
use schemars::{JsonSchema, schema_for};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use toolrelay_core::tool::{Error as ToolError, Tool, ToolResult};

const DELIVERY_DAYS: i64 = 3;

/// Parameters of [`DeliveryDateTool`].
#[derive(Deserialize, JsonSchema)]
pub struct DeliveryDateToolParameters {
    #[schemars(
        description = "The customer's unique order identifier, potentially obtained using find_order_by_name."
    )]
    order_id: String,
}

/// An estimated delivery date.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DeliveryEstimate {
    /// The order the estimate is for.
    pub order_id: String,
    /// The estimated date, formatted as `YYYY-MM-DD`.
    pub estimated_delivery_date: String,
}

/// A tool that estimates the delivery date of an order.
///
/// Every well-formed order id (`ORD-...`) is simulated to arrive three
/// days from today.
pub struct DeliveryDateTool {
    parameter_schema: Value,
}

impl DeliveryDateTool {
    /// Creates a new delivery date tool.
    #[inline]
    pub fn new() -> Self {
        DeliveryDateTool {
            parameter_schema: schema_for!(DeliveryDateToolParameters)
                .to_value(),
        }
    }
}

impl Default for DeliveryDateTool {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl Tool for DeliveryDateTool {
    type Input = DeliveryDateToolParameters;
    type Output = DeliveryEstimate;

    fn name(&self) -> &str {
        "get_delivery_date"
    }

    fn description(&self) -> &str {
        r#"
Get the estimated delivery date for a specific order ID.
Only call this *after* you have obtained the order ID."#
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    fn execute(
        &self,
        input: DeliveryDateToolParameters,
    ) -> impl Future<Output = ToolResult<DeliveryEstimate>> + Send + 'static {
        let today = Local::now().date_naive();
        ready(estimate_delivery(&input.order_id, today))
    }
}

fn estimate_delivery(
    order_id: &str,
    today: NaiveDate,
) -> ToolResult<DeliveryEstimate> {
    if !order_id.trim().starts_with("ORD-") {
        return Err(ToolError::invalid_input().with_reason(format!(
            "Invalid or missing order_id provided: '{order_id}'."
        )));
    }
    let date = today + Duration::days(DELIVERY_DAYS);
    debug!("order {order_id} arrives on {date}");
    Ok(DeliveryEstimate {
        order_id: order_id.to_owned(),
        estimated_delivery_date: date.format("%Y-%m-%d").to_string(),
    })
}

#[cfg(test)]
mod tests {
    use toolrelay_core::tool::ErrorKind;

    use super::*;

    #[test]
    fn test_estimate() {
        let today = NaiveDate::from_ymd_opt(2024, 12, 30).unwrap();
        assert_eq!(
            estimate_delivery("ORD-JAN08", today).unwrap(),
            DeliveryEstimate {
                order_id: "ORD-JAN08".to_owned(),
                estimated_delivery_date: "2025-01-02".to_owned(),
            }
        );
    }

    #[test]
    fn test_invalid_order_id() {
        let today = NaiveDate::from_ymd_opt(2024, 12, 30).unwrap();
        let err = estimate_delivery("12345", today).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert_eq!(
            err.reason(),
            "Invalid or missing order_id provided: '12345'."
        );
    }

    #[tokio::test]
    async fn test_execute() {
        let tool = DeliveryDateTool::new();
        let input =
            serde_json::from_str(r#"{"order_id": "ORD-123"}"#).unwrap();
        let estimate = tool.execute(input).await.unwrap();
        assert_eq!(estimate.order_id, "ORD-123");
        assert!(
            NaiveDate::parse_from_str(&estimate.estimated_delivery_date, "%Y-%m-%d")
                .is_ok()
        );
    }
}
