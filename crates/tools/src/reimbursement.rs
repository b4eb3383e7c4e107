//! Reimbursement submission tool.
//!
//! A pure decision function: amounts up to the configured limit are
//! accepted, larger ones are refused. Nothing leaves the process.

use async_trait::async_trait;
use policypilot_core::error::ToolError;
use policypilot_core::tool::{Tool, ToolResult};
use serde::{Deserialize, Serialize};
use tracing::info;

pub const REIMBURSEMENT_TOOL_NAME: &str = "send_reimbursement";

pub const ACCEPTED_MESSAGE: &str = "We received your request ;)";
pub const REJECTED_MESSAGE: &str = "This amount cannot be reimbursed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Currency {
    Eur,
    Usd,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReimbursementRequest {
    pub amount: f64,
    pub currency: Currency,
    pub description: String,
}

/// Outcome of a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accepted,
    Rejected,
}

impl Decision {
    pub fn message(&self) -> &'static str {
        match self {
            Decision::Accepted => ACCEPTED_MESSAGE,
            Decision::Rejected => REJECTED_MESSAGE,
        }
    }
}

pub struct ReimbursementTool {
    limit: f64,
}

impl ReimbursementTool {
    pub fn new(limit: f64) -> Self {
        Self { limit }
    }

    /// Decide on a request. Non-positive or non-finite amounts are invalid.
    pub fn submit(&self, request: &ReimbursementRequest) -> Result<Decision, ToolError> {
        if !request.amount.is_finite() || request.amount <= 0.0 {
            return Err(ToolError::InvalidArguments(format!(
                "amount must be a positive number, got {}",
                request.amount
            )));
        }
        if request.amount > self.limit {
            Ok(Decision::Rejected)
        } else {
            Ok(Decision::Accepted)
        }
    }
}

impl Default for ReimbursementTool {
    fn default() -> Self {
        Self::new(10.0)
    }
}

#[async_trait]
impl Tool for ReimbursementTool {
    fn name(&self) -> &str {
        REIMBURSEMENT_TOOL_NAME
    }

    fn description(&self) -> &str {
        "Send a reimbursement request to the internal finance tool with the amount, currency and a description of the spend."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "amount": {
                    "type": "number",
                    "description": "The exact amount of the spend"
                },
                "currency": {
                    "type": "string",
                    "enum": ["eur", "usd"],
                    "description": "The currency of the spend"
                },
                "description": {
                    "type": "string",
                    "description": "What the spend was for"
                }
            },
            "required": ["amount", "currency", "description"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let request: ReimbursementRequest = serde_json::from_value(arguments)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;

        let decision = self.submit(&request)?;
        info!(
            amount = request.amount,
            currency = ?request.currency,
            decision = ?decision,
            "Reimbursement request decided"
        );

        Ok(ToolResult::ok(decision.message()).with_data(serde_json::json!({
            "accepted": decision == Decision::Accepted,
            "amount": request.amount,
            "currency": request.currency,
        })))
    }
}
