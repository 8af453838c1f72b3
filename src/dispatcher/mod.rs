//! Function dispatcher
//!
//! Single point of translation between the live session's generic tool-call
//! protocol and the concrete capabilities. Calls in a batch run
//! concurrently and independently; every call id gets exactly one response,
//! in input order, no matter what the handler did.

use crate::error::SupportError;
use crate::finance::{self, format_lkr, CalcOutcome};
use crate::models::{FunctionResult, ToolCall, ToolResponse};
use crate::support::SupportService;
use crate::Result;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Names the dispatcher routes, in registry order.
pub const AVAILABLE_FUNCTIONS: &[&str] = &[
    "search_knowledge",
    "get_exchange_rates",
    "find_branches",
    "schedule_callback",
    "get_account_balance",
    "calculate_emi",
    "calculate_savings",
];

const SEARCH_FALLBACK_MESSAGE: &str =
    "I could not reach the knowledge base just now, so I have no results for \
     that. Please try again in a moment.";

//
// ================= Typed Arguments =================
//

/// Strongly-typed arguments per function, validated at the dispatch
/// boundary before any business logic runs.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolArgs {
    SearchKnowledge {
        query: String,
        limit: usize,
    },
    GetExchangeRates {
        currency: Option<String>,
    },
    FindBranches {
        location: String,
        limit: usize,
    },
    ScheduleCallback {
        phone_number: String,
        preferred_time: String,
        purpose: Option<String>,
    },
    GetAccountBalance {
        account_number: String,
        user_id: Option<String>,
    },
    CalculateEmi {
        loan_amount: f64,
        annual_rate_percent: f64,
        tenure_months: u32,
    },
    CalculateSavings {
        initial_deposit: f64,
        monthly_deposit: f64,
        annual_rate_percent: f64,
        tenure_months: u32,
    },
}

impl ToolArgs {
    /// Parse the loose argument map for a named function. Unknown names and
    /// missing/mistyped required fields are rejected here, never deeper.
    pub fn parse(name: &str, args: &Value) -> Result<Self> {
        match name {
            "search_knowledge" => Ok(Self::SearchKnowledge {
                query: require_str(args, "query")?,
                limit: optional_limit(args, 5)?,
            }),
            "get_exchange_rates" => Ok(Self::GetExchangeRates {
                currency: optional_str(args, "currency"),
            }),
            "find_branches" => Ok(Self::FindBranches {
                location: require_str(args, "location")?,
                limit: optional_limit(args, 5)?,
            }),
            "schedule_callback" => Ok(Self::ScheduleCallback {
                phone_number: require_str(args, "phone_number")?,
                preferred_time: require_str(args, "preferred_time")?,
                purpose: optional_str(args, "purpose"),
            }),
            "get_account_balance" => Ok(Self::GetAccountBalance {
                account_number: require_str(args, "account_number")?,
                user_id: optional_str(args, "user_id"),
            }),
            "calculate_emi" => Ok(Self::CalculateEmi {
                loan_amount: require_number(args, "loan_amount")?,
                annual_rate_percent: require_number(args, "annual_rate_percent")?,
                tenure_months: require_integer(args, "tenure_months")?,
            }),
            "calculate_savings" => Ok(Self::CalculateSavings {
                initial_deposit: require_number(args, "initial_deposit")?,
                monthly_deposit: require_number(args, "monthly_deposit")?,
                annual_rate_percent: require_number(args, "annual_rate_percent")?,
                tenure_months: require_integer(args, "tenure_months")?,
            }),
            other => Err(SupportError::UnknownFunction(other.to_string())),
        }
    }
}

fn require_str(args: &Value, field: &str) -> Result<String> {
    match args.get(field) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.clone()),
        Some(_) => Err(SupportError::InvalidArgument(format!(
            "'{}' must be a non-empty string",
            field
        ))),
        None => Err(SupportError::InvalidArgument(format!(
            "missing required argument '{}'",
            field
        ))),
    }
}

fn optional_str(args: &Value, field: &str) -> Option<String> {
    args.get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

fn require_number(args: &Value, field: &str) -> Result<f64> {
    match args.get(field) {
        Some(value) => value.as_f64().ok_or_else(|| {
            SupportError::InvalidArgument(format!("'{}' must be a number", field))
        }),
        None => Err(SupportError::InvalidArgument(format!(
            "missing required argument '{}'",
            field
        ))),
    }
}

fn require_integer(args: &Value, field: &str) -> Result<u32> {
    match args.get(field) {
        Some(value) => value
            .as_u64()
            .filter(|n| *n > 0 && *n <= u32::MAX as u64)
            .map(|n| n as u32)
            .ok_or_else(|| {
                SupportError::InvalidArgument(format!(
                    "'{}' must be a positive integer",
                    field
                ))
            }),
        None => Err(SupportError::InvalidArgument(format!(
            "missing required argument '{}'",
            field
        ))),
    }
}

fn optional_limit(args: &Value, default: usize) -> Result<usize> {
    match args.get("limit") {
        None | Some(Value::Null) => Ok(default),
        Some(value) => value
            .as_u64()
            .filter(|n| *n > 0)
            .map(|n| n as usize)
            .ok_or_else(|| {
                SupportError::InvalidArgument(
                    "'limit' must be a positive integer".to_string(),
                )
            }),
    }
}

//
// ================= Dispatcher =================
//

#[derive(Clone)]
pub struct FunctionDispatcher {
    support: Arc<SupportService>,
}

impl FunctionDispatcher {
    pub fn new(support: Arc<SupportService>) -> Self {
        Self { support }
    }

    /// Build the retrieval index. Retrieval-backed functions refuse with
    /// NotInitialized until this completes; calculators and static lookups
    /// run regardless.
    pub async fn initialize(&self) -> Result<()> {
        self.support.initialize().await
    }

    pub fn is_initialized(&self) -> bool {
        self.support.is_initialized()
    }

    pub fn available_functions(&self) -> &'static [&'static str] {
        AVAILABLE_FUNCTIONS
    }

    pub fn stats(&self) -> serde_json::Value {
        serde_json::json!({
            "available_functions": AVAILABLE_FUNCTIONS,
            "service": self.support.stats(),
        })
    }

    /// Execute a batch. Calls run concurrently; responses come back in the
    /// input order with exactly one response per call id.
    pub async fn dispatch(&self, calls: Vec<ToolCall>) -> Vec<ToolResponse> {
        let mut handles = Vec::with_capacity(calls.len());

        for call in calls {
            let dispatcher = self.clone();
            let id = call.id.clone();
            let name = call.name.clone();
            let handle = tokio::spawn(async move { dispatcher.execute(call).await });
            handles.push((id, name, handle));
        }

        let mut responses = Vec::with_capacity(handles.len());
        for (id, name, handle) in handles {
            match handle.await {
                Ok(response) => responses.push(response),
                Err(e) => {
                    warn!(call_id = %id, error = %e, "Tool task panicked");
                    responses.push(ToolResponse {
                        id,
                        name,
                        response: FunctionResult::failed(format!(
                            "internal execution failure: {}",
                            e
                        )),
                    });
                }
            }
        }

        responses
    }

    /// Execute a single call. Never returns an error: every failure is
    /// folded into the response envelope for this call id.
    async fn execute(&self, call: ToolCall) -> ToolResponse {
        let start = Instant::now();

        let result = match ToolArgs::parse(&call.name, &call.args) {
            Ok(args) => self.run_handler(args).await,
            Err(e) => Err(e),
        };

        let response = match result {
            Ok(result) => result,
            // A down retrieval backend degrades to a polite "no results"
            // reply instead of surfacing an internal failure to the caller.
            Err(SupportError::BackendUnavailable(detail)) => {
                warn!(call_id = %call.id, detail = %detail, "Retrieval backend unavailable");
                let mut fallback =
                    FunctionResult::ok(Value::String(SEARCH_FALLBACK_MESSAGE.to_string()));
                fallback.error = Some(format!("backend unavailable: {}", detail));
                fallback
            }
            Err(e) => {
                warn!(call_id = %call.id, function = %call.name, error = %e, "Tool call failed");
                FunctionResult::failed(e.to_string())
            }
        };

        debug!(
            call_id = %call.id,
            function = %call.name,
            elapsed_ms = start.elapsed().as_millis() as u64,
            success = response.error.is_none(),
            "Tool call completed"
        );

        ToolResponse {
            id: call.id,
            name: call.name,
            response,
        }
    }

    async fn run_handler(&self, args: ToolArgs) -> Result<FunctionResult> {
        match args {
            ToolArgs::SearchKnowledge { query, limit } => {
                self.support.search_knowledge(&query, limit).await
            }
            ToolArgs::GetExchangeRates { currency } => {
                Ok(self.support.exchange_rates(currency.as_deref()))
            }
            ToolArgs::FindBranches { location, limit } => {
                self.support.find_branches(&location, limit)
            }
            ToolArgs::ScheduleCallback {
                phone_number,
                preferred_time,
                purpose,
            } => self
                .support
                .schedule_callback(&phone_number, &preferred_time, purpose.as_deref()),
            ToolArgs::GetAccountBalance {
                account_number,
                user_id,
            } => self
                .support
                .account_balance(&account_number, user_id.as_deref()),
            ToolArgs::CalculateEmi {
                loan_amount,
                annual_rate_percent,
                tenure_months,
            } => Ok(emi_result(loan_amount, annual_rate_percent, tenure_months)),
            ToolArgs::CalculateSavings {
                initial_deposit,
                monthly_deposit,
                annual_rate_percent,
                tenure_months,
            } => Ok(savings_result(
                initial_deposit,
                monthly_deposit,
                annual_rate_percent,
                tenure_months,
            )),
        }
    }
}

/// EMI handler. A declined amount is a successful, explained reply; the
/// business floor is policy, not an error.
fn emi_result(loan_amount: f64, annual_rate_percent: f64, tenure_months: u32) -> FunctionResult {
    match finance::calculate_emi(loan_amount, annual_rate_percent, tenure_months) {
        CalcOutcome::Approved(breakdown) => FunctionResult::ok(serde_json::json!({
            "emi": breakdown.emi,
            "total_payment": breakdown.total_payment,
            "total_interest": breakdown.total_interest,
            "summary": format!(
                "For a loan of LKR {} over {} months, the monthly installment \
                 is LKR {}.",
                format_lkr(loan_amount),
                tenure_months,
                format_lkr(breakdown.emi)
            ),
        })),
        CalcOutcome::Declined { reason } => FunctionResult::ok(Value::String(reason)),
    }
}

fn savings_result(
    initial_deposit: f64,
    monthly_deposit: f64,
    annual_rate_percent: f64,
    tenure_months: u32,
) -> FunctionResult {
    match finance::calculate_savings(
        initial_deposit,
        monthly_deposit,
        annual_rate_percent,
        tenure_months,
    ) {
        CalcOutcome::Approved(projection) => FunctionResult::ok(serde_json::json!({
            "future_value": projection.future_value,
            "total_deposited": projection.total_deposited,
            "total_interest": projection.total_interest,
            "summary": format!(
                "After {} months your savings would grow to about LKR {}, of \
                 which LKR {} is interest.",
                tenure_months,
                format_lkr(projection.future_value),
                format_lkr(projection.total_interest)
            ),
        })),
        CalcOutcome::Declined { reason } => FunctionResult::ok(Value::String(reason)),
    }
}
