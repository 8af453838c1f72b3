//! Customer support service
//!
//! Owns the retrieval service plus the static capabilities behind the
//! non-retrieval tools: exchange rates, branch directory, callback
//! scheduling, and the masked account-balance stub.

use crate::error::SupportError;
use crate::models::{BranchInfo, CallbackConfirmation, ExchangeRate, FunctionResult, GroundingChunk, WebSource};
use crate::retrieval::RetrievalService;
use crate::Result;
use chrono::{DateTime, NaiveDateTime, Utc};
use lazy_static::lazy_static;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

lazy_static! {
    static ref EXCHANGE_RATES: Vec<ExchangeRate> = vec![
        ExchangeRate { currency: "USD".into(), buy_rate: 295.00, sell_rate: 305.00 },
        ExchangeRate { currency: "EUR".into(), buy_rate: 320.50, sell_rate: 330.50 },
        ExchangeRate { currency: "GBP".into(), buy_rate: 380.25, sell_rate: 390.25 },
        ExchangeRate { currency: "AUD".into(), buy_rate: 195.75, sell_rate: 205.75 },
        ExchangeRate { currency: "JPY".into(), buy_rate: 2.15, sell_rate: 2.25 },
        ExchangeRate { currency: "CAD".into(), buy_rate: 218.50, sell_rate: 228.50 },
    ];

    static ref BRANCH_DIRECTORY: Vec<BranchInfo> = vec![
        BranchInfo {
            name: "Colombo Main Branch".into(),
            address: "No. 110, Sir James Peiris Mawatha, Colombo 02".into(),
            phone: "+94 11 230 3050".into(),
            services: vec![
                "All Banking Services".into(),
                "Foreign Exchange".into(),
                "Loans".into(),
                "Safe Deposit".into(),
            ],
            hours: "Mon-Fri: 9:00 AM - 5:00 PM".into(),
        },
        BranchInfo {
            name: "Kandy Branch".into(),
            address: "No. 123, Kandy Road, Kandy".into(),
            phone: "+94 81 222 3456".into(),
            services: vec![
                "All Banking Services".into(),
                "ATM".into(),
                "Loans".into(),
            ],
            hours: "Mon-Fri: 9:00 AM - 4:30 PM".into(),
        },
        BranchInfo {
            name: "Galle Branch".into(),
            address: "No. 456, Galle Road, Galle".into(),
            phone: "+94 91 234 5678".into(),
            services: vec![
                "All Banking Services".into(),
                "Foreign Exchange".into(),
            ],
            hours: "Mon-Fri: 9:00 AM - 4:30 PM".into(),
        },
    ];
}

const RATE_DISCLAIMER: &str =
    "Rates are indicative and subject to change. Please visit a branch for actual rates.";

pub struct SupportService {
    retrieval: Arc<RetrievalService>,
    initialized: AtomicBool,
}

impl SupportService {
    pub fn new(retrieval: Arc<RetrievalService>) -> Self {
        Self {
            retrieval,
            initialized: AtomicBool::new(false),
        }
    }

    /// Build the retrieval index. Idempotent; retrieval-backed operations
    /// refuse to run until this has completed once.
    pub async fn initialize(&self) -> Result<()> {
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }

        self.retrieval.index().await?;
        self.initialized.store(true, Ordering::Release);

        info!(
            documents = self.retrieval.store().len(),
            "Support service initialized"
        );
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Knowledge base search with provenance for grounding.
    pub async fn search_knowledge(&self, query: &str, limit: usize) -> Result<FunctionResult> {
        if !self.is_initialized() {
            return Err(SupportError::NotInitialized(
                "knowledge search requested before the retrieval index was built".to_string(),
            ));
        }

        let outcome = self.retrieval.search(query, limit, 0.7).await?;

        let sources = outcome
            .documents
            .iter()
            .map(|doc| format!("{} ({})", doc.title, doc.id))
            .collect();

        let grounding_chunks = outcome
            .documents
            .iter()
            .map(|doc| GroundingChunk {
                content: doc.content.clone(),
                score: doc.score,
                web: Some(WebSource {
                    uri: format!("internal://{}", doc.id),
                    title: doc.title.clone(),
                }),
            })
            .collect();

        Ok(FunctionResult {
            result: serde_json::json!({
                "results": outcome.documents,
                "query": outcome.query,
                "total_found": outcome.total_results,
                "search_time_ms": outcome.elapsed_ms,
            }),
            sources,
            grounding_chunks,
            error: None,
        })
    }

    /// Indicative exchange rates against LKR, optionally filtered.
    pub fn exchange_rates(&self, currency: Option<&str>) -> FunctionResult {
        let rates: Vec<&ExchangeRate> = match currency {
            Some(code) => EXCHANGE_RATES
                .iter()
                .filter(|rate| rate.currency.eq_ignore_ascii_case(code))
                .collect(),
            None => EXCHANGE_RATES.iter().collect(),
        };

        let mut result = FunctionResult::ok(serde_json::json!({
            "base_currency": "LKR",
            "rates": rates,
            "last_updated": Utc::now().to_rfc3339(),
            "disclaimer": RATE_DISCLAIMER,
        }));
        result.sources = vec!["Treasury Department".to_string()];
        result
    }

    /// Substring match over the static branch directory.
    pub fn find_branches(&self, location: &str, limit: usize) -> Result<FunctionResult> {
        if location.trim().is_empty() {
            return Err(SupportError::InvalidArgument(
                "location must be a non-empty string".to_string(),
            ));
        }

        let needle = location.to_lowercase();
        let branches: Vec<&BranchInfo> = BRANCH_DIRECTORY
            .iter()
            .filter(|branch| {
                branch.name.to_lowercase().contains(&needle)
                    || branch.address.to_lowercase().contains(&needle)
            })
            .take(limit)
            .collect();

        let total_found = branches.len();
        let mut result = FunctionResult::ok(serde_json::json!({
            "branches": branches,
            "search_location": location,
            "total_found": total_found,
        }));
        result.sources = vec!["Branch Directory".to_string()];
        Ok(result)
    }

    /// Schedule a customer callback. Validates the phone format and requires
    /// a parseable future time.
    pub fn schedule_callback(
        &self,
        phone_number: &str,
        preferred_time: &str,
        purpose: Option<&str>,
    ) -> Result<FunctionResult> {
        if !valid_phone(phone_number) {
            return Err(SupportError::InvalidArgument(
                "phone_number is not a valid phone number".to_string(),
            ));
        }

        let scheduled_time = parse_preferred_time(preferred_time)?;
        if scheduled_time <= Utc::now() {
            return Err(SupportError::InvalidArgument(
                "preferred_time must be in the future".to_string(),
            ));
        }

        let reference = format!("CB-{}", Uuid::new_v4());
        let purpose = purpose.unwrap_or("General Inquiry").to_string();

        let confirmation = CallbackConfirmation {
            reference: reference.clone(),
            phone_number: phone_number.to_string(),
            scheduled_time,
            purpose,
            confirmation_message: format!(
                "Your callback has been scheduled. Reference: {}. A representative \
                 will call you at {} on {}.",
                reference,
                phone_number,
                scheduled_time.to_rfc3339()
            ),
        };

        info!(reference = %confirmation.reference, "Callback scheduled");

        let mut result = FunctionResult::ok(serde_json::to_value(&confirmation)?);
        result.sources = vec!["Customer Service".to_string()];
        Ok(result)
    }

    /// Account balance stub. Requires an authenticated user id and masks the
    /// account number in the reply.
    pub fn account_balance(
        &self,
        account_number: &str,
        user_id: Option<&str>,
    ) -> Result<FunctionResult> {
        if user_id.map(str::trim).filter(|v| !v.is_empty()).is_none() {
            return Err(SupportError::InvalidArgument(
                "account information requires an authenticated user_id".to_string(),
            ));
        }

        let mut result = FunctionResult::ok(serde_json::json!({
            "account_number": mask_account_number(account_number),
            "balance": "LKR 125,450.75",
            "available_balance": "LKR 125,450.75",
            "account_type": "Savings Account",
            "message": "For detailed account information please verify your \
                        identity through the mobile app or visit a branch.",
        }));
        result.sources = vec!["Account Services".to_string()];
        Ok(result)
    }

    pub fn stats(&self) -> serde_json::Value {
        serde_json::json!({
            "initialized": self.is_initialized(),
            "knowledge": self.retrieval.store().stats(),
            "exchange_currencies": EXCHANGE_RATES.len(),
            "branches": BRANCH_DIRECTORY.len(),
        })
    }
}

/// Basic phone format check: 7-15 characters of digits, +, -, parens, space.
fn valid_phone(phone: &str) -> bool {
    let len = phone.chars().count();
    (7..=15).contains(&len)
        && phone
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '(' | ')' | ' '))
}

/// Accept RFC 3339 or a bare `YYYY-MM-DDTHH:MM:SS` local timestamp (read as
/// UTC).
fn parse_preferred_time(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .map(|naive| naive.and_utc())
        .map_err(|_| {
            SupportError::InvalidArgument(format!(
                "preferred_time '{}' is not a recognized timestamp",
                raw
            ))
        })
}

/// Mask all but the last four digits.
fn mask_account_number(account_number: &str) -> String {
    let chars: Vec<char> = account_number.chars().collect();
    let visible_from = chars.len().saturating_sub(4);

    chars
        .iter()
        .enumerate()
        .map(|(i, c)| if i < visible_from { '*' } else { *c })
        .collect()
}
