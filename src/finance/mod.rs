//! Finance calculators
//!
//! Deterministic, closed-form EMI and savings projections.
//! Business-rule floors produce a declined result, not an error. A loan
//! below the minimum is a policy refusal the caller must phrase politely.

use serde::Serialize;

/// Minimum loan amount the bank will process, in LKR.
pub const MIN_LOAN_AMOUNT: f64 = 50_000.0;

/// Minimum initial deposit for a savings projection, in LKR.
pub const MIN_INITIAL_DEPOSIT: f64 = 1_000.0;

#[derive(Debug, Clone, Serialize)]
pub struct EmiBreakdown {
    pub emi: f64,
    pub total_payment: f64,
    pub total_interest: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SavingsProjection {
    pub future_value: f64,
    pub total_deposited: f64,
    pub total_interest: f64,
}

/// Result of a calculator invocation. Declined carries a human-readable
/// refusal for the voice layer to speak back.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum CalcOutcome<T> {
    Approved(T),
    Declined { reason: String },
}

/// Equated Monthly Installment for a loan.
///
/// Monthly rate r = annual_rate_percent / 12 / 100. Zero-rate loans divide
/// the principal evenly; otherwise the standard amortization formula
/// EMI = P·r·(1+r)^n / ((1+r)^n − 1). No intermediate rounding; currency
/// rounding happens at the presentation boundary only.
pub fn calculate_emi(
    principal: f64,
    annual_rate_percent: f64,
    term_months: u32,
) -> CalcOutcome<EmiBreakdown> {
    if principal < MIN_LOAN_AMOUNT {
        return CalcOutcome::Declined {
            reason: format!(
                "We are unable to process loan amounts below LKR {}. \
                 Please confirm the amount and try again.",
                format_lkr(MIN_LOAN_AMOUNT)
            ),
        };
    }

    let n = term_months as f64;
    let monthly_rate = annual_rate_percent / 12.0 / 100.0;

    let emi = if monthly_rate == 0.0 {
        principal / n
    } else {
        let growth = (1.0 + monthly_rate).powf(n);
        principal * monthly_rate * growth / (growth - 1.0)
    };

    let total_payment = emi * n;
    let total_interest = total_payment - principal;

    CalcOutcome::Approved(EmiBreakdown {
        emi,
        total_payment,
        total_interest,
    })
}

/// Compound-interest savings projection: future value of the lump sum plus
/// the future value of an ordinary annuity of monthly deposits.
pub fn calculate_savings(
    initial_deposit: f64,
    monthly_deposit: f64,
    annual_rate_percent: f64,
    term_months: u32,
) -> CalcOutcome<SavingsProjection> {
    if initial_deposit < MIN_INITIAL_DEPOSIT {
        return CalcOutcome::Declined {
            reason: format!(
                "Savings projections require an initial deposit of at least \
                 LKR {}. Please confirm the amount and try again.",
                format_lkr(MIN_INITIAL_DEPOSIT)
            ),
        };
    }

    let n = term_months as f64;
    let monthly_rate = annual_rate_percent / 12.0 / 100.0;

    let future_value = if monthly_rate == 0.0 {
        initial_deposit + monthly_deposit * n
    } else {
        let growth = (1.0 + monthly_rate).powf(n);
        initial_deposit * growth + monthly_deposit * (growth - 1.0) / monthly_rate
    };

    let total_deposited = initial_deposit + monthly_deposit * n;
    let total_interest = future_value - total_deposited;

    CalcOutcome::Approved(SavingsProjection {
        future_value,
        total_deposited,
        total_interest,
    })
}

/// Presentation-boundary rounding: whole LKR with thousands separators.
pub fn format_lkr(amount: f64) -> String {
    let rounded = amount.round() as i64;
    let digits = rounded.abs().to_string();

    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    if rounded < 0 {
        format!("-{}", grouped)
    } else {
        grouped
    }
}
