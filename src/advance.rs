//! Advance-loan repayment splitting.
//!
//! Interest and the fixed fee are charged on the principal that remains *after* the
//! payment, so a partial payment is split by solving
//! `payment = principal + (balance - principal) / (1 + r) * r + fee` for `principal`.

use serde::{Deserialize, Serialize};

use crate::money::Money;

pub const DEFAULT_RATE_BPS: u32 = 1_000;
pub const DEFAULT_FEE: Money = Money::from_units(10);

/// Pricing of the advance-loan product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitTerms {
    /// Interest rate in basis points (1000 = 10%).
    pub rate_bps: u32,
    /// Flat fee charged on any unsettled balance.
    pub fee: Money,
}

impl Default for SplitTerms {
    fn default() -> Self {
        Self {
            rate_bps: DEFAULT_RATE_BPS,
            fee: DEFAULT_FEE,
        }
    }
}

impl SplitTerms {
    fn rate(&self) -> f64 {
        f64::from(self.rate_bps) / 10_000.0
    }

    /// Smallest payment that avoids the insufficient-payment penalty. The threshold is
    /// rounded to cents before payments are compared against it, so a payment equal to the
    /// rounded figure carries no penalty.
    pub fn minimum_required(&self, balance: Money) -> Money {
        if !balance.is_positive() {
            return Money::ZERO;
        }
        let r = self.rate();
        Money::from_major(balance.to_major() / (1.0 + r) * r + self.fee.to_major())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvancePaymentSplit {
    /// Principal retired by the payment.
    pub pay_advance: Money,
    /// Interest and fee portion, always a whole currency unit.
    pub pay_advance_interest: Money,
    pub remaining_balance: Money,
    pub is_valid: bool,
    pub has_penalty: bool,
    pub penalty_amount: Money,
    pub minimum_required_amount: Money,
    pub message: String,
}

impl AdvancePaymentSplit {
    fn zero(balance: Money, minimum: Money, message: impl Into<String>) -> Self {
        Self {
            pay_advance: Money::ZERO,
            pay_advance_interest: Money::ZERO,
            remaining_balance: balance.max(Money::ZERO),
            is_valid: true,
            has_penalty: false,
            penalty_amount: Money::ZERO,
            minimum_required_amount: minimum,
            message: message.into(),
        }
    }

    fn settled(balance: Money, minimum: Money) -> Self {
        Self {
            pay_advance: balance,
            pay_advance_interest: Money::ZERO,
            remaining_balance: Money::ZERO,
            is_valid: true,
            has_penalty: false,
            penalty_amount: Money::ZERO,
            minimum_required_amount: minimum,
            message: "advance fully settled".to_string(),
        }
    }

    fn with_penalty(mut self, payment: Money) -> Self {
        if payment.is_positive() && payment < self.minimum_required_amount {
            self.has_penalty = true;
            self.penalty_amount = self.minimum_required_amount - payment;
        }
        self
    }

    /// Total the payment is expected to cover (principal plus interest).
    pub fn total_due(&self) -> Money {
        self.pay_advance + self.pay_advance_interest
    }
}

/// Splits `payment` against an outstanding advance `balance` using the default terms.
pub fn split(balance: Money, payment: Money) -> AdvancePaymentSplit {
    split_with_terms(balance, payment, &SplitTerms::default())
}

pub fn split_with_terms(balance: Money, payment: Money, terms: &SplitTerms) -> AdvancePaymentSplit {
    if !balance.is_positive() {
        return AdvancePaymentSplit::zero(balance, Money::ZERO, "no outstanding balance");
    }

    let minimum = terms.minimum_required(balance);

    if !payment.is_positive() {
        return AdvancePaymentSplit::zero(balance, minimum, "no payment entered");
    }

    // Cents are exact, so any overpayment at all is rejected.
    if payment > balance {
        let mut split = AdvancePaymentSplit::settled(balance, minimum).with_penalty(payment);
        split.is_valid = false;
        split.message = format!(
            "payment exceeds outstanding balance {balance} by {}",
            payment - balance
        );
        return split;
    }

    if payment + Money::TOLERANCE >= balance {
        return AdvancePaymentSplit::settled(balance, minimum).with_penalty(payment);
    }

    let r = terms.rate();
    let balance_f = balance.to_major();
    let interest_component = balance_f * r / (1.0 + r);
    let raw_principal = (payment.to_major() - interest_component - terms.fee.to_major()) * (1.0 + r);
    let pay_advance = Money::from_major(raw_principal).clamp_to(Money::ZERO, balance);

    if pay_advance >= balance {
        return AdvancePaymentSplit::settled(balance, minimum).with_penalty(payment);
    }

    let remaining = balance - pay_advance;
    let principal_equiv = remaining.to_major() / (1.0 + r);
    let interest = Money::from_major((principal_equiv * r + terms.fee.to_major()).round());

    AdvancePaymentSplit {
        pay_advance,
        pay_advance_interest: interest,
        remaining_balance: remaining,
        is_valid: true,
        has_penalty: false,
        penalty_amount: Money::ZERO,
        minimum_required_amount: minimum,
        message: "partial payment".to_string(),
    }
    .with_penalty(payment)
}
