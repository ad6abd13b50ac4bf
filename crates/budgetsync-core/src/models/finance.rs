use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: i64,
    pub owner_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {}", self.id, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentMethod {
    pub id: i64,
    pub owner_id: String,
    pub name: String,
    pub provider: String,
    pub address: String,
    #[serde(default)]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {} ({})", self.id, self.name, self.provider)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: i64,
    pub owner_id: String,
    pub category_id: i64,
    pub payment_method_id: i64,
    pub processed_at: DateTime<Utc>,
    pub receiver: String,
    /// Positive for income, negative for spending.
    pub transfer_amount: f64,
    #[serde(default)]
    pub information: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    pub fn is_income(&self) -> bool {
        self.transfer_amount > 0.0
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} {:>10.2} {}",
            self.id,
            self.processed_at.format("%Y-%m-%d"),
            self.transfer_amount,
            self.receiver
        )
    }
}

/// Whether a budget tracks income (`i`) or expenses (`e`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BudgetType {
    #[serde(rename = "i")]
    Income,
    #[serde(rename = "e")]
    Expense,
}

impl fmt::Display for BudgetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BudgetType::Income => write!(f, "income"),
            BudgetType::Expense => write!(f, "expense"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Budget {
    pub id: i64,
    pub owner_id: String,
    #[serde(rename = "type")]
    pub budget_type: BudgetType,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub budget: f64,
    #[serde(default)]
    pub balance: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Budget {
    /// Amount left before the budget is exhausted. Negative once overspent.
    pub fn remaining(&self) -> f64 {
        self.budget - self.balance.abs()
    }
}

impl fmt::Display for Budget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} [{}] {:.2}/{:.2}",
            self.id,
            self.name,
            self.budget_type,
            self.balance.abs(),
            self.budget
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecurringPayment {
    pub id: i64,
    pub owner_id: String,
    pub category_id: i64,
    pub payment_method_id: i64,
    #[serde(default)]
    pub paused: bool,
    /// Day of the month (1..=31) the payment is booked on.
    pub execute_at: u8,
    pub receiver: String,
    pub transfer_amount: f64,
    #[serde(default)]
    pub information: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl fmt::Display for RecurringPayment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let paused = if self.paused { " (paused)" } else { "" };
        write!(
            f,
            "#{} day {:>2} {:>10.2} {}{}",
            self.id, self.execute_at, self.transfer_amount, self.receiver, paused
        )
    }
}

/// Legacy subscription record; same shape as a recurring payment with a
/// free-form description instead of receiver details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: i64,
    pub owner_id: String,
    pub category_id: i64,
    pub payment_method_id: i64,
    #[serde(default)]
    pub paused: bool,
    pub execute_at: u8,
    pub transfer_amount: f64,
    #[serde(default)]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl fmt::Display for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} day {:>2} {:>10.2} {}",
            self.id,
            self.execute_at,
            self.transfer_amount,
            self.description.as_deref().unwrap_or("-")
        )
    }
}
