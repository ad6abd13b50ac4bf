//! Wire models for the budget backend.
//!
//! - Finance entities: `Category`, `PaymentMethod`, `Transaction`, `Budget`,
//!   `RecurringPayment`, `Subscription`
//! - Market data: `MetalQuote`, `StockQuote`, `WatchlistEntry`
//!
//! All fields follow the backend's camelCase JSON.

pub mod finance;
pub mod quote;

pub use finance::{Budget, BudgetType, Category, PaymentMethod, RecurringPayment, Subscription, Transaction};
pub use quote::{MetalPrice, MetalQuote, StockQuote, WatchlistEntry};
