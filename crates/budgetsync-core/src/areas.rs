//! Feature-area wiring.
//!
//! Each entity area of the app gets exactly one store in the registry,
//! backed by the matching `EntityService`. Market-data areas also carry the
//! TTL policy that decides when their quotes go stale.

use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;

use crate::api::{ApiClient, ApiResponse, EntityService};
use crate::config::SyncConfig;
use crate::error::RegistryError;
use crate::models::{
    Budget, Category, MetalQuote, PaymentMethod, RecurringPayment, Subscription, Transaction,
    WatchlistEntry,
};
use crate::store::{Fetcher, Store, StoreRegistry};
use crate::ttl::TtlPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityArea {
    Categories,
    Transactions,
    Budgets,
    PaymentMethods,
    RecurringPayments,
    Subscriptions,
    StockWatchlist,
    MetalQuotes,
}

impl EntityArea {
    pub const ALL: [EntityArea; 8] = [
        EntityArea::Categories,
        EntityArea::Transactions,
        EntityArea::Budgets,
        EntityArea::PaymentMethods,
        EntityArea::RecurringPayments,
        EntityArea::Subscriptions,
        EntityArea::StockWatchlist,
        EntityArea::MetalQuotes,
    ];

    /// Registry key, stable across releases.
    pub fn name(&self) -> &'static str {
        match self {
            EntityArea::Categories => "categories",
            EntityArea::Transactions => "transactions",
            EntityArea::Budgets => "budgets",
            EntityArea::PaymentMethods => "payment_methods",
            EntityArea::RecurringPayments => "recurring_payments",
            EntityArea::Subscriptions => "subscriptions",
            EntityArea::StockWatchlist => "stock_watchlist",
            EntityArea::MetalQuotes => "metal_quotes",
        }
    }

    pub fn api_path(&self) -> &'static str {
        match self {
            EntityArea::Categories => "/api/category",
            EntityArea::Transactions => "/api/transaction",
            EntityArea::Budgets => "/api/budget",
            EntityArea::PaymentMethods => "/api/paymentMethod",
            EntityArea::RecurringPayments => "/api/recurringPayment",
            EntityArea::Subscriptions => "/api/subscription",
            EntityArea::StockWatchlist => "/api/asset/watchlist",
            EntityArea::MetalQuotes => "/api/metal/quotes",
        }
    }

    /// Quote areas expire on the market's schedule; everything else stays
    /// cached until explicitly refreshed.
    pub fn refresh_policy(&self, config: &SyncConfig) -> Option<TtlPolicy> {
        match self {
            EntityArea::MetalQuotes => Some(config.metal_quote_policy),
            EntityArea::StockWatchlist => Some(config.stock_quote_policy),
            _ => None,
        }
    }
}

impl fmt::Display for EntityArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EntityArea {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        EntityArea::ALL
            .into_iter()
            .find(|area| area.name() == normalized)
            .ok_or_else(|| {
                let known: Vec<&str> = EntityArea::ALL.iter().map(|a| a.name()).collect();
                format!("Unknown area '{}' (expected one of: {})", s, known.join(", "))
            })
    }
}

/// One store per feature area, all shared through a registry.
#[derive(Clone)]
pub struct FinanceStores {
    client: ApiClient,
    pub categories: Store<Category>,
    pub transactions: Store<Transaction>,
    pub budgets: Store<Budget>,
    pub payment_methods: Store<PaymentMethod>,
    pub recurring_payments: Store<RecurringPayment>,
    pub subscriptions: Store<Subscription>,
    pub stock_watchlist: Store<WatchlistEntry>,
    pub metal_quotes: Store<MetalQuote>,
}

impl FinanceStores {
    /// Register (or reuse) every area store and bind them to the configured
    /// session. Calling this twice against the same registry returns handles
    /// to the same stores.
    pub fn connect(
        client: &ApiClient,
        config: &SyncConfig,
        registry: &StoreRegistry,
    ) -> Result<Self, RegistryError> {
        let stores = Self {
            client: client.clone(),
            categories: entity_store(client, config, registry, EntityArea::Categories)?,
            transactions: entity_store(client, config, registry, EntityArea::Transactions)?,
            budgets: entity_store(client, config, registry, EntityArea::Budgets)?,
            payment_methods: entity_store(client, config, registry, EntityArea::PaymentMethods)?,
            recurring_payments: entity_store(client, config, registry, EntityArea::RecurringPayments)?,
            subscriptions: entity_store(client, config, registry, EntityArea::Subscriptions)?,
            stock_watchlist: entity_store(client, config, registry, EntityArea::StockWatchlist)?,
            metal_quotes: area_store(
                config,
                registry,
                EntityArea::MetalQuotes,
                metal_quotes_fetcher(client.clone()),
            )?,
        };
        registry.bind_session_all(config.session_user.clone());
        Ok(stores)
    }

    /// CRUD service for an area, sharing the stores' HTTP client.
    pub fn service<T>(&self, area: EntityArea) -> EntityService<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        EntityService::new(self.client.clone(), area.api_path())
    }
}

fn entity_store<T>(
    client: &ApiClient,
    config: &SyncConfig,
    registry: &StoreRegistry,
    area: EntityArea,
) -> Result<Store<T>, RegistryError>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    let service = EntityService::<T>::new(client.clone(), area.api_path());
    area_store(config, registry, area, service)
}

fn area_store<T, F>(
    config: &SyncConfig,
    registry: &StoreRegistry,
    area: EntityArea,
    fetcher: F,
) -> Result<Store<T>, RegistryError>
where
    T: Send + Sync + 'static,
    F: Fetcher<T>,
{
    registry.get_or_init(area.name(), || {
        let mut builder = Store::builder(area.name(), fetcher).session(config.session_user.clone());
        if let Some(policy) = area.refresh_policy(config) {
            builder = builder.refresh_policy(policy);
        }
        builder.build()
    })
}

/// Metals the provider has no price for come back as `null` entries.
fn metal_quotes_fetcher(client: ApiClient) -> impl Fetcher<MetalQuote> {
    move || {
        let client = client.clone();
        async move {
            let response: ApiResponse<Vec<Option<MetalQuote>>> = client
                .get(EntityArea::MetalQuotes.api_path(), &[])
                .await
                .context("Failed to fetch metal quotes")?;
            let quotes: Vec<MetalQuote> = response.data.unwrap_or_default().into_iter().flatten().collect();
            anyhow::Ok(quotes)
        }
    }
}
