//! CRUD access to one backend entity collection.

use std::fmt;
use std::marker::PhantomData;

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::{ApiClient, ApiResponse};
use crate::store::Fetcher;

/// Filters accepted by list endpoints.
///
/// Dates go over the wire as `YYYY-MM-DD`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListQuery {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    params: Vec<(String, String)>,
}

impl ListQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn since(mut self, date: NaiveDate) -> Self {
        self.from = Some(date);
        self
    }

    pub fn until(mut self, date: NaiveDate) -> Self {
        self.to = Some(date);
        self
    }

    /// Any other filter the endpoint understands.
    pub fn param(mut self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        self.params.push((key.into(), value.to_string()));
        self
    }

    pub fn to_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::with_capacity(self.params.len() + 2);
        if let Some(from) = self.from {
            pairs.push(("from".to_string(), from.format("%Y-%m-%d").to_string()));
        }
        if let Some(to) = self.to {
            pairs.push(("to".to_string(), to.format("%Y-%m-%d").to_string()));
        }
        pairs.extend(self.params.iter().cloned());
        pairs
    }
}

/// Typed CRUD service bound to a base path such as `/api/category`.
///
/// Services never touch stores; callers reconcile a store after a mutation
/// with `set_data`, `update_data` or `retrieve`.
pub struct EntityService<T> {
    client: ApiClient,
    base_path: String,
    _entity: PhantomData<fn() -> T>,
}

impl<T> Clone for EntityService<T> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            base_path: self.base_path.clone(),
            _entity: PhantomData,
        }
    }
}

impl<T> EntityService<T>
where
    T: DeserializeOwned + Send + 'static,
{
    pub fn new(client: ApiClient, base_path: impl Into<String>) -> Self {
        Self {
            client,
            base_path: base_path.into(),
            _entity: PhantomData,
        }
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    fn entity_path(&self, id: &str) -> String {
        format!("{}/{}", self.base_path, id)
    }

    pub async fn get_all(&self, query: Option<&ListQuery>) -> Result<Vec<T>> {
        let pairs = query.map(ListQuery::to_pairs).unwrap_or_default();
        let response: ApiResponse<Vec<T>> = self
            .client
            .get(&self.base_path, &pairs)
            .await
            .with_context(|| format!("Failed to fetch {}", self.base_path))?;

        let items = response.data.unwrap_or_default();
        debug!(path = %self.base_path, count = items.len(), "Fetched collection");
        Ok(items)
    }

    pub async fn get_by_id(&self, id: impl fmt::Display) -> Result<T> {
        let path = self.entity_path(&id.to_string());
        let response: ApiResponse<T> = self
            .client
            .get(&path, &[])
            .await
            .with_context(|| format!("Failed to fetch {}", path))?;
        Self::require_data(response, &path)
    }

    pub async fn create<P: Serialize + ?Sized>(&self, payload: &P) -> Result<T> {
        let response: ApiResponse<T> = self
            .client
            .post(&self.base_path, payload)
            .await
            .with_context(|| format!("Failed to create entity at {}", self.base_path))?;
        Self::require_data(response, &self.base_path)
    }

    pub async fn update_by_id<P: Serialize + ?Sized>(&self, id: impl fmt::Display, payload: &P) -> Result<T> {
        let path = self.entity_path(&id.to_string());
        let response: ApiResponse<T> = self
            .client
            .put(&path, payload)
            .await
            .with_context(|| format!("Failed to update {}", path))?;
        Self::require_data(response, &path)
    }

    /// Delete an entity. Returns whatever the backend echoes back, if anything.
    pub async fn delete_by_id(&self, id: impl fmt::Display) -> Result<Option<T>> {
        let path = self.entity_path(&id.to_string());
        let response: ApiResponse<T> = self
            .client
            .delete(&path)
            .await
            .with_context(|| format!("Failed to delete {}", path))?;
        Ok(response.data)
    }

    fn require_data(response: ApiResponse<T>, path: &str) -> Result<T> {
        let status = response.status;
        let message = response.message;
        response.data.ok_or_else(|| {
            anyhow!(
                "Empty response from {} (status {}: {})",
                path,
                status,
                message.unwrap_or_default()
            )
        })
    }
}

/// Stores fetch the whole, unfiltered collection.
impl<T> Fetcher<T> for EntityService<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    fn fetch(&self) -> BoxFuture<'static, Result<Vec<T>>> {
        let service = self.clone();
        async move { service.get_all(None).await }.boxed()
    }
}
