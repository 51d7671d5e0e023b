//! # Measurement Persistence
//!
//! Storage seam for finished measurements and the users they belong to.
//! [`InMemoryMeasurementStore`] keeps everything in process; a database-backed
//! store implements the same trait.

use crate::analysis::pipeline::ResultMatrix;
use crate::protocol::Distances;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("User {0} does not exist")]
    UserNotFound(String),

    #[error("Storage failure: {0}")]
    Storage(String),
}

pub type PersistenceResult<T> = std::result::Result<T, PersistenceError>;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct User {
    pub id: String,
    pub measurement_ids: Vec<String>,
}

/// A completed measurement.
#[derive(Debug, Clone, Serialize)]
pub struct Measurement {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub owner_user_id: String,
    pub lobby_id: String,
    pub center_frequencies: Vec<f64>,
    pub distances: Distances,
    /// `values[cycle][microphone]`
    pub values: Arc<ResultMatrix>,
}

impl Measurement {
    pub fn new(
        owner_user_id: String,
        lobby_id: String,
        center_frequencies: Vec<f64>,
        distances: Distances,
        values: Arc<ResultMatrix>,
    ) -> Self {
        let created_at = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: format!("Measurement {}", created_at.format("%Y-%m-%d %H:%M:%S")),
            created_at,
            owner_user_id,
            lobby_id,
            center_frequencies,
            distances,
            values,
        }
    }
}

#[async_trait]
pub trait MeasurementStore: Send + Sync {
    async fn register_user(&self, user_id: &str) -> PersistenceResult<User>;

    async fn find_user(&self, user_id: &str) -> PersistenceResult<Option<User>>;

    async fn append_measurement_id(&self, user_id: &str, measurement_id: &str) -> PersistenceResult<()>;

    /// Store a measurement and return its id.
    async fn save(&self, measurement: Measurement) -> PersistenceResult<String>;

    async fn get(&self, measurement_id: &str) -> PersistenceResult<Option<Measurement>>;
}

#[derive(Debug, Default)]
pub struct InMemoryMeasurementStore {
    users: RwLock<HashMap<String, User>>,
    measurements: RwLock<HashMap<String, Measurement>>,
}

impl InMemoryMeasurementStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn measurement_count(&self) -> usize {
        self.measurements.read().await.len()
    }
}

#[async_trait]
impl MeasurementStore for InMemoryMeasurementStore {
    async fn register_user(&self, user_id: &str) -> PersistenceResult<User> {
        let mut users = self.users.write().await;
        let user = users.entry(user_id.to_string()).or_insert_with(|| User {
            id: user_id.to_string(),
            measurement_ids: Vec::new(),
        });
        Ok(user.clone())
    }

    async fn find_user(&self, user_id: &str) -> PersistenceResult<Option<User>> {
        Ok(self.users.read().await.get(user_id).cloned())
    }

    async fn append_measurement_id(&self, user_id: &str, measurement_id: &str) -> PersistenceResult<()> {
        let mut users = self.users.write().await;
        let user = users
            .get_mut(user_id)
            .ok_or_else(|| PersistenceError::UserNotFound(user_id.to_string()))?;
        if !user.measurement_ids.iter().any(|id| id == measurement_id) {
            user.measurement_ids.push(measurement_id.to_string());
        }
        Ok(())
    }

    async fn save(&self, measurement: Measurement) -> PersistenceResult<String> {
        let id = measurement.id.clone();
        self.measurements.write().await.insert(id.clone(), measurement);
        Ok(id)
    }

    async fn get(&self, measurement_id: &str) -> PersistenceResult<Option<Measurement>> {
        Ok(self.measurements.read().await.get(measurement_id).cloned())
    }
}

/// Save `measurement` and attribute it to every participant, registering
/// users that are not known yet.
pub async fn save_for_participants(
    store: &dyn MeasurementStore,
    measurement: Measurement,
    participants: &[String],
) -> PersistenceResult<String> {
    let id = store.save(measurement).await?;
    for user_id in participants {
        if store.find_user(user_id).await?.is_none() {
            store.register_user(user_id).await?;
        }
        store.append_measurement_id(user_id, &id).await?;
    }
    Ok(id)
}
