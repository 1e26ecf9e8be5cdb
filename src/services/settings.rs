use crate::{
    entities::setting::{self, Column as SettingColumn, Entity as Setting},
    errors::ServiceError,
};
use chrono::Utc;
use sea_orm::{
    sea_query::OnConflict, DatabaseConnection, EntityTrait, QueryOrder, Set,
};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};

/// Key/value store for global settings. Each key lives independently.
pub struct SettingsService {
    db: Arc<DatabaseConnection>,
}

impl SettingsService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Reads a setting. `None` when the key was never set.
    #[instrument(skip(self))]
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ServiceError> {
        let Some(row) = Setting::find_by_id(key.to_string()).one(&*self.db).await? else {
            return Ok(None);
        };
        serde_json::from_value(row.value).map(Some).map_err(|e| {
            ServiceError::InternalError(format!("setting {} has an unexpected shape: {}", key, e))
        })
    }

    #[instrument(skip(self, value))]
    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<(), ServiceError> {
        if key.trim().is_empty() {
            return Err(ServiceError::invalid_field("key", "blank", "setting key is required"));
        }
        let value = serde_json::to_value(value)
            .map_err(|e| ServiceError::invalid_field("value", "serialize", e.to_string()))?;

        let row = setting::ActiveModel {
            key: Set(key.to_string()),
            value: Set(value),
            updated_at: Set(Utc::now()),
        };
        Setting::insert(row)
            .on_conflict(
                OnConflict::column(SettingColumn::Key)
                    .update_columns([SettingColumn::Value, SettingColumn::UpdatedAt])
                    .to_owned(),
            )
            .exec_without_returning(&*self.db)
            .await?;

        info!(key, "Setting stored");
        Ok(())
    }

    /// Returns whether a row was removed.
    #[instrument(skip(self))]
    pub async fn delete(&self, key: &str) -> Result<bool, ServiceError> {
        let result = Setting::delete_by_id(key.to_string()).exec(&*self.db).await?;
        Ok(result.rows_affected > 0)
    }

    pub async fn list(&self) -> Result<Vec<setting::Model>, ServiceError> {
        Ok(Setting::find()
            .order_by_asc(SettingColumn::Key)
            .all(&*self.db)
            .await?)
    }
}
