use crate::storage::schema::{mixes, templates, users};
use diesel::prelude::*;
use mixboard_shared::domain::{Mix, MixId, MixMetadata, MixTemplate, Owner, Stage, UserProfile};

use super::StorageError;

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: String,
    pub email: String,
    pub display_name: Option<String>,
    pub password_hash: String,
    pub created_at_ms: i64,
}

impl User {
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            id: self.id.clone(),
            email: self.email.clone(),
            display_name: self.display_name.clone(),
        }
    }
}

#[derive(Insertable)]
#[diesel(table_name = users)]
pub struct NewUser<'a> {
    pub id: &'a str,
    pub email: &'a str,
    pub display_name: Option<&'a str>,
    pub password_hash: &'a str,
    pub created_at_ms: i64,
}

/// Flat row form of [`Mix`]; stages are stored as a JSON array.
#[derive(Debug, Clone, Queryable, Identifiable, Selectable, Insertable)]
#[diesel(table_name = mixes)]
pub struct MixRow {
    pub id: String,
    pub name: String,
    pub stages_json: String,
    pub current_stage_index: i32,
    pub current_stage_started_at_ms: i64,
    pub owner_id: String,
    pub owner_email: String,
    pub owner_name: Option<String>,
    pub category: Option<String>,
    pub color: Option<String>,
    pub description: Option<String>,
    pub batch_number: Option<String>,
    pub created_at_ms: i64,
    pub is_deleted: bool,
}

impl MixRow {
    pub fn from_domain(mix: &Mix) -> Result<Self, StorageError> {
        Ok(Self {
            id: mix.id.0.clone(),
            name: mix.name.clone(),
            stages_json: encode_stages(&mix.stages)?,
            current_stage_index: i32::try_from(mix.current_stage_index)
                .map_err(|_| StorageError::InvalidInput("stage index out of range".into()))?,
            current_stage_started_at_ms: mix.current_stage_started_at_ms,
            owner_id: mix.owner.id.clone(),
            owner_email: mix.owner.email.clone(),
            owner_name: mix.owner.display_name.clone(),
            category: mix.metadata.category.clone(),
            color: mix.metadata.color.clone(),
            description: mix.metadata.description.clone(),
            batch_number: mix.metadata.batch_number.clone(),
            created_at_ms: mix.created_at_ms,
            is_deleted: mix.is_deleted,
        })
    }

    pub fn into_domain(self) -> Result<Mix, StorageError> {
        let stages = decode_stages(&self.id, &self.stages_json)?;
        let current_stage_index = usize::try_from(self.current_stage_index).map_err(|_| {
            StorageError::Corrupt(format!("mix {}: negative stage index", self.id))
        })?;
        Ok(Mix {
            id: MixId(self.id),
            name: self.name,
            stages,
            current_stage_index,
            current_stage_started_at_ms: self.current_stage_started_at_ms,
            owner: Owner {
                id: self.owner_id,
                email: self.owner_email,
                display_name: self.owner_name,
            },
            created_at_ms: self.created_at_ms,
            is_deleted: self.is_deleted,
            metadata: MixMetadata {
                category: self.category,
                color: self.color,
                description: self.description,
                batch_number: self.batch_number,
            },
        })
    }
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable, Insertable)]
#[diesel(table_name = templates)]
pub struct TemplateRow {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub stages_json: String,
    pub category: Option<String>,
    pub color: Option<String>,
    pub description: Option<String>,
    pub created_at_ms: i64,
}

impl TemplateRow {
    pub fn from_domain(t: &MixTemplate) -> Result<Self, StorageError> {
        Ok(Self {
            id: t.id.clone(),
            owner_id: t.owner_id.clone(),
            name: t.name.clone(),
            stages_json: encode_stages(&t.stages)?,
            category: t.metadata.category.clone(),
            color: t.metadata.color.clone(),
            description: t.metadata.description.clone(),
            created_at_ms: t.created_at_ms,
        })
    }

    pub fn into_domain(self) -> Result<MixTemplate, StorageError> {
        let stages = decode_stages(&self.id, &self.stages_json)?;
        Ok(MixTemplate {
            id: self.id,
            owner_id: self.owner_id,
            name: self.name,
            stages,
            metadata: MixMetadata {
                category: self.category,
                color: self.color,
                description: self.description,
                batch_number: None,
            },
            created_at_ms: self.created_at_ms,
        })
    }
}

fn encode_stages(stages: &[Stage]) -> Result<String, StorageError> {
    serde_json::to_string(stages).map_err(|e| StorageError::InvalidInput(e.to_string()))
}

fn decode_stages(owner: &str, json: &str) -> Result<Vec<Stage>, StorageError> {
    serde_json::from_str(json)
        .map_err(|e| StorageError::Corrupt(format!("record {owner}: bad stages: {e}")))
}
