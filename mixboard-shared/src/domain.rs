use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_COLOR: &str = "#666666";

const CATEGORY_PALETTE: [&str; 10] = [
    "#10b981", "#3b82f6", "#8b5cf6", "#f59e0b", "#ef4444", "#06b6d4", "#ec4899", "#f97316",
    "#84cc16", "#22d3ee",
];

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MixId(pub String);

impl fmt::Display for MixId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for MixId {
    fn from(value: &str) -> Self {
        MixId(value.to_string())
    }
}

impl FromStr for MixId {
    type Err = std::convert::Infallible;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(MixId(s.to_string()))
    }
}

/// Identity of one stage instance: a mix plus the index of the stage within it.
///
/// Stage indices are never reused for a mix, so the key stays unique for the
/// lifetime of the mix even when its stage list is edited.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    pub mix_id: MixId,
    pub stage_index: usize,
}

impl EntityKey {
    pub fn new(mix_id: impl Into<MixId>, stage_index: usize) -> Self {
        Self {
            mix_id: mix_id.into(),
            stage_index,
        }
    }
}

impl From<String> for MixId {
    fn from(value: String) -> Self {
        MixId(value)
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.mix_id, self.stage_index)
    }
}

impl FromStr for EntityKey {
    type Err = DomainError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (mix, idx) = s
            .rsplit_once(':')
            .ok_or_else(|| DomainError::BadEntityKey(s.to_string()))?;
        if mix.is_empty() {
            return Err(DomainError::BadEntityKey(s.to_string()));
        }
        let stage_index = idx
            .parse()
            .map_err(|_| DomainError::BadEntityKey(s.to_string()))?;
        Ok(EntityKey::new(mix, stage_index))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub name: String,
    pub duration_ms: u64,
}

impl Stage {
    pub fn new(name: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            name: name.into(),
            duration_ms,
        }
    }
}

/// Display metadata shared by mixes and templates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MixMetadata {
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub batch_number: Option<String>,
}

impl MixMetadata {
    /// Explicit colour if set, otherwise the category colour.
    pub fn effective_color(&self) -> &str {
        match self.color.as_deref().map(str::trim) {
            Some(c) if !c.is_empty() => c,
            _ => category_color(self.category.as_deref()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl Owner {
    pub fn label(&self) -> &str {
        match self.display_name.as_deref() {
            Some(n) if !n.trim().is_empty() => n,
            _ => &self.email,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mix {
    pub id: MixId,
    pub name: String,
    pub stages: Vec<Stage>,
    pub current_stage_index: usize,
    pub current_stage_started_at_ms: i64,
    pub owner: Owner,
    pub created_at_ms: i64,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub metadata: MixMetadata,
}

impl Mix {
    pub fn current_stage(&self) -> Option<&Stage> {
        self.stages.get(self.current_stage_index)
    }

    /// `current_stage_started_at_ms + stages[current].duration_ms`.
    pub fn current_deadline_ms(&self) -> Option<i64> {
        let stage = self.current_stage()?;
        let duration = i64::try_from(stage.duration_ms).unwrap_or(i64::MAX);
        Some(self.current_stage_started_at_ms.saturating_add(duration))
    }

    pub fn is_on_final_stage(&self) -> bool {
        !self.stages.is_empty() && self.current_stage_index == self.stages.len() - 1
    }

    pub fn entity_key(&self) -> EntityKey {
        EntityKey::new(self.id.clone(), self.current_stage_index)
    }

    /// Moves to the next stage, stamping `now_ms` as its start.
    ///
    /// `from_index` is the index the caller observed; a mismatch means someone
    /// else advanced the mix in the meantime and the request is rejected so the
    /// index only ever moves one step at a time.
    pub fn advance(&mut self, from_index: usize, now_ms: i64) -> Result<(), DomainError> {
        if from_index != self.current_stage_index {
            return Err(DomainError::StaleStage {
                expected: from_index,
                actual: self.current_stage_index,
            });
        }
        if self.current_stage_index + 1 >= self.stages.len() {
            return Err(DomainError::FinalStage);
        }
        self.current_stage_index += 1;
        self.current_stage_started_at_ms = now_ms;
        Ok(())
    }

    /// Replaces the stage list wholesale. The current index must stay valid.
    pub fn replace_stages(&mut self, stages: Vec<Stage>) -> Result<(), DomainError> {
        validate_stages(&stages)?;
        if self.current_stage_index >= stages.len() {
            return Err(DomainError::StageListTooShort {
                current: self.current_stage_index,
                len: stages.len(),
            });
        }
        self.stages = stages;
        Ok(())
    }

    pub fn color(&self) -> &str {
        self.metadata.effective_color()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MixTemplate {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub stages: Vec<Stage>,
    #[serde(default)]
    pub metadata: MixMetadata,
    pub created_at_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl UserProfile {
    pub fn as_owner(&self) -> Owner {
        Owner {
            id: self.id.clone(),
            email: self.email.clone(),
            display_name: self.display_name.clone(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("mix name must not be blank")]
    BlankName,
    #[error("a mix needs at least one stage")]
    EmptyStages,
    #[error("stage {index} has an empty name")]
    BlankStageName { index: usize },
    #[error("stage {index} must have a positive duration")]
    ZeroDuration { index: usize },
    #[error("stage moved on: expected index {expected}, mix is at {actual}")]
    StaleStage { expected: usize, actual: usize },
    #[error("mix is already on its final stage")]
    FinalStage,
    #[error("stage list of length {len} does not contain current stage {current}")]
    StageListTooShort { current: usize, len: usize },
    #[error("malformed entity key `{0}`")]
    BadEntityKey(String),
}

pub fn validate_name(name: &str) -> Result<(), DomainError> {
    if name.trim().is_empty() {
        return Err(DomainError::BlankName);
    }
    Ok(())
}

pub fn validate_stages(stages: &[Stage]) -> Result<(), DomainError> {
    if stages.is_empty() {
        return Err(DomainError::EmptyStages);
    }
    for (index, stage) in stages.iter().enumerate() {
        if stage.name.trim().is_empty() {
            return Err(DomainError::BlankStageName { index });
        }
        if stage.duration_ms == 0 {
            return Err(DomainError::ZeroDuration { index });
        }
    }
    Ok(())
}

/// Stable palette colour for a category name.
///
/// Hashes the trimmed, lowercased name with the classic `h * 31 + c` string
/// hash (shift arithmetic wraps at 32 bits, accumulation does not) so the
/// colour matches what browser clients compute for the same category.
pub fn category_color(category: Option<&str>) -> &'static str {
    let key = match category.map(str::trim) {
        Some(k) if !k.is_empty() => k.to_lowercase(),
        _ => return DEFAULT_COLOR,
    };
    let mut hash: f64 = 0.0;
    for unit in key.encode_utf16() {
        let shifted = ((hash as i64) as i32).wrapping_shl(5);
        hash = f64::from(unit) + (f64::from(shifted) - hash);
    }
    let idx = (hash.abs() % CATEGORY_PALETTE.len() as f64) as usize;
    CATEGORY_PALETTE[idx]
}

/// Wall-clock milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> Owner {
        Owner {
            id: "u1".into(),
            email: "ann@example.com".into(),
            display_name: None,
        }
    }

    fn mix(stages: &[(&str, u64)]) -> Mix {
        Mix {
            id: MixId::from("m1"),
            name: "Batch A".into(),
            stages: stages.iter().map(|(n, d)| Stage::new(*n, *d)).collect(),
            current_stage_index: 0,
            current_stage_started_at_ms: 1_000,
            owner: owner(),
            created_at_ms: 1_000,
            is_deleted: false,
            metadata: MixMetadata::default(),
        }
    }

    #[test]
    fn entity_keys_are_distinct_per_stage_and_parse_back() {
        let a = EntityKey::new("mix-1", 0);
        let b = EntityKey::new("mix-1", 1);
        assert_ne!(a, b);
        assert_ne!(a.to_string(), b.to_string());
        assert_eq!(a.to_string(), "mix-1:0");
        assert_eq!("mix-1:1".parse::<EntityKey>().unwrap(), b);
        assert_eq!(
            "a:b:3".parse::<EntityKey>().unwrap(),
            EntityKey::new("a:b", 3)
        );
        assert!("nocolon".parse::<EntityKey>().is_err());
        assert!(":4".parse::<EntityKey>().is_err());
        assert!("m:x".parse::<EntityKey>().is_err());
    }

    #[test]
    fn deadline_follows_current_stage() {
        let mut m = mix(&[("Powder 1", 30_000), ("Powder 2", 60_000)]);
        assert_eq!(m.current_deadline_ms(), Some(31_000));
        m.advance(0, 50_000).unwrap();
        assert_eq!(m.current_stage_index, 1);
        assert_eq!(m.current_deadline_ms(), Some(110_000));
        assert!(m.is_on_final_stage());
    }

    #[test]
    fn advance_moves_one_step_and_stops_at_final_stage() {
        let mut m = mix(&[("a", 1), ("b", 1)]);
        assert_eq!(
            m.advance(1, 5),
            Err(DomainError::StaleStage {
                expected: 1,
                actual: 0
            })
        );
        m.advance(0, 5).unwrap();
        assert_eq!(m.advance(1, 6), Err(DomainError::FinalStage));
        assert_eq!(m.current_stage_index, 1);
        assert_eq!(m.current_stage_started_at_ms, 5);
    }

    #[test]
    fn replacing_stages_keeps_current_index_valid() {
        let mut m = mix(&[("a", 1), ("b", 1), ("c", 1)]);
        m.advance(0, 2).unwrap();
        m.advance(1, 3).unwrap();
        assert_eq!(
            m.replace_stages(vec![Stage::new("x", 5), Stage::new("y", 5)]),
            Err(DomainError::StageListTooShort { current: 2, len: 2 })
        );
        assert_eq!(
            m.replace_stages(vec![]),
            Err(DomainError::EmptyStages)
        );
        m.replace_stages(vec![Stage::new("x", 5), Stage::new("y", 5), Stage::new("z", 5)])
            .unwrap();
        assert_eq!(m.current_stage().unwrap().name, "z");
    }

    #[test]
    fn stage_validation() {
        assert_eq!(validate_stages(&[]), Err(DomainError::EmptyStages));
        assert_eq!(
            validate_stages(&[Stage::new("a", 1), Stage::new("b", 0)]),
            Err(DomainError::ZeroDuration { index: 1 })
        );
        assert_eq!(
            validate_stages(&[Stage::new("  ", 1)]),
            Err(DomainError::BlankStageName { index: 0 })
        );
        assert!(validate_name(" ").is_err());
    }

    #[test]
    fn category_colors_are_stable() {
        assert_eq!(category_color(None), DEFAULT_COLOR);
        assert_eq!(category_color(Some("   ")), DEFAULT_COLOR);
        assert_eq!(category_color(Some("a")), "#f97316");
        assert_eq!(category_color(Some("Powder")), "#22d3ee");
        assert_eq!(category_color(Some(" powder ")), "#22d3ee");
        assert_eq!(category_color(Some("Liquid")), "#84cc16");
        // accumulator leaves the 32-bit range here
        assert_eq!(category_color(Some("Base coat")), "#10b981");
    }

    #[test]
    fn explicit_color_wins_over_category() {
        let meta = MixMetadata {
            category: Some("Powder".into()),
            color: Some("#123456".into()),
            ..Default::default()
        };
        assert_eq!(meta.effective_color(), "#123456");
        let meta = MixMetadata {
            category: Some("Powder".into()),
            color: Some(" ".into()),
            ..Default::default()
        };
        assert_eq!(meta.effective_color(), "#22d3ee");
    }

    #[test]
    fn owner_label_prefers_display_name() {
        let mut o = owner();
        assert_eq!(o.label(), "ann@example.com");
        o.display_name = Some("Ann".into());
        assert_eq!(o.label(), "Ann");
    }
}
