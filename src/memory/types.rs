// src/memory/types.rs
// Domain types for the layered memory store: layer/enum vocabularies,
// tri-state patches for partial updates, row structs, and operation params.
//
// Row structs never carry embedding vectors; vectors stay in the database
// and are written through the dedicated vector-update operations.

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use strum::{AsRefStr, Display, EnumString};

/// Current timestamp in the TEXT format the schema stores.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

// ---------------------------------------------------------------------------
// Enum vocabularies
// ---------------------------------------------------------------------------

/// Which extension table a base record belongs to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, AsRefStr, Display,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MemoryLayer {
    Identity,
    Preference,
    Experience,
    Context,
}

/// Relationship of an identity entry to the user. Free-form input is
/// normalized (trim + lowercase); anything outside the vocabulary becomes
/// NULL rather than an error.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, AsRefStr, Display,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Relationship {
    #[strum(serialize = "self")]
    #[serde(rename = "self")]
    SelfRelation,
    Family,
    Father,
    Mother,
    Sibling,
    Spouse,
    Child,
    Friend,
    Colleague,
    Mentor,
    Other,
}

impl Relationship {
    /// Normalize free-form input. Unknown values map to None, never an error.
    pub fn normalize(input: &str) -> Option<Self> {
        input.trim().to_lowercase().parse().ok()
    }
}

/// Category of an identity entry. Same normalization contract as
/// [`Relationship`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, AsRefStr, Display,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum IdentityType {
    Personal,
    Professional,
    Demographic,
}

impl IdentityType {
    pub fn normalize(input: &str) -> Option<Self> {
        input.trim().to_lowercase().parse().ok()
    }
}

/// How an identity update treats fields absent from the payload.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    EnumString,
    AsRefStr,
    Display,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MergeStrategy {
    /// Only supplied fields change.
    #[default]
    Merge,
    /// Every identity field not supplied is reset to NULL.
    Replace,
}

// ---------------------------------------------------------------------------
// Tri-state patch
// ---------------------------------------------------------------------------

/// Distinguishes "leave the field alone" from "set it to NULL" in partial
/// updates. An absent JSON field deserializes to `Keep` (via
/// `#[serde(default)]`), an explicit `null` to `Clear`, a value to `Set`.
#[derive(Debug, Clone, PartialEq)]
pub enum Patch<T> {
    Keep,
    Clear,
    Set(T),
}

impl<T> Default for Patch<T> {
    fn default() -> Self {
        Patch::Keep
    }
}

impl<T> Patch<T> {
    pub fn is_keep(&self) -> bool {
        matches!(self, Patch::Keep)
    }

    /// Resolve against the current value: `Keep` preserves it, `Clear` drops
    /// it, `Set` replaces it.
    pub fn apply(self, current: Option<T>) -> Option<T> {
        match self {
            Patch::Keep => current,
            Patch::Clear => None,
            Patch::Set(v) => Some(v),
        }
    }
}

impl<T> From<Option<T>> for Patch<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => Patch::Set(v),
            None => Patch::Clear,
        }
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Patch<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Option::<T>::deserialize(deserializer)?.into())
    }
}

impl<T: Serialize> Serialize for Patch<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            // Keep is represented by omitting the field; callers pair this
            // with skip_serializing_if = "Patch::is_keep".
            Patch::Keep | Patch::Clear => serializer.serialize_none(),
            Patch::Set(v) => serializer.serialize_some(v),
        }
    }
}

// ---------------------------------------------------------------------------
// Row types (vectors excluded)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserMemory {
    pub id: i64,
    pub user_id: String,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub details: Option<String>,
    pub memory_layer: MemoryLayer,
    pub memory_type: Option<String>,
    pub memory_category: Option<String>,
    pub tags: Option<Vec<String>>,
    pub metadata: Option<serde_json::Value>,
    pub status: Option<String>,
    pub captured_at: Option<String>,
    pub accessed_at: Option<String>,
    pub accessed_count: i64,
    pub last_accessed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityMemory {
    pub id: i64,
    pub user_memory_id: i64,
    pub description: Option<String>,
    pub role: Option<String>,
    pub relationship: Option<Relationship>,
    #[serde(rename = "type")]
    pub identity_type: Option<IdentityType>,
    pub episodic_date: Option<String>,
    pub tags: Option<Vec<String>>,
    pub metadata: Option<serde_json::Value>,
    pub captured_at: Option<String>,
    pub accessed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperienceMemory {
    pub id: i64,
    pub user_memory_id: i64,
    pub situation: Option<String>,
    pub action: Option<String>,
    pub key_learning: Option<String>,
    pub reasoning: Option<String>,
    pub possible_outcome: Option<String>,
    pub score_confidence: Option<f64>,
    #[serde(rename = "type")]
    pub experience_type: Option<String>,
    pub tags: Option<Vec<String>>,
    pub metadata: Option<serde_json::Value>,
    pub captured_at: Option<String>,
    pub accessed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreferenceMemory {
    pub id: i64,
    pub user_memory_id: i64,
    pub conclusion_directives: Option<String>,
    pub suggestions: Option<Vec<String>>,
    pub score_priority: Option<f64>,
    #[serde(rename = "type")]
    pub preference_type: Option<String>,
    pub tags: Option<Vec<String>>,
    pub metadata: Option<serde_json::Value>,
    pub captured_at: Option<String>,
    pub accessed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextMemory {
    pub id: i64,
    pub user_memory_ids: Vec<i64>,
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub context_type: Option<String>,
    pub current_status: Option<String>,
    pub associated_subjects: Option<Vec<String>>,
    pub associated_objects: Option<Vec<String>>,
    pub score_impact: Option<f64>,
    pub score_urgency: Option<f64>,
    pub tags: Option<Vec<String>>,
    pub metadata: Option<serde_json::Value>,
    pub captured_at: Option<String>,
    pub accessed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// A row returned from blended search. `similarity` is populated only when
/// the query carried an embedding and the row has one too.
#[derive(Debug, Clone, Serialize)]
pub struct Scored<T> {
    pub similarity: Option<f64>,
    #[serde(flatten)]
    pub item: T,
}

// ---------------------------------------------------------------------------
// Operation params
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateMemoryParams {
    pub title: Option<String>,
    pub summary: Option<String>,
    pub details: Option<String>,
    pub memory_type: Option<String>,
    pub memory_category: Option<String>,
    pub tags: Option<Vec<String>>,
    pub metadata: Option<serde_json::Value>,
    pub status: Option<String>,
    pub captured_at: Option<String>,
    #[serde(skip)]
    pub summary_vector: Option<Vec<f32>>,
    #[serde(skip)]
    pub details_vector: Option<Vec<f32>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UserMemoryPatch {
    pub title: Patch<String>,
    pub summary: Patch<String>,
    pub details: Patch<String>,
    pub memory_type: Patch<String>,
    pub memory_category: Patch<String>,
    pub tags: Patch<Vec<String>>,
    pub metadata: Patch<serde_json::Value>,
    pub status: Patch<String>,
    pub captured_at: Patch<String>,
}

impl UserMemoryPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_keep()
            && self.summary.is_keep()
            && self.details.is_keep()
            && self.memory_type.is_keep()
            && self.memory_category.is_keep()
            && self.tags.is_keep()
            && self.metadata.is_keep()
            && self.status.is_keep()
            && self.captured_at.is_keep()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateIdentityParams {
    pub description: Option<String>,
    pub role: Option<String>,
    /// Free-form; normalized against [`Relationship`] at write time.
    pub relationship: Option<String>,
    /// Free-form; normalized against [`IdentityType`] at write time.
    #[serde(rename = "type")]
    pub identity_type: Option<String>,
    pub episodic_date: Option<String>,
    pub tags: Option<Vec<String>>,
    pub metadata: Option<serde_json::Value>,
    pub captured_at: Option<String>,
    #[serde(skip)]
    pub description_vector: Option<Vec<f32>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IdentityPatch {
    pub description: Patch<String>,
    pub role: Patch<String>,
    pub relationship: Patch<String>,
    #[serde(rename = "type")]
    pub identity_type: Patch<String>,
    pub episodic_date: Patch<String>,
    pub tags: Patch<Vec<String>>,
    pub metadata: Patch<serde_json::Value>,
    pub captured_at: Patch<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateExperienceParams {
    pub situation: Option<String>,
    pub action: Option<String>,
    pub key_learning: Option<String>,
    pub reasoning: Option<String>,
    pub possible_outcome: Option<String>,
    pub score_confidence: Option<f64>,
    #[serde(rename = "type")]
    pub experience_type: Option<String>,
    pub tags: Option<Vec<String>>,
    pub metadata: Option<serde_json::Value>,
    pub captured_at: Option<String>,
    #[serde(skip)]
    pub situation_vector: Option<Vec<f32>>,
    #[serde(skip)]
    pub action_vector: Option<Vec<f32>>,
    #[serde(skip)]
    pub key_learning_vector: Option<Vec<f32>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ExperiencePatch {
    pub situation: Patch<String>,
    pub action: Patch<String>,
    pub key_learning: Patch<String>,
    pub reasoning: Patch<String>,
    pub possible_outcome: Patch<String>,
    pub score_confidence: Patch<f64>,
    #[serde(rename = "type")]
    pub experience_type: Patch<String>,
    pub tags: Patch<Vec<String>>,
    pub metadata: Patch<serde_json::Value>,
    pub captured_at: Patch<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CreatePreferenceParams {
    pub conclusion_directives: Option<String>,
    pub suggestions: Option<Vec<String>>,
    pub score_priority: Option<f64>,
    #[serde(rename = "type")]
    pub preference_type: Option<String>,
    pub tags: Option<Vec<String>>,
    pub metadata: Option<serde_json::Value>,
    pub captured_at: Option<String>,
    #[serde(skip)]
    pub conclusion_directives_vector: Option<Vec<f32>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PreferencePatch {
    pub conclusion_directives: Patch<String>,
    pub suggestions: Patch<Vec<String>>,
    pub score_priority: Patch<f64>,
    #[serde(rename = "type")]
    pub preference_type: Patch<String>,
    pub tags: Patch<Vec<String>>,
    pub metadata: Patch<serde_json::Value>,
    pub captured_at: Patch<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateContextParams {
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub context_type: Option<String>,
    pub current_status: Option<String>,
    pub associated_subjects: Option<Vec<String>>,
    pub associated_objects: Option<Vec<String>>,
    pub score_impact: Option<f64>,
    pub score_urgency: Option<f64>,
    pub tags: Option<Vec<String>>,
    pub metadata: Option<serde_json::Value>,
    pub captured_at: Option<String>,
    #[serde(skip)]
    pub title_vector: Option<Vec<f32>>,
    #[serde(skip)]
    pub description_vector: Option<Vec<f32>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ContextPatch {
    pub title: Patch<String>,
    pub description: Patch<String>,
    #[serde(rename = "type")]
    pub context_type: Patch<String>,
    pub current_status: Patch<String>,
    pub associated_subjects: Patch<Vec<String>>,
    pub associated_objects: Patch<Vec<String>>,
    pub score_impact: Patch<f64>,
    pub score_urgency: Patch<f64>,
    pub tags: Patch<Vec<String>>,
    pub metadata: Patch<serde_json::Value>,
    pub captured_at: Patch<String>,
}

/// Vector updates for base rows. `Keep` leaves the column untouched so a
/// re-embed of one field never clears the other.
#[derive(Debug, Clone, Default)]
pub struct BaseVectorsPatch {
    pub summary_vector: Patch<Vec<f32>>,
    pub details_vector: Patch<Vec<f32>>,
}

#[derive(Debug, Clone, Default)]
pub struct IdentityVectorsPatch {
    pub description_vector: Patch<Vec<f32>>,
}

#[derive(Debug, Clone, Default)]
pub struct ExperienceVectorsPatch {
    pub situation_vector: Patch<Vec<f32>>,
    pub action_vector: Patch<Vec<f32>>,
    pub key_learning_vector: Patch<Vec<f32>>,
}

#[derive(Debug, Clone, Default)]
pub struct PreferenceVectorsPatch {
    pub conclusion_directives_vector: Patch<Vec<f32>>,
}

#[derive(Debug, Clone, Default)]
pub struct ContextVectorsPatch {
    pub title_vector: Patch<Vec<f32>>,
    pub description_vector: Patch<Vec<f32>>,
}

// ---------------------------------------------------------------------------
// Search params / results
// ---------------------------------------------------------------------------

/// Per-layer result budgets for blended search. A budget of zero (or less)
/// skips that layer entirely.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchLimits {
    pub contexts: i64,
    pub experiences: i64,
    pub preferences: i64,
}

impl Default for SearchLimits {
    fn default() -> Self {
        Self {
            contexts: 5,
            experiences: 5,
            preferences: 5,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    /// Query embedding. None falls back to recency ordering.
    pub embedding: Option<Vec<f32>>,
    pub limits: SearchLimits,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchResults {
    pub contexts: Vec<Scored<ContextMemory>>,
    pub experiences: Vec<Scored<ExperienceMemory>>,
    pub preferences: Vec<Scored<PreferenceMemory>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, AsRefStr)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

/// Sortable columns for paginated browsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, AsRefStr)]
#[serde(rename_all = "camelCase")]
pub enum MemorySort {
    #[strum(serialize = "created_at")]
    CreatedAt,
    #[strum(serialize = "updated_at")]
    UpdatedAt,
    #[strum(serialize = "captured_at")]
    CapturedAt,
    #[strum(serialize = "accessed_count")]
    AccessedCount,
    #[strum(serialize = "score_confidence")]
    ScoreConfidence,
    #[strum(serialize = "score_impact")]
    ScoreImpact,
    #[strum(serialize = "score_priority")]
    ScorePriority,
    #[strum(serialize = "score_urgency")]
    ScoreUrgency,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryMemoriesParams {
    pub layer: MemoryLayer,
    #[serde(default)]
    pub q: Option<String>,
    #[serde(default)]
    pub categories: Option<Vec<String>>,
    #[serde(default)]
    pub types: Option<Vec<String>>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub sort: Option<MemorySort>,
    #[serde(default)]
    pub order: Option<SortOrder>,
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
}

fn default_page() -> i64 {
    1
}

fn default_page_size() -> i64 {
    20
}

/// One page of base rows, joined with their layer details as raw JSON.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryPage {
    pub items: Vec<MemoryListItem>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryListItem {
    #[serde(flatten)]
    pub memory: UserMemory,
    /// Layer-specific columns for the row, keyed by column name.
    pub layer_detail: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TagCount {
    pub tag: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RoleCount {
    pub role: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct IdentityFacets {
    pub tags: Vec<TagCount>,
    pub roles: Vec<RoleCount>,
}

// ---------------------------------------------------------------------------
// SQL mapping helpers
// ---------------------------------------------------------------------------

/// Serialize an optional value to a JSON TEXT column.
pub fn json_to_sql<T: Serialize>(value: &Option<T>) -> Option<String> {
    value
        .as_ref()
        .and_then(|v| serde_json::to_string(v).ok())
}

/// Parse an optional JSON TEXT column, tolerating legacy malformed rows.
pub fn json_from_sql<T: DeserializeOwned>(text: Option<String>) -> Option<T> {
    text.and_then(|s| serde_json::from_str(&s).ok())
}

/// Parse an enum TEXT column; values outside the vocabulary read as None.
pub fn enum_from_sql<T: std::str::FromStr>(text: Option<String>) -> Option<T> {
    text.and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relationship_normalize() {
        assert_eq!(
            Relationship::normalize("  Self "),
            Some(Relationship::SelfRelation)
        );
        assert_eq!(Relationship::normalize("FRIEND"), Some(Relationship::Friend));
        assert_eq!(Relationship::normalize("nemesis"), None);
        assert_eq!(Relationship::normalize(""), None);
    }

    #[test]
    fn test_identity_type_normalize() {
        assert_eq!(
            IdentityType::normalize("Professional"),
            Some(IdentityType::Professional)
        );
        assert_eq!(IdentityType::normalize("cosmic"), None);
    }

    #[test]
    fn test_relationship_round_trip() {
        assert_eq!(Relationship::SelfRelation.as_ref(), "self");
        assert_eq!(
            serde_json::to_string(&Relationship::SelfRelation).unwrap(),
            "\"self\""
        );
    }

    #[test]
    fn test_merge_strategy_default() {
        assert_eq!(MergeStrategy::default(), MergeStrategy::Merge);
    }

    #[test]
    fn test_patch_deserialization_tri_state() {
        #[derive(Deserialize, Default)]
        #[serde(default)]
        struct P {
            title: Patch<String>,
        }

        let absent: P = serde_json::from_str("{}").unwrap();
        assert_eq!(absent.title, Patch::Keep);

        let null: P = serde_json::from_str(r#"{"title": null}"#).unwrap();
        assert_eq!(null.title, Patch::Clear);

        let set: P = serde_json::from_str(r#"{"title": "hi"}"#).unwrap();
        assert_eq!(set.title, Patch::Set("hi".to_string()));
    }

    #[test]
    fn test_patch_apply() {
        assert_eq!(Patch::<i32>::Keep.apply(Some(1)), Some(1));
        assert_eq!(Patch::<i32>::Clear.apply(Some(1)), None);
        assert_eq!(Patch::Set(2).apply(Some(1)), Some(2));
    }

    #[test]
    fn test_json_sql_round_trip() {
        let tags = Some(vec!["a".to_string(), "b".to_string()]);
        let text = json_to_sql(&tags);
        assert_eq!(text.as_deref(), Some(r#"["a","b"]"#));
        let back: Option<Vec<String>> = json_from_sql(text);
        assert_eq!(back, tags);
    }

    #[test]
    fn test_json_from_sql_tolerates_garbage() {
        let back: Option<Vec<String>> = json_from_sql(Some("not-json".to_string()));
        assert!(back.is_none());
    }
}
