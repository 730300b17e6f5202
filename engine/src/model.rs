//! Entity types for the workout log.
//!
//! Every entity carries a client-generated id that doubles as its remote
//! document key, plus a local-only `isSynced` flag.

use crate::{EntityId, Timestamp};
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Generate a fresh, globally unique entity id.
pub fn new_id() -> EntityId {
    uuid::Uuid::new_v4().to_string()
}

/// Current wall-clock time in milliseconds since the epoch.
pub fn now_millis() -> Timestamp {
    chrono::Utc::now().timestamp_millis()
}

/// The local collections holding entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Collection {
    Exercises,
    Workouts,
    WeightEntries,
}

impl Collection {
    /// Every entity collection.
    pub const ALL: [Collection; 3] = [
        Collection::Exercises,
        Collection::Workouts,
        Collection::WeightEntries,
    ];

    /// Logical collection name.
    pub fn name(&self) -> &'static str {
        match self {
            Collection::Exercises => "exercises",
            Collection::Workouts => "workouts",
            Collection::WeightEntries => "weightEntries",
        }
    }

    /// SQLite table backing this collection.
    pub fn table(&self) -> &'static str {
        match self {
            Collection::Exercises => "exercises",
            Collection::Workouts => "workouts",
            Collection::WeightEntries => "weight_entries",
        }
    }

    /// Sort keys materialized as columns for this collection.
    pub fn sort_keys(&self) -> &'static [SortKey] {
        match self {
            Collection::Exercises => &[SortKey::Name, SortKey::UpdatedAt],
            Collection::Workouts | Collection::WeightEntries => {
                &[SortKey::Date, SortKey::CreatedAt]
            }
        }
    }

    /// Whether records can be ordered by `key`.
    pub fn supports(&self, key: SortKey) -> bool {
        self.sort_keys().contains(&key)
    }

    /// Remote document path for this collection.
    ///
    /// The exercise catalog is global; everything else lives under the user.
    pub fn remote_path(&self, user_id: &str) -> String {
        match self {
            Collection::Exercises => "global-exercises".to_string(),
            Collection::Workouts => format!("users/{}/workouts", user_id),
            Collection::WeightEntries => format!("users/{}/weightEntries", user_id),
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A field records can be ordered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortKey {
    Name,
    Date,
    CreatedAt,
    UpdatedAt,
}

impl SortKey {
    /// Column name in the local store.
    pub fn column(&self) -> &'static str {
        match self {
            SortKey::Name => "name",
            SortKey::Date => "date",
            SortKey::CreatedAt => "created_at",
            SortKey::UpdatedAt => "updated_at",
        }
    }

    /// Field name in the JSON representation (local and remote).
    pub fn field(&self) -> &'static str {
        match self {
            SortKey::Name => "name",
            SortKey::Date => "date",
            SortKey::CreatedAt => "createdAt",
            SortKey::UpdatedAt => "updatedAt",
        }
    }
}

/// A materialized sort-key value.
#[derive(Debug, Clone, PartialEq)]
pub enum SortValue {
    Text(String),
    Int(i64),
}

/// Something that lives in a local collection and syncs to a remote one.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + Unpin + 'static {
    /// Collection this entity type is stored in.
    const COLLECTION: Collection;

    fn id(&self) -> &str;

    fn is_synced(&self) -> bool;

    fn set_synced(&mut self, synced: bool);

    /// Value of a sort key, if this entity type has it.
    fn sort_value(&self, key: SortKey) -> Option<SortValue>;

    /// Document body sent to the remote store: no `id`, no `isSynced`.
    fn to_remote(&self) -> crate::Result<Value> {
        let mut value = serde_json::to_value(self)?;
        if let Value::Object(map) = &mut value {
            map.remove("id");
            map.remove("isSynced");
        }
        Ok(value)
    }

    /// Rebuild a confirmed entity from a remote document.
    fn from_remote(id: &str, data: &Value) -> crate::Result<Self> {
        let mut value = data.clone();
        match &mut value {
            Value::Object(map) => {
                map.insert("id".to_string(), Value::String(id.to_string()));
                map.insert("isSynced".to_string(), Value::Bool(true));
            }
            _ => {
                return Err(crate::Error::Serialization(serde::de::Error::custom(
                    "remote document is not an object",
                )))
            }
        }
        Ok(serde_json::from_value(value)?)
    }
}

/// Multiplier applied when computing exercise volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Coefficient {
    #[default]
    X1,
    X2,
    /// Assisted exercise; volume derives from body weight.
    Gravitron,
}

/// Unit a set's weight was entered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeightUnit {
    #[default]
    Kg,
    Lb,
}

/// An exercise in the shared catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Exercise {
    pub id: EntityId,
    pub name: String,
    #[serde(default)]
    pub coefficient: Coefficient,
    #[serde(default)]
    pub is_synced: bool,
    #[serde(default)]
    pub updated_at: Timestamp,
}

impl Exercise {
    /// Create a new, unsynced exercise with a fresh id.
    pub fn new(name: impl Into<String>, coefficient: Coefficient) -> Self {
        Self {
            id: new_id(),
            name: name.into(),
            coefficient,
            is_synced: false,
            updated_at: now_millis(),
        }
    }
}

impl Entity for Exercise {
    const COLLECTION: Collection = Collection::Exercises;

    fn id(&self) -> &str {
        &self.id
    }

    fn is_synced(&self) -> bool {
        self.is_synced
    }

    fn set_synced(&mut self, synced: bool) {
        self.is_synced = synced;
    }

    fn sort_value(&self, key: SortKey) -> Option<SortValue> {
        match key {
            SortKey::Name => Some(SortValue::Text(self.name.clone())),
            SortKey::UpdatedAt => Some(SortValue::Int(self.updated_at)),
            _ => None,
        }
    }
}

/// One set of an exercise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Set {
    pub id: EntityId,
    pub reps: u32,
    pub weight: f64,
}

impl Set {
    pub fn new(reps: u32, weight: f64) -> Self {
        Self {
            id: new_id(),
            reps,
            weight,
        }
    }
}

/// An exercise as performed within a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkoutExercise {
    pub id: EntityId,
    /// Reference into the exercise catalog.
    pub exercise_id: EntityId,
    #[serde(default)]
    pub sets: Vec<Set>,
    #[serde(default)]
    pub weight_unit: WeightUnit,
}

impl WorkoutExercise {
    pub fn new(exercise_id: impl Into<EntityId>, sets: Vec<Set>, weight_unit: WeightUnit) -> Self {
        Self {
            id: new_id(),
            exercise_id: exercise_id.into(),
            sets,
            weight_unit,
        }
    }
}

/// A workout on a given day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkoutSession {
    pub id: EntityId,
    pub date: NaiveDate,
    #[serde(default)]
    pub exercises: Vec<WorkoutExercise>,
    #[serde(default)]
    pub is_synced: bool,
    #[serde(default)]
    pub created_at: Timestamp,
}

impl WorkoutSession {
    /// Create a new, unsynced session with a fresh id.
    pub fn new(date: NaiveDate, exercises: Vec<WorkoutExercise>) -> Self {
        Self {
            id: new_id(),
            date,
            exercises,
            is_synced: false,
            created_at: now_millis(),
        }
    }
}

impl Entity for WorkoutSession {
    const COLLECTION: Collection = Collection::Workouts;

    fn id(&self) -> &str {
        &self.id
    }

    fn is_synced(&self) -> bool {
        self.is_synced
    }

    fn set_synced(&mut self, synced: bool) {
        self.is_synced = synced;
    }

    fn sort_value(&self, key: SortKey) -> Option<SortValue> {
        match key {
            SortKey::Date => Some(SortValue::Text(self.date.to_string())),
            SortKey::CreatedAt => Some(SortValue::Int(self.created_at)),
            _ => None,
        }
    }
}

/// A body-weight measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightEntry {
    pub id: EntityId,
    pub date: NaiveDate,
    pub weight: f64,
    #[serde(default)]
    pub is_synced: bool,
    #[serde(default)]
    pub created_at: Timestamp,
}

impl WeightEntry {
    pub fn new(date: NaiveDate, weight: f64) -> Self {
        Self {
            id: new_id(),
            date,
            weight,
            is_synced: false,
            created_at: now_millis(),
        }
    }
}

impl Entity for WeightEntry {
    const COLLECTION: Collection = Collection::WeightEntries;

    fn id(&self) -> &str {
        &self.id
    }

    fn is_synced(&self) -> bool {
        self.is_synced
    }

    fn set_synced(&mut self, synced: bool) {
        self.is_synced = synced;
    }

    fn sort_value(&self, key: SortKey) -> Option<SortValue> {
        match key {
            SortKey::Date => Some(SortValue::Text(self.date.to_string())),
            SortKey::CreatedAt => Some(SortValue::Int(self.created_at)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn day(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn new_entities_are_unsynced_with_distinct_ids() {
        let a = Exercise::new("Squat", Coefficient::X1);
        let b = Exercise::new("Squat", Coefficient::X1);

        assert!(!a.is_synced);
        assert_ne!(a.id, b.id);
        assert!(a.updated_at > 0);
    }

    #[test]
    fn workout_serializes_camel_case() {
        let mut workout = WorkoutSession::new(
            day("2024-01-01"),
            vec![WorkoutExercise::new(
                "ex-1",
                vec![Set::new(5, 100.0)],
                WeightUnit::Lb,
            )],
        );
        workout.id = "w-1".into();
        workout.created_at = 1704067200000;

        let value = serde_json::to_value(&workout).unwrap();
        assert_eq!(value["date"], "2024-01-01");
        assert_eq!(value["isSynced"], false);
        assert_eq!(value["createdAt"], 1704067200000i64);
        assert_eq!(value["exercises"][0]["exerciseId"], "ex-1");
        assert_eq!(value["exercises"][0]["weightUnit"], "lb");
        assert_eq!(value["exercises"][0]["sets"][0]["reps"], 5);
    }

    #[test]
    fn coefficient_wire_names() {
        assert_eq!(serde_json::to_value(Coefficient::X1).unwrap(), "x1");
        assert_eq!(serde_json::to_value(Coefficient::X2).unwrap(), "x2");
        assert_eq!(
            serde_json::to_value(Coefficient::Gravitron).unwrap(),
            "gravitron"
        );
    }

    #[test]
    fn remote_body_strips_local_fields() {
        let exercise = Exercise::new("Deadlift", Coefficient::X2);
        let body = exercise.to_remote().unwrap();

        assert!(body.get("id").is_none());
        assert!(body.get("isSynced").is_none());
        assert_eq!(body["name"], "Deadlift");
        assert_eq!(body["coefficient"], "x2");
    }

    #[test]
    fn from_remote_marks_synced() {
        let data = json!({"date": "2024-02-03", "weight": 81.5, "createdAt": 10});
        let entry = WeightEntry::from_remote("we-1", &data).unwrap();

        assert_eq!(entry.id, "we-1");
        assert!(entry.is_synced);
        assert_eq!(entry.weight, 81.5);
        assert_eq!(entry.date, day("2024-02-03"));
    }

    #[test]
    fn from_remote_tolerates_missing_optional_fields() {
        // Catalog documents seeded by older clients carry only a name.
        let exercise = Exercise::from_remote("ex-9", &json!({"name": "Bench Press"})).unwrap();
        assert_eq!(exercise.coefficient, Coefficient::X1);
        assert_eq!(exercise.updated_at, 0);
    }

    #[test]
    fn from_remote_rejects_non_objects() {
        assert!(Exercise::from_remote("ex-1", &json!("nope")).is_err());
    }

    #[test]
    fn collection_sort_keys() {
        assert!(Collection::Workouts.supports(SortKey::Date));
        assert!(!Collection::Exercises.supports(SortKey::Date));
        assert_eq!(
            Collection::Workouts.remote_path("u1"),
            "users/u1/workouts"
        );
        assert_eq!(Collection::Exercises.remote_path("u1"), "global-exercises");
    }
}
