use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use tracing::info;

use crate::api_connection::connection::{FoodApi, ServiceError, UserAction};
use crate::api_connection::endpoints::{
    FoodOption, User, ALLERGENS_PATH, FOOD_PREFERENCES_PATH, PROFILE_PATH,
};
use crate::models::FoodRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    pub fn code(self) -> &'static str {
        match self {
            Gender::Male => "M",
            Gender::Female => "F",
        }
    }
}

impl FromStr for Gender {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "m" | "male" => Ok(Gender::Male),
            "f" | "female" => Ok(Gender::Female),
            other => Err(format!("unknown gender '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityLevel {
    Low,
    Light,
    Active,
    VeryActive,
}

impl ActivityLevel {
    pub fn code(self) -> &'static str {
        match self {
            ActivityLevel::Low => "low",
            ActivityLevel::Light => "light",
            ActivityLevel::Active => "active",
            ActivityLevel::VeryActive => "very_active",
        }
    }
}

impl FromStr for ActivityLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "low" => Ok(ActivityLevel::Low),
            "light" => Ok(ActivityLevel::Light),
            "active" => Ok(ActivityLevel::Active),
            "very_active" => Ok(ActivityLevel::VeryActive),
            other => Err(format!("unknown activity level '{}'", other)),
        }
    }
}

impl fmt::Display for ActivityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// The backend sends `""` for unset choice fields.
fn blank_as_none<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: fmt::Display,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => value.parse::<T>().map(Some).map_err(serde::de::Error::custom),
    }
}

fn gender_code<S: Serializer>(gender: &Option<Gender>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(gender.map(Gender::code).unwrap_or(""))
}

fn activity_code<S: Serializer>(
    level: &Option<ActivityLevel>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(level.map(ActivityLevel::code).unwrap_or(""))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allergen {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Preference {
    Like,
    Dislike,
}

impl FromStr for Preference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "like" => Ok(Preference::Like),
            "dislike" => Ok(Preference::Dislike),
            other => Err(format!("unknown preference '{}' (expected like or dislike)", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FoodPreference {
    pub food: FoodRef,
    pub preference: Preference,
    /// Set by the backend on upsert: true when the preference is new.
    #[serde(default)]
    pub created: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
struct PreferenceRequest {
    food_id: i64,
    preference: Preference,
}

#[derive(Debug, Clone, Serialize)]
struct NewAllergen<'a> {
    name: &'a str,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub user: Option<User>,
    #[serde(default)]
    pub recommended_kcal: Option<f64>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub gender: Option<Gender>,
    #[serde(default)]
    pub height_cm: Option<f64>,
    #[serde(default)]
    pub weight_kg: Option<f64>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub birth_date: Option<NaiveDate>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub activity_level: Option<ActivityLevel>,
    #[serde(default)]
    pub is_vegetarian: bool,
    #[serde(default)]
    pub is_vegan: bool,
    #[serde(default)]
    pub allergies: Vec<Allergen>,
    #[serde(default)]
    pub food_preferences: Vec<FoodPreference>,
}

/// Body of `PUT /profile/`. Allergies travel as ids.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProfileUpdate {
    #[serde(serialize_with = "gender_code")]
    pub gender: Option<Gender>,
    pub height_cm: Option<f64>,
    pub weight_kg: Option<f64>,
    pub birth_date: Option<NaiveDate>,
    #[serde(serialize_with = "activity_code")]
    pub activity_level: Option<ActivityLevel>,
    pub is_vegetarian: bool,
    pub is_vegan: bool,
    pub allergy_ids: Vec<i64>,
}

impl ProfileUpdate {
    pub fn from_profile(profile: &Profile) -> Self {
        Self {
            gender: profile.gender,
            height_cm: profile.height_cm,
            weight_kg: profile.weight_kg,
            birth_date: profile.birth_date,
            activity_level: profile.activity_level,
            is_vegetarian: profile.is_vegetarian,
            is_vegan: profile.is_vegan,
            allergy_ids: profile.allergies.iter().map(|a| a.id).collect(),
        }
    }

    /// Adds the allergen if absent, removes it if present.
    pub fn toggle_allergy(&mut self, allergen_id: i64) {
        if let Some(pos) = self.allergy_ids.iter().position(|id| *id == allergen_id) {
            self.allergy_ids.remove(pos);
        } else {
            self.allergy_ids.push(allergen_id);
        }
    }
}

pub async fn fetch_profile(api: &FoodApi) -> Result<Profile, ServiceError> {
    api.get_json(PROFILE_PATH, &[])
        .await
        .map_err(|e| ServiceError::from_api(UserAction::LoadProfile, e))
}

pub async fn update_profile(
    api: &FoodApi,
    update: &ProfileUpdate,
) -> Result<Profile, ServiceError> {
    if let Some(height) = update.height_cm {
        if !(height > 0.0) {
            return Err(ServiceError::precondition(
                UserAction::SaveProfile,
                "Height must be a positive number of centimetres.",
            ));
        }
    }
    if let Some(weight) = update.weight_kg {
        if !(weight > 0.0) {
            return Err(ServiceError::precondition(
                UserAction::SaveProfile,
                "Weight must be a positive number of kilograms.",
            ));
        }
    }

    let profile: Profile = api
        .put_json(PROFILE_PATH, update)
        .await
        .map_err(|e| ServiceError::from_api(UserAction::SaveProfile, e))?;
    info!(recommended_kcal = ?profile.recommended_kcal, "profile saved");
    Ok(profile)
}

pub async fn list_allergens(api: &FoodApi) -> Result<Vec<Allergen>, ServiceError> {
    api.get_json(ALLERGENS_PATH, &[])
        .await
        .map_err(|e| ServiceError::from_api(UserAction::ManageAllergens, e))
}

pub async fn add_allergen(api: &FoodApi, name: &str) -> Result<Allergen, ServiceError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ServiceError::precondition(
            UserAction::ManageAllergens,
            "Enter an allergen name.",
        ));
    }
    api.post_json(ALLERGENS_PATH, &NewAllergen { name })
        .await
        .map_err(|e| ServiceError::from_api(UserAction::ManageAllergens, e))
}

pub async fn delete_allergen(api: &FoodApi, allergen_id: i64) -> Result<(), ServiceError> {
    api.delete(&format!("{}{}/", ALLERGENS_PATH, allergen_id))
        .await
        .map_err(|e| ServiceError::from_api(UserAction::ManageAllergens, e))
}

pub async fn list_food_preferences(api: &FoodApi) -> Result<Vec<FoodPreference>, ServiceError> {
    api.get_json(FOOD_PREFERENCES_PATH, &[])
        .await
        .map_err(|e| ServiceError::from_api(UserAction::ManagePreferences, e))
}

pub async fn set_food_preference(
    api: &FoodApi,
    food_id: i64,
    preference: Preference,
) -> Result<FoodPreference, ServiceError> {
    api.post_json(
        FOOD_PREFERENCES_PATH,
        &PreferenceRequest {
            food_id,
            preference,
        },
    )
    .await
    .map_err(|e| ServiceError::from_api(UserAction::ManagePreferences, e))
}

pub async fn delete_food_preference(api: &FoodApi, food_id: i64) -> Result<(), ServiceError> {
    api.delete(&format!("{}{}/", FOOD_PREFERENCES_PATH, food_id))
        .await
        .map_err(|e| ServiceError::from_api(UserAction::ManagePreferences, e))
}

/// A blank term returns no results without asking the backend.
pub async fn search_foods(api: &FoodApi, term: &str) -> Result<Vec<FoodOption>, ServiceError> {
    let term = term.trim();
    if term.is_empty() {
        return Ok(Vec::new());
    }
    api.search_foods(term)
        .await
        .map_err(|e| ServiceError::from_api(UserAction::SearchFood, e))
}

/// Replaces the entry for the same food, or appends.
pub fn upsert_preference(preferences: &mut Vec<FoodPreference>, updated: FoodPreference) {
    match preferences
        .iter_mut()
        .find(|existing| existing.food.id == updated.food.id)
    {
        Some(existing) => *existing = updated,
        None => preferences.push(updated),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_profile_blank_fields_become_none() {
        let profile: Profile = serde_json::from_value(json!({
            "gender": "",
            "height_cm": null,
            "birth_date": "",
            "activity_level": "very_active",
            "is_vegetarian": true,
            "allergies": [{"id": 1, "name": "peanut"}]
        }))
        .unwrap();
        assert_eq!(profile.gender, None);
        assert_eq!(profile.birth_date, None);
        assert_eq!(profile.activity_level, Some(ActivityLevel::VeryActive));
        assert!(profile.is_vegetarian);
        assert_eq!(profile.allergies[0].name, "peanut");
        assert_eq!(profile.recommended_kcal, None);
    }

    #[test]
    fn test_profile_update_wire_format() {
        let profile: Profile = serde_json::from_value(json!({
            "gender": "F",
            "height_cm": 165.0,
            "weight_kg": 55.0,
            "birth_date": "1995-03-02",
            "activity_level": "",
            "allergies": [{"id": 3, "name": "egg"}, {"id": 5, "name": "milk"}]
        }))
        .unwrap();
        let mut update = ProfileUpdate::from_profile(&profile);
        update.toggle_allergy(5);
        update.toggle_allergy(9);

        let value = serde_json::to_value(&update).unwrap();
        assert_eq!(value["gender"], json!("F"));
        assert_eq!(value["activity_level"], json!(""));
        assert_eq!(value["birth_date"], json!("1995-03-02"));
        assert_eq!(value["allergy_ids"], json!([3, 9]));
        assert!(value.get("allergies").is_none());
    }

    #[test]
    fn test_preference_wire_names() {
        assert_eq!(serde_json::to_value(Preference::Dislike).unwrap(), json!("DISLIKE"));
        assert_eq!("like".parse::<Preference>(), Ok(Preference::Like));
    }

    #[test]
    fn test_upsert_preference_replaces_same_food() {
        let food = FoodRef {
            id: 8,
            representative_name: "Tteokbokki".to_string(),
            food_class: String::new(),
        };
        let mut prefs = vec![FoodPreference {
            food: food.clone(),
            preference: Preference::Like,
            created: Some(true),
        }];
        upsert_preference(
            &mut prefs,
            FoodPreference {
                food,
                preference: Preference::Dislike,
                created: Some(false),
            },
        );
        assert_eq!(prefs.len(), 1);
        assert_eq!(prefs[0].preference, Preference::Dislike);
    }
}
