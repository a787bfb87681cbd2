use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::meal_aggregator::Nutrition;
use crate::models::FoodRef;

pub const PROFILE_PATH: &str = "/profile/";
pub const LOGIN_PATH: &str = "/auth/login/";
pub const REGISTER_PATH: &str = "/auth/register/";
pub const LOGOUT_PATH: &str = "/auth/logout/";
pub const PREDICT_PATH: &str = "/predict/";
pub const FOOD_OPTIONS_PATH: &str = "/food-options/";
pub const CALC_NUTRITION_PATH: &str = "/calc-nutrition/";
pub const MEALS_PATH: &str = "/meals/";
pub const ALLERGENS_PATH: &str = "/allergens/";
pub const FOOD_PREFERENCES_PATH: &str = "/food-preferences/";
pub const RECOMMEND_MENU_PATH: &str = "/recommend-menu/";

pub const CSRF_COOKIE: &str = "csrftoken";
pub const CSRF_HEADER: &str = "X-CSRFToken";

// No skip_serializing_if here: users are also written to the bincode session file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// A concrete food a detection can resolve to. The per-100 g amounts are
/// informational; the authoritative numbers come from `/calc-nutrition/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoodOption {
    pub id: i64,
    pub representative_name: String,
    #[serde(default)]
    pub food_class: String,
    #[serde(default)]
    pub energy_kcal: Option<f64>,
    #[serde(default)]
    pub carbohydrate_g: Option<f64>,
    #[serde(default)]
    pub protein_g: Option<f64>,
    #[serde(default)]
    pub fat_g: Option<f64>,
}

impl From<&FoodRef> for FoodOption {
    fn from(food: &FoodRef) -> Self {
        Self {
            id: food.id,
            representative_name: food.representative_name.clone(),
            food_class: food.food_class.clone(),
            energy_kcal: None,
            carbohydrate_g: None,
            protein_g: None,
            fat_g: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DetectedFood {
    pub pred_class: String,
    #[serde(default)]
    pub food_options: Vec<FoodOption>,
}

/// `/predict/` answers in one of two shapes depending on the backend version.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum PredictResponse {
    MultiDetection {
        detected_foods: Vec<DetectedFood>,
    },
    SingleDetection {
        pred_class: String,
        #[serde(default)]
        food_options: Vec<FoodOption>,
    },
}

impl PredictResponse {
    pub fn into_detections(self) -> Vec<DetectedFood> {
        match self {
            PredictResponse::MultiDetection { detected_foods } => detected_foods,
            PredictResponse::SingleDetection {
                pred_class,
                food_options,
            } => vec![DetectedFood {
                pred_class,
                food_options,
            }],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FoodOptionsResponse {
    Wrapped {
        #[serde(default)]
        food_options: Vec<FoodOption>,
    },
    Bare(Vec<FoodOption>),
}

impl FoodOptionsResponse {
    pub fn into_options(self) -> Vec<FoodOption> {
        match self {
            FoodOptionsResponse::Wrapped { food_options } => food_options,
            FoodOptionsResponse::Bare(options) => options,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalcNutritionRequest {
    pub food_id: i64,
    pub weight_g: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CalcNutritionResponse {
    #[serde(default)]
    pub food_id: Option<i64>,
    #[serde(default)]
    pub representative_name: Option<String>,
    #[serde(default)]
    pub pred_class: Option<String>,
    pub input_g: f64,
    #[serde(default)]
    pub nutrition: Nutrition,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SaveMealItem {
    pub food_id: i64,
    pub weight_g: f64,
}

/// An empty `items` list asks the backend to drop the meal slot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SaveMealRequest {
    pub title: String,
    pub items: Vec<SaveMealItem>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SavedMealItem {
    pub id: i64,
    pub food: FoodRef,
    pub weight_g: f64,
    #[serde(default)]
    pub nutrition: Nutrition,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SavedMeal {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub created_at: Option<DateTime<FixedOffset>>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub total_kcal: Option<f64>,
    #[serde(default)]
    pub items: Vec<SavedMealItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecommendRequest {
    pub query: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecommendResponse {
    pub recommendation: String,
}
