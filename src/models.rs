use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::api_connection::endpoints::{SavedMeal, SavedMealItem};
use crate::meal_aggregator::{meal_totals, NutrientKey, Nutrition};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoodRef {
    pub id: i64,
    pub representative_name: String,
    #[serde(default)]
    pub food_class: String,
}

/// Items built in the wizard get a local id; items loaded from a saved meal
/// keep the backend's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemId {
    Local(u64),
    Server(i64),
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemId::Local(id) => write!(f, "local-{}", id),
            ItemId::Server(id) => write!(f, "saved-{}", id),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MealItem {
    pub id: ItemId,
    pub food: FoodRef,
    pub weight_g: f64,
    pub nutrition: Nutrition,
}

impl From<SavedMealItem> for MealItem {
    fn from(item: SavedMealItem) -> Self {
        Self {
            id: ItemId::Server(item.id),
            food: item.food,
            weight_g: item.weight_g,
            nutrition: item.nutrition,
        }
    }
}

/// Daily meal slot. On the wire the backend files meals under Korean titles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MealSlot {
    Breakfast,
    Lunch,
    Dinner,
}

impl MealSlot {
    pub const ALL: [MealSlot; 3] = [MealSlot::Breakfast, MealSlot::Lunch, MealSlot::Dinner];

    pub fn title(self) -> &'static str {
        match self {
            MealSlot::Breakfast => "아침",
            MealSlot::Lunch => "점심",
            MealSlot::Dinner => "저녁",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            MealSlot::Breakfast => "Breakfast",
            MealSlot::Lunch => "Lunch",
            MealSlot::Dinner => "Dinner",
        }
    }
}

impl FromStr for MealSlot {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        MealSlot::ALL
            .into_iter()
            .find(|slot| slot.title() == wanted || slot.label().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| {
                format!("unknown meal slot '{}' (expected breakfast, lunch or dinner)", s)
            })
    }
}

impl fmt::Display for MealSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Meal {
    pub id: Option<i64>,
    pub created_at: Option<DateTime<FixedOffset>>,
    pub title: String,
    pub items: Vec<MealItem>,
    /// Total as computed by the backend when it reported one.
    pub reported_total_kcal: Option<f64>,
}

impl Meal {
    pub fn slot(&self) -> Option<MealSlot> {
        self.title.parse().ok()
    }

    pub fn totals(&self) -> Nutrition {
        meal_totals(&self.items)
    }

    pub fn total_kcal(&self) -> f64 {
        self.reported_total_kcal
            .unwrap_or_else(|| self.totals().amount(NutrientKey::EnergyKcal))
    }

    pub fn date(&self) -> Option<NaiveDate> {
        self.created_at.map(|created| created.date_naive())
    }
}

impl From<SavedMeal> for Meal {
    fn from(meal: SavedMeal) -> Self {
        Self {
            id: meal.id,
            created_at: meal.created_at,
            title: meal.title,
            items: meal.items.into_iter().map(MealItem::from).collect(),
            reported_total_kcal: meal.total_kcal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_meal_slot_parsing() {
        assert_eq!("lunch".parse::<MealSlot>(), Ok(MealSlot::Lunch));
        assert_eq!("Dinner".parse::<MealSlot>(), Ok(MealSlot::Dinner));
        assert_eq!("아침".parse::<MealSlot>(), Ok(MealSlot::Breakfast));
        assert!("brunch".parse::<MealSlot>().is_err());
    }

    #[test]
    fn test_saved_meal_conversion() {
        let saved: SavedMeal = serde_json::from_value(json!({
            "id": 4,
            "created_at": "2026-10-17T12:30:00+09:00",
            "title": "점심",
            "total_kcal": null,
            "items": [
                {"id": 10, "food": {"id": 1, "representative_name": "Rice"}, "weight_g": 210.0,
                 "nutrition": {"energy_kcal": 300.0}},
                {"id": 11, "food": {"id": 2, "representative_name": "Soup", "food_class": "soup"},
                 "weight_g": 300.0, "nutrition": {"energy_kcal": 120.0}}
            ]
        }))
        .unwrap();
        let meal = Meal::from(saved);
        assert_eq!(meal.slot(), Some(MealSlot::Lunch));
        assert_eq!(meal.items[0].id, ItemId::Server(10));
        assert_eq!(meal.total_kcal(), 420.0);
        assert_eq!(meal.date(), NaiveDate::from_ymd_opt(2026, 10, 17));
    }

    #[test]
    fn test_reported_total_wins_over_item_sum() {
        let meal = Meal {
            id: None,
            created_at: None,
            title: String::new(),
            items: Vec::new(),
            reported_total_kcal: Some(512.0),
        };
        assert_eq!(meal.total_kcal(), 512.0);
        assert_eq!(meal.slot(), None);
    }
}
