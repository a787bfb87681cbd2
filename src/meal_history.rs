use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashMap;
use std::io::Write;
use tracing::debug;

use crate::api_connection::connection::{FoodApi, ServiceError, UserAction};
use crate::meal_aggregator::{
    kcal_percent, macro_breakdown, sum_nutrition, MacroSlice, NutrientKey, Nutrition,
};
use crate::models::{Meal, MealSlot};

/// Saved meals, newest first as the backend returns them.
pub async fn fetch_meals(api: &FoodApi) -> Result<Vec<Meal>, ServiceError> {
    let meals = api
        .list_meals()
        .await
        .map_err(|e| ServiceError::from_api(UserAction::LoadMeals, e))?;
    debug!(count = meals.len(), "meals loaded");
    Ok(meals.into_iter().map(Meal::from).collect())
}

/// One day of meals, bucketed by slot.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyBoard {
    pub date: NaiveDate,
    slots: HashMap<MealSlot, Meal>,
    unslotted: Vec<Meal>,
}

impl DailyBoard {
    /// Keeps the newest meal per slot; meals without a slot title still count
    /// toward the day's totals.
    pub fn for_date(meals: &[Meal], date: NaiveDate) -> Self {
        let mut slots = HashMap::new();
        let mut unslotted = Vec::new();
        for meal in meals.iter().filter(|meal| meal.date() == Some(date)) {
            match meal.slot() {
                Some(slot) => {
                    slots.entry(slot).or_insert_with(|| meal.clone());
                }
                None => unslotted.push(meal.clone()),
            }
        }
        Self {
            date,
            slots,
            unslotted,
        }
    }

    pub fn meal(&self, slot: MealSlot) -> Option<&Meal> {
        self.slots.get(&slot)
    }

    pub fn unslotted(&self) -> &[Meal] {
        &self.unslotted
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty() && self.unslotted.is_empty()
    }

    /// Slot meals in breakfast, lunch, dinner order, then the rest.
    pub fn meals(&self) -> impl Iterator<Item = &Meal> {
        MealSlot::ALL
            .into_iter()
            .filter_map(|slot| self.slots.get(&slot))
            .chain(self.unslotted.iter())
    }

    pub fn summary(&self, recommended_kcal: f64) -> DailySummary {
        let totals = sum_nutrition(
            self.meals()
                .flat_map(|meal| meal.items.iter().map(|item| &item.nutrition)),
        );
        DailySummary::new(totals, recommended_kcal)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DailySummary {
    pub totals: Nutrition,
    pub total_kcal: f64,
    pub kcal_percent: u32,
    /// Only macros the day actually contains.
    pub macros: Vec<MacroSlice>,
}

impl DailySummary {
    fn new(totals: Nutrition, recommended_kcal: f64) -> Self {
        let macros = macro_breakdown(&totals)
            .into_iter()
            .filter(|slice| slice.grams > 0.0)
            .collect();
        Self {
            total_kcal: totals.amount(NutrientKey::EnergyKcal),
            kcal_percent: kcal_percent(&totals, recommended_kcal),
            macros,
            totals,
        }
    }
}

#[derive(Debug, Serialize)]
struct HistoryRow<'a> {
    date: String,
    title: &'a str,
    food: &'a str,
    weight_g: f64,
    kcal: f64,
}

/// Writes one CSV row per meal item. Returns the number of rows written.
pub fn export_csv<W: Write>(meals: &[Meal], writer: W) -> Result<usize> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    let mut rows = 0;
    for meal in meals {
        let date = meal.date().map(|d| d.to_string()).unwrap_or_default();
        let title = meal.slot().map(MealSlot::label).unwrap_or(meal.title.as_str());
        for item in &meal.items {
            csv_writer
                .serialize(HistoryRow {
                    date: date.clone(),
                    title,
                    food: &item.food.representative_name,
                    weight_g: item.weight_g,
                    kcal: item.nutrition.amount(NutrientKey::EnergyKcal),
                })
                .with_context(|| format!("Failed to write history row for meal {:?}", meal.id))?;
            rows += 1;
        }
    }
    csv_writer.flush().context("Failed to flush history CSV")?;
    Ok(rows)
}
