//! The three-step meal analyzer: upload a photo, pick and weigh each detected
//! food, review the meal and save it.

use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::api_connection::connection::{ApiConnectionError, FoodApi, UserAction};
use crate::api_connection::endpoints::{
    CalcNutritionRequest, CalcNutritionResponse, DetectedFood, FoodOption, PredictResponse,
    SaveMealItem, SaveMealRequest, SavedMeal,
};
use crate::meal_aggregator::{kcal_percent, macro_breakdown, meal_totals, MacroSlice, Nutrition};
use crate::models::{FoodRef, ItemId, Meal, MealItem, MealSlot};
use crate::session::AppContext;

pub const MIN_WEIGHT_G: u32 = 10;
pub const MAX_WEIGHT_G: u32 = 1000;
pub const DEFAULT_WEIGHT_G: u32 = 200;

const NOTHING_DETECTED_MESSAGE: &str = "No food was detected in the image.";
const MEAL_SAVED_MESSAGE: &str = "Meal saved.";

/// Calls the analyzer needs from the backend.
#[async_trait]
pub trait AnalyzerBackend: Send + Sync {
    async fn predict(&self, image: &ImageUpload) -> Result<PredictResponse, ApiConnectionError>;

    async fn food_options_by_class(
        &self,
        pred_class: &str,
    ) -> Result<Vec<FoodOption>, ApiConnectionError>;

    async fn calc_nutrition(
        &self,
        request: &CalcNutritionRequest,
    ) -> Result<CalcNutritionResponse, ApiConnectionError>;

    async fn save_meal(&self, request: &SaveMealRequest) -> Result<SavedMeal, ApiConnectionError>;
}

#[async_trait]
impl AnalyzerBackend for FoodApi {
    async fn predict(&self, image: &ImageUpload) -> Result<PredictResponse, ApiConnectionError> {
        FoodApi::predict(self, &image.file_name, &image.mime, image.bytes.clone()).await
    }

    async fn food_options_by_class(
        &self,
        pred_class: &str,
    ) -> Result<Vec<FoodOption>, ApiConnectionError> {
        FoodApi::food_options_by_class(self, pred_class).await
    }

    async fn calc_nutrition(
        &self,
        request: &CalcNutritionRequest,
    ) -> Result<CalcNutritionResponse, ApiConnectionError> {
        FoodApi::calc_nutrition(self, request).await
    }

    async fn save_meal(&self, request: &SaveMealRequest) -> Result<SavedMeal, ApiConnectionError> {
        FoodApi::save_meal(self, request).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageUpload {
    pub file_name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl ImageUpload {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let file_name = file_name.into();
        let mime = mime_for(&file_name).to_string();
        Self {
            file_name,
            mime,
            bytes,
        }
    }

    pub async fn from_path(path: &Path) -> std::io::Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        Ok(Self::new(file_name, bytes))
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

fn mime_for(file_name: &str) -> &'static str {
    let extension = Path::new(file_name)
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "heic" => "image/heic",
        _ => "application/octet-stream",
    }
}

/// One food the classifier found in the photo, with its ranked options.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionCandidate {
    pub pred_class: String,
    pub food_options: Vec<FoodOption>,
}

impl From<DetectedFood> for DetectionCandidate {
    fn from(detected: DetectedFood) -> Self {
        Self {
            pred_class: detected.pred_class,
            food_options: detected.food_options,
        }
    }
}

/// Slider value in grams, always within `[MIN_WEIGHT_G, MAX_WEIGHT_G]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Weight(u32);

impl Weight {
    pub fn new(grams: u32) -> Result<Self, WorkflowError> {
        if (MIN_WEIGHT_G..=MAX_WEIGHT_G).contains(&grams) {
            Ok(Self(grams))
        } else {
            Err(Precondition::WeightOutOfRange(grams).into())
        }
    }

    /// Nearest slider position for a stored weight.
    pub fn clamped(grams: f64) -> Self {
        if grams.is_nan() {
            return Self::default();
        }
        Self(grams.round().clamp(MIN_WEIGHT_G as f64, MAX_WEIGHT_G as f64) as u32)
    }

    pub fn grams(self) -> u32 {
        self.0
    }
}

impl Default for Weight {
    fn default() -> Self {
        Self(DEFAULT_WEIGHT_G)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Step {
    Upload,
    Select,
    Review,
}

impl Step {
    pub fn number(self) -> u8 {
        match self {
            Step::Upload => 1,
            Step::Select => 2,
            Step::Review => 3,
        }
    }
}

/// Input problems caught before any request goes out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Precondition {
    #[error("Please choose an image first.")]
    MissingImage,
    #[error("Analyze an image first.")]
    NoDetection,
    #[error("Please choose a food.")]
    NoFoodSelected,
    #[error("Weight must be between 10 g and 1000 g (got {0} g).")]
    WeightOutOfRange(u32),
    #[error("You need to log in to save a meal.")]
    NotAuthenticated,
    #[error("There is nothing to save.")]
    NothingToSave,
    #[error("This item has no food class to look up options for.")]
    MissingFoodClass,
    #[error("There is no meal item {0}.")]
    UnknownItem(ItemId),
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Precondition(#[from] Precondition),
    #[error("{message}")]
    Backend {
        action: UserAction,
        message: String,
        #[source]
        source: ApiConnectionError,
    },
    #[error("No food was detected in the image.")]
    NothingDetected,
}

/// Raises the busy flag for as long as a request is in flight, including
/// when the caller drops the pending future.
struct Busy<'a>(&'a AtomicBool);

impl<'a> Busy<'a> {
    fn enter(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Relaxed);
        Self(flag)
    }
}

impl Drop for Busy<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

/// Which queued detection the select step is showing, 0-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectionProgress {
    pub index: usize,
    pub total: usize,
}

/// State machine behind the upload → select → review wizard.
///
/// Operations take `&mut self`, so a single wizard never has two requests in
/// flight; a response is applied only after it arrives, which leaves the state
/// untouched when the caller drops a pending future.
pub struct AnalyzerWorkflow<B> {
    backend: B,
    slot: Option<MealSlot>,
    step: Step,
    image: Option<ImageUpload>,
    detections: Vec<DetectionCandidate>,
    detection_index: usize,
    pred_class: String,
    food_options: Vec<FoodOption>,
    selected_food: Option<FoodOption>,
    weight: Weight,
    last_result: Option<CalcNutritionResponse>,
    items: Vec<MealItem>,
    editing_item_id: Option<ItemId>,
    next_local_id: u64,
    loading: AtomicBool,
    error_message: Option<String>,
    save_message: Option<String>,
}

impl<B: AnalyzerBackend> AnalyzerWorkflow<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            slot: None,
            step: Step::Upload,
            image: None,
            detections: Vec::new(),
            detection_index: 0,
            pred_class: String::new(),
            food_options: Vec::new(),
            selected_food: None,
            weight: Weight::default(),
            last_result: None,
            items: Vec::new(),
            editing_item_id: None,
            next_local_id: 1,
            loading: AtomicBool::new(false),
            error_message: None,
            save_message: None,
        }
    }

    /// A wizard filed under a meal slot, as opened from the daily board.
    pub fn for_slot(backend: B, slot: MealSlot) -> Self {
        let mut workflow = Self::new(backend);
        workflow.slot = Some(slot);
        workflow
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn slot(&self) -> Option<MealSlot> {
        self.slot
    }

    pub fn step(&self) -> Step {
        self.step
    }

    pub fn image(&self) -> Option<&ImageUpload> {
        self.image.as_ref()
    }

    pub fn pred_class(&self) -> &str {
        &self.pred_class
    }

    pub fn food_options(&self) -> &[FoodOption] {
        &self.food_options
    }

    pub fn selected_food(&self) -> Option<&FoodOption> {
        self.selected_food.as_ref()
    }

    pub fn weight(&self) -> Weight {
        self.weight
    }

    pub fn last_result(&self) -> Option<&CalcNutritionResponse> {
        self.last_result.as_ref()
    }

    pub fn items(&self) -> &[MealItem] {
        &self.items
    }

    pub fn editing_item_id(&self) -> Option<ItemId> {
        self.editing_item_id
    }

    pub fn is_busy(&self) -> bool {
        self.loading.load(Ordering::Relaxed)
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn save_message(&self) -> Option<&str> {
        self.save_message.as_deref()
    }

    pub fn current_detection(&self) -> Option<DetectionProgress> {
        if self.step != Step::Select || self.editing_item_id.is_some() || self.detections.is_empty()
        {
            return None;
        }
        Some(DetectionProgress {
            index: self.detection_index,
            total: self.detections.len(),
        })
    }

    /// Computed from the current items on every call.
    pub fn totals(&self) -> Nutrition {
        meal_totals(&self.items)
    }

    pub fn macro_breakdown(&self) -> Vec<MacroSlice> {
        macro_breakdown(&self.totals())
    }

    pub fn kcal_percent(&self, recommended_kcal: f64) -> u32 {
        kcal_percent(&self.totals(), recommended_kcal)
    }

    fn fail(&mut self, action: UserAction, source: ApiConnectionError) -> WorkflowError {
        let message = source.user_message(action);
        warn!(?action, error = %source, "analyzer request failed");
        self.error_message = Some(message.clone());
        WorkflowError::Backend {
            action,
            message,
            source,
        }
    }

    fn clear_selection(&mut self) {
        self.detections.clear();
        self.detection_index = 0;
        self.pred_class.clear();
        self.food_options.clear();
        self.selected_food = None;
        self.last_result = None;
        self.editing_item_id = None;
        self.error_message = None;
    }

    fn load_detection(&mut self, index: usize) {
        let candidate = &self.detections[index];
        self.detection_index = index;
        self.pred_class = candidate.pred_class.clone();
        self.food_options = candidate.food_options.clone();
        self.selected_food = self.food_options.first().cloned();
        self.weight = Weight::default();
        debug!(
            index,
            total = self.detections.len(),
            pred_class = %self.pred_class,
            "showing detection"
        );
    }

    /// Moves to the next queued detection, or to review when none remain.
    fn advance_queue(&mut self) -> Step {
        let next = self.detection_index + 1;
        if next < self.detections.len() {
            self.load_detection(next);
            self.step = Step::Select;
        } else {
            self.step = Step::Review;
        }
        self.step
    }

    /// Sends the photo for classification and queues every detected food.
    /// Returns how many detections were queued.
    pub async fn submit_image(&mut self, image: ImageUpload) -> Result<usize, WorkflowError> {
        if image.is_empty() {
            return Err(Precondition::MissingImage.into());
        }

        self.clear_selection();
        self.step = Step::Upload;
        let outcome = {
            let _busy = Busy::enter(&self.loading);
            self.backend.predict(&image).await
        };
        self.image = Some(image);

        let response = match outcome {
            Ok(response) => response,
            Err(source) => return Err(self.fail(UserAction::AnalyzeImage, source)),
        };

        let detections: Vec<DetectionCandidate> = response
            .into_detections()
            .into_iter()
            .map(DetectionCandidate::from)
            .collect();
        if detections.is_empty() {
            self.error_message = Some(NOTHING_DETECTED_MESSAGE.to_string());
            return Err(WorkflowError::NothingDetected);
        }

        self.detections = detections;
        self.load_detection(0);
        self.step = Step::Select;
        info!(detections = self.detections.len(), "image analyzed");
        Ok(self.detections.len())
    }

    pub fn select_food(&mut self, option: FoodOption) {
        self.selected_food = Some(option);
    }

    pub fn set_weight(&mut self, grams: u32) -> Result<(), WorkflowError> {
        self.weight = Weight::new(grams)?;
        Ok(())
    }

    pub async fn confirm_with_weight(&mut self, grams: u32) -> Result<Step, WorkflowError> {
        self.set_weight(grams)?;
        self.confirm_selection().await
    }

    /// Calculates nutrition for the selected food at the current weight and
    /// adds the item, or rewrites it in place when editing. Returns the step
    /// the wizard moved to.
    pub async fn confirm_selection(&mut self) -> Result<Step, WorkflowError> {
        if self.step != Step::Select {
            return Err(Precondition::NoDetection.into());
        }
        let Some(selected) = self.selected_food.clone() else {
            return Err(Precondition::NoFoodSelected.into());
        };

        let request = CalcNutritionRequest {
            food_id: selected.id,
            weight_g: f64::from(self.weight.grams()),
        };
        self.error_message = None;
        let outcome = {
            let _busy = Busy::enter(&self.loading);
            self.backend.calc_nutrition(&request).await
        };

        let response = match outcome {
            Ok(response) => response,
            Err(source) => return Err(self.fail(UserAction::CalculateNutrition, source)),
        };

        let food_class = if selected.food_class.trim().is_empty() {
            response
                .pred_class
                .clone()
                .unwrap_or_else(|| self.pred_class.clone())
        } else {
            selected.food_class.clone()
        };
        let food = FoodRef {
            id: response.food_id.unwrap_or(selected.id),
            representative_name: response
                .representative_name
                .clone()
                .unwrap_or(selected.representative_name),
            food_class,
        };

        let editing = self.editing_item_id.take();
        match editing.and_then(|id| self.items.iter_mut().find(|item| item.id == id)) {
            Some(item) => {
                item.food = food;
                item.weight_g = response.input_g;
                item.nutrition = response.nutrition.clone();
                info!(id = %item.id, "meal item updated");
            }
            None => {
                let id = ItemId::Local(self.next_local_id);
                self.next_local_id += 1;
                info!(
                    %id,
                    food = %food.representative_name,
                    weight_g = response.input_g,
                    "meal item added"
                );
                self.items.push(MealItem {
                    id,
                    food,
                    weight_g: response.input_g,
                    nutrition: response.nutrition.clone(),
                });
            }
        }
        self.last_result = Some(response);

        if editing.is_some() {
            self.step = Step::Review;
            return Ok(self.step);
        }
        Ok(self.advance_queue())
    }

    /// Passes over the current detection without adding it. While editing,
    /// abandons the edit and returns to review.
    pub fn skip(&mut self) -> Result<Step, WorkflowError> {
        if self.editing_item_id.take().is_some() {
            self.step = Step::Review;
            return Ok(self.step);
        }
        if self.step != Step::Select {
            return Err(Precondition::NoDetection.into());
        }
        Ok(self.advance_queue())
    }

    /// Reopens an item in the select step. Any remaining detection queue is
    /// dropped; confirming returns to review.
    pub async fn edit_item(&mut self, id: ItemId) -> Result<(), WorkflowError> {
        let item = self
            .items
            .iter()
            .find(|item| item.id == id)
            .cloned()
            .ok_or(Precondition::UnknownItem(id))?;
        let food_class = item.food.food_class.trim().to_string();
        if food_class.is_empty() {
            return Err(Precondition::MissingFoodClass.into());
        }

        self.error_message = None;
        let outcome = {
            let _busy = Busy::enter(&self.loading);
            self.backend.food_options_by_class(&food_class).await
        };

        let options = match outcome {
            Ok(options) => options,
            Err(source) => return Err(self.fail(UserAction::LoadFoodOptions, source)),
        };

        self.detections.clear();
        self.detection_index = 0;
        self.selected_food = options
            .iter()
            .find(|option| option.id == item.food.id)
            .cloned()
            .or_else(|| Some(FoodOption::from(&item.food)));
        self.food_options = options;
        self.pred_class = food_class;
        self.weight = Weight::clamped(item.weight_g);
        self.last_result = None;
        self.editing_item_id = Some(id);
        self.step = Step::Select;
        debug!(%id, "editing meal item");
        Ok(())
    }

    /// Returns whether an item was removed.
    pub fn remove_item(&mut self, id: ItemId) -> bool {
        let before = self.items.len();
        self.items.retain(|item| item.id != id);
        if self.editing_item_id == Some(id) {
            self.editing_item_id = None;
        }
        before != self.items.len()
    }

    /// Posts the working meal. On success the wizard resets; on failure the
    /// items stay so the user can retry.
    pub async fn save_meal(&mut self, ctx: &AppContext) -> Result<Meal, WorkflowError> {
        if !ctx.is_authenticated() {
            return Err(Precondition::NotAuthenticated.into());
        }
        // An empty list is only meaningful for a slot: it clears that slot.
        if self.items.is_empty() && self.slot.is_none() {
            return Err(Precondition::NothingToSave.into());
        }

        let request = SaveMealRequest {
            title: self.slot.map(|slot| slot.title().to_string()).unwrap_or_default(),
            items: self
                .items
                .iter()
                .map(|item| SaveMealItem {
                    food_id: item.food.id,
                    weight_g: item.weight_g,
                })
                .collect(),
        };

        self.save_message = None;
        self.error_message = None;
        let outcome = {
            let _busy = Busy::enter(&self.loading);
            self.backend.save_meal(&request).await
        };

        match outcome {
            Ok(saved) => {
                let meal = Meal::from(saved);
                info!(title = %request.title, items = request.items.len(), "meal saved");
                self.reset();
                self.save_message = Some(MEAL_SAVED_MESSAGE.to_string());
                Ok(meal)
            }
            Err(source) => {
                let err = self.fail(UserAction::SaveMeal, source);
                self.save_message = self.error_message.clone();
                Err(err)
            }
        }
    }

    /// Jumps to review with the items collected so far.
    pub fn review(&mut self) -> Result<(), WorkflowError> {
        if self.items.is_empty() {
            return Err(Precondition::NothingToSave.into());
        }
        self.clear_selection();
        self.step = Step::Review;
        Ok(())
    }

    /// Clears the wizard but keeps the items, to add food from another photo.
    pub fn start_new_image(&mut self) {
        self.clear_selection();
        self.image = None;
        self.weight = Weight::default();
        self.step = Step::Upload;
    }

    /// Clears everything, items included.
    pub fn reset(&mut self) {
        self.start_new_image();
        self.items.clear();
        self.save_message = None;
    }

    /// Opens a saved meal for changes: straight to review when it has items.
    /// The wizard takes the meal's slot, so an unslotted meal unbinds it.
    pub fn load_meal(&mut self, meal: Meal) {
        self.reset();
        self.slot = meal.slot();
        self.items = meal.items;
        self.step = if self.items.is_empty() {
            Step::Upload
        } else {
            Step::Review
        };
    }
}
