use std::sync::Arc;
use std::time::Duration;

use reqwest::cookie::{CookieStore, Jar};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use super::endpoints::{
    CalcNutritionRequest, CalcNutritionResponse, FoodOption, FoodOptionsResponse,
    PredictResponse, SaveMealRequest, SavedMeal, CALC_NUTRITION_PATH, CSRF_COOKIE, CSRF_HEADER,
    FOOD_OPTIONS_PATH, MEALS_PATH, PREDICT_PATH,
};

/// What the backend said when it refused a request.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendErrorBody {
    /// `{"detail": "..."}`
    Detail(String),
    /// `{"field": ["message", ...], ...}`
    FieldErrors(Vec<(String, Vec<String>)>),
    /// Anything else, kept verbatim for logs.
    Raw(String),
}

impl BackendErrorBody {
    pub fn parse(raw: &str) -> Self {
        let Ok(Value::Object(map)) = serde_json::from_str::<Value>(raw) else {
            return BackendErrorBody::Raw(raw.to_string());
        };

        if let Some(Value::String(detail)) = map.get("detail") {
            return BackendErrorBody::Detail(detail.clone());
        }

        let mut fields = Vec::new();
        for (field, value) in &map {
            match value {
                Value::Array(entries) => {
                    let messages = entries
                        .iter()
                        .map(|entry| match entry {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        })
                        .collect();
                    fields.push((field.clone(), messages));
                }
                Value::String(message) => fields.push((field.clone(), vec![message.clone()])),
                _ => {}
            }
        }

        if fields.is_empty() {
            BackendErrorBody::Raw(raw.to_string())
        } else {
            BackendErrorBody::FieldErrors(fields)
        }
    }

    /// Text fit for showing to the user, if the body carried any.
    pub fn display_message(&self) -> Option<String> {
        match self {
            BackendErrorBody::Detail(detail) => Some(detail.clone()),
            BackendErrorBody::FieldErrors(fields) => Some(
                fields
                    .iter()
                    .map(|(field, messages)| format!("{}: {}", field, messages.join(" ")))
                    .collect::<Vec<_>>()
                    .join(" / "),
            ),
            BackendErrorBody::Raw(_) => None,
        }
    }
}

impl std::fmt::Display for BackendErrorBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendErrorBody::Raw(raw) if raw.is_empty() => write!(f, "<empty body>"),
            BackendErrorBody::Raw(raw) => write!(f, "{}", raw),
            other => write!(f, "{}", other.display_message().unwrap_or_default()),
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiConnectionError {
    #[error("Invalid API base URL '{0}'")]
    InvalidBaseUrl(String),
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("API error {status}: {body}")]
    ApiError {
        status: StatusCode,
        body: BackendErrorBody,
    },
}

impl ApiConnectionError {
    /// Message for the user: the backend's own words when it gave any,
    /// otherwise the generic text for the action that failed.
    pub fn user_message(&self, action: UserAction) -> String {
        match self {
            ApiConnectionError::ApiError { body, .. } => body
                .display_message()
                .unwrap_or_else(|| action.generic_message().to_string()),
            _ => action.generic_message().to_string(),
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiConnectionError::ApiError { status, .. } => Some(*status),
            ApiConnectionError::NetworkError(err) => err.status(),
            _ => None,
        }
    }
}

/// User-triggered actions, used to pick a fallback error message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserAction {
    AnalyzeImage,
    CalculateNutrition,
    LoadFoodOptions,
    SaveMeal,
    LoadMeals,
    LoadProfile,
    SaveProfile,
    Login,
    Register,
    Logout,
    Recommend,
    ManageAllergens,
    ManagePreferences,
    SearchFood,
}

impl UserAction {
    pub fn generic_message(self) -> &'static str {
        match self {
            UserAction::AnalyzeImage => "Image analysis failed.",
            UserAction::CalculateNutrition => "Nutrition calculation failed.",
            UserAction::LoadFoodOptions => "Could not load the food options for this item.",
            UserAction::SaveMeal => "Saving the meal failed.",
            UserAction::LoadMeals => "Could not load your meal history. (Are you logged in?)",
            UserAction::LoadProfile => "Could not load your profile. (Are you logged in?)",
            UserAction::SaveProfile => "Saving the profile failed.",
            UserAction::Login | UserAction::Register => {
                "Something went wrong. Please check what you entered."
            }
            UserAction::Logout => "Logging out failed.",
            UserAction::Recommend => "Could not get a menu recommendation.",
            UserAction::ManageAllergens => "Updating allergens failed.",
            UserAction::ManagePreferences => "Updating food preferences failed.",
            UserAction::SearchFood => "Food search failed.",
        }
    }
}

/// Error type shared by the profile, session and recommendation services.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ServiceError {
    pub action: UserAction,
    pub message: String,
    #[source]
    pub source: Option<ApiConnectionError>,
}

impl ServiceError {
    pub fn from_api(action: UserAction, source: ApiConnectionError) -> Self {
        let message = source.user_message(action);
        warn!(?action, error = %source, "backend call failed");
        Self {
            action,
            message,
            source: Some(source),
        }
    }

    /// A request that was never sent because its input was unusable.
    pub fn precondition(action: UserAction, message: impl Into<String>) -> Self {
        Self {
            action,
            message: message.into(),
            source: None,
        }
    }
}

/// Cookie-authenticated client for the food backend.
///
/// Session and CSRF cookies set by the backend land in a shared jar; every
/// mutating request echoes the `csrftoken` cookie on the `X-CSRFToken` header.
#[derive(Debug, Clone)]
pub struct FoodApi {
    http: Client,
    jar: Arc<Jar>,
    base: String,
    base_url: Url,
}

impl FoodApi {
    pub fn new(base: &str) -> Result<Self, ApiConnectionError> {
        Self::with_timeout(base, None)
    }

    pub fn with_timeout(base: &str, timeout: Option<Duration>) -> Result<Self, ApiConnectionError> {
        let base = base.trim().trim_end_matches('/').to_string();
        let base_url = Url::parse(&format!("{}/", base))
            .map_err(|_| ApiConnectionError::InvalidBaseUrl(base.clone()))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(ApiConnectionError::InvalidBaseUrl(base));
        }

        let jar = Arc::new(Jar::default());
        let mut builder = Client::builder()
            .cookie_provider(Arc::clone(&jar))
            .user_agent(concat!("meal_tracker/", env!("CARGO_PKG_VERSION")));
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build()?;

        Ok(Self {
            http,
            jar,
            base,
            base_url,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    /// All cookies the jar would send to the backend, as `(name, value)` pairs.
    pub fn cookies(&self) -> Vec<(String, String)> {
        let Some(header) = self.jar.cookies(&self.base_url) else {
            return Vec::new();
        };
        let Ok(header) = header.to_str() else {
            return Vec::new();
        };
        header
            .split(';')
            .filter_map(|pair| pair.trim().split_once('='))
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect()
    }

    pub fn cookie(&self, name: &str) -> Option<String> {
        self.cookies()
            .into_iter()
            .find(|(cookie_name, _)| cookie_name == name)
            .map(|(_, value)| value)
    }

    pub fn csrf_token(&self) -> Option<String> {
        self.cookie(CSRF_COOKIE)
    }

    /// Puts previously saved cookies back into the jar.
    pub fn restore_cookies(&self, cookies: &[(String, String)]) {
        for (name, value) in cookies {
            self.jar
                .add_cookie_str(&format!("{}={}; Path=/", name, value), &self.base_url);
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mutating = matches!(
            method,
            Method::POST | Method::PUT | Method::PATCH | Method::DELETE
        );
        debug!(%method, path, "backend request");
        let mut builder = self.http.request(method, self.endpoint(path));
        if mutating {
            if let Some(token) = self.csrf_token() {
                builder = builder.header(CSRF_HEADER, token);
            }
        }
        builder
    }

    async fn execute(&self, builder: RequestBuilder) -> Result<Response, ApiConnectionError> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let raw = response.text().await.unwrap_or_default();
            debug!(%status, body = %raw, "backend rejected request");
            Err(ApiConnectionError::ApiError {
                status,
                body: BackendErrorBody::parse(&raw),
            })
        }
    }

    async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, ApiConnectionError> {
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ApiConnectionError> {
        let response = self
            .execute(self.request(Method::GET, path).query(query))
            .await?;
        Self::read_json(response).await
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ApiConnectionError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .execute(self.request(Method::POST, path).json(body))
            .await?;
        Self::read_json(response).await
    }

    pub async fn put_json<B, T>(&self, path: &str, body: &B) -> Result<T, ApiConnectionError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .execute(self.request(Method::PUT, path).json(body))
            .await?;
        Self::read_json(response).await
    }

    /// POST with an empty JSON object, ignoring whatever comes back.
    pub async fn post_empty(&self, path: &str) -> Result<(), ApiConnectionError> {
        self.execute(
            self.request(Method::POST, path)
                .json(&serde_json::Map::new()),
        )
        .await?;
        Ok(())
    }

    pub async fn delete(&self, path: &str) -> Result<(), ApiConnectionError> {
        self.execute(self.request(Method::DELETE, path)).await?;
        Ok(())
    }

    pub async fn post_multipart<T: DeserializeOwned>(
        &self,
        path: &str,
        form: Form,
    ) -> Result<T, ApiConnectionError> {
        let response = self
            .execute(self.request(Method::POST, path).multipart(form))
            .await?;
        Self::read_json(response).await
    }

    pub async fn predict(
        &self,
        file_name: &str,
        mime: &str,
        bytes: Vec<u8>,
    ) -> Result<PredictResponse, ApiConnectionError> {
        let part = Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str(mime)?;
        let form = Form::new().part("image", part);
        self.post_multipart(PREDICT_PATH, form).await
    }

    pub async fn food_options_by_class(
        &self,
        pred_class: &str,
    ) -> Result<Vec<FoodOption>, ApiConnectionError> {
        let response: FoodOptionsResponse = self
            .get_json(FOOD_OPTIONS_PATH, &[("class", pred_class)])
            .await?;
        Ok(response.into_options())
    }

    pub async fn search_foods(&self, term: &str) -> Result<Vec<FoodOption>, ApiConnectionError> {
        let response: FoodOptionsResponse =
            self.get_json(FOOD_OPTIONS_PATH, &[("name", term)]).await?;
        Ok(response.into_options())
    }

    pub async fn calc_nutrition(
        &self,
        request: &CalcNutritionRequest,
    ) -> Result<CalcNutritionResponse, ApiConnectionError> {
        self.post_json(CALC_NUTRITION_PATH, request).await
    }

    pub async fn list_meals(&self) -> Result<Vec<SavedMeal>, ApiConnectionError> {
        self.get_json(MEALS_PATH, &[]).await
    }

    pub async fn save_meal(
        &self,
        request: &SaveMealRequest,
    ) -> Result<SavedMeal, ApiConnectionError> {
        self.post_json(MEALS_PATH, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detail_body_is_used_verbatim() {
        let body = BackendErrorBody::parse(r#"{"detail": "Food not found."}"#);
        assert_eq!(body, BackendErrorBody::Detail("Food not found.".to_string()));
        let err = ApiConnectionError::ApiError {
            status: StatusCode::NOT_FOUND,
            body,
        };
        assert_eq!(err.user_message(UserAction::CalculateNutrition), "Food not found.");
    }

    #[test]
    fn test_field_errors_are_joined() {
        let body = BackendErrorBody::parse(
            r#"{"password": ["too short", "too common"], "username": ["already taken"]}"#,
        );
        let message = body.display_message().unwrap();
        assert!(message.contains("username: already taken"));
        assert!(message.contains("password: too short too common"));
        assert!(message.contains(" / "));
    }

    #[test]
    fn test_unparseable_body_falls_back_to_generic_message() {
        let err = ApiConnectionError::ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: BackendErrorBody::parse("<html>Server Error</html>"),
        };
        assert_eq!(
            err.user_message(UserAction::AnalyzeImage),
            UserAction::AnalyzeImage.generic_message()
        );
    }

    #[test]
    fn test_object_without_messages_is_raw() {
        let body = BackendErrorBody::parse(r#"{"code": 12}"#);
        assert!(matches!(body, BackendErrorBody::Raw(_)));
        assert_eq!(body.display_message(), None);
    }

    #[test]
    fn test_invalid_base_url_is_rejected() {
        assert!(matches!(
            FoodApi::new("not a url"),
            Err(ApiConnectionError::InvalidBaseUrl(_))
        ));
        assert!(matches!(
            FoodApi::new("ftp://example.com/api"),
            Err(ApiConnectionError::InvalidBaseUrl(_))
        ));
    }

    #[test]
    fn test_restored_cookies_are_readable() {
        let api = FoodApi::new("http://localhost:8000/api/").unwrap();
        assert_eq!(api.csrf_token(), None);
        api.restore_cookies(&[
            ("sessionid".to_string(), "abc".to_string()),
            ("csrftoken".to_string(), "tok123".to_string()),
        ]);
        assert_eq!(api.csrf_token().as_deref(), Some("tok123"));
        assert_eq!(api.cookie("sessionid").as_deref(), Some("abc"));
        assert_eq!(api.endpoint(MEALS_PATH), "http://localhost:8000/api/meals/");
    }
}
