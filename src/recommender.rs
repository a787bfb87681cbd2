use tracing::info;

use crate::api_connection::connection::{FoodApi, ServiceError, UserAction};
use crate::api_connection::endpoints::{RecommendRequest, RecommendResponse, RECOMMEND_MENU_PATH};

/// Asks the backend for a menu suggestion matching a free-text request.
pub async fn recommend_menu(api: &FoodApi, query: &str) -> Result<String, ServiceError> {
    let query = query.trim();
    if query.is_empty() {
        return Err(ServiceError::precondition(
            UserAction::Recommend,
            "Tell us what kind of meal you'd like.",
        ));
    }

    let response: RecommendResponse = api
        .post_json(
            RECOMMEND_MENU_PATH,
            &RecommendRequest {
                query: query.to_string(),
            },
        )
        .await
        .map_err(|e| ServiceError::from_api(UserAction::Recommend, e))?;
    info!(chars = response.recommendation.len(), "menu recommendation received");
    Ok(response.recommendation)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_blank_query_is_rejected_without_request() {
        // Nothing listens on this port; reaching the network would fail differently.
        let api = FoodApi::new("http://127.0.0.1:9/api").unwrap();
        let err = recommend_menu(&api, "   ").await.unwrap_err();
        assert!(err.source.is_none());
        assert_eq!(err.action, UserAction::Recommend);
    }
}
