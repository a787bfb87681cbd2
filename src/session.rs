use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::api_connection::connection::{FoodApi, ServiceError, UserAction};
use crate::api_connection::endpoints::{
    Credentials, User, LOGIN_PATH, LOGOUT_PATH, REGISTER_PATH,
};
use crate::profile::{fetch_profile, Profile};

pub const DEFAULT_RECOMMENDED_KCAL: f64 = 2000.0;

/// Application-wide state shared with every view.
///
/// Each field has exactly one writer: the user changes only through
/// `bootstrap`/`login`/`register`/`logout`, the calorie target only through
/// `bootstrap` and `apply_profile`. Everything else reads.
#[derive(Debug, Clone, PartialEq)]
pub struct AppContext {
    current_user: Option<User>,
    recommended_kcal: f64,
}

impl Default for AppContext {
    fn default() -> Self {
        Self::new(DEFAULT_RECOMMENDED_KCAL)
    }
}

impl AppContext {
    pub fn new(default_kcal: f64) -> Self {
        Self {
            current_user: None,
            recommended_kcal: default_kcal,
        }
    }

    pub fn current_user(&self) -> Option<&User> {
        self.current_user.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.current_user.is_some()
    }

    pub fn recommended_kcal(&self) -> f64 {
        self.recommended_kcal
    }

    /// Loads the profile once at start-up. A 401/403 means the stored session
    /// is no longer valid and the user is dropped; any other failure keeps
    /// the current state.
    pub async fn bootstrap(&mut self, api: &FoodApi) {
        match fetch_profile(api).await {
            Ok(profile) => self.apply_profile(&profile),
            Err(e) => {
                let status = e.source.as_ref().and_then(|source| source.status());
                if status.is_some_and(is_auth_rejection) {
                    if let Some(user) = self.current_user.take() {
                        info!(username = %user.username, "stored session rejected by backend");
                    }
                } else {
                    debug!(error = %e, "profile unavailable");
                }
            }
        }
    }

    pub fn apply_profile(&mut self, profile: &Profile) {
        if let Some(user) = &profile.user {
            self.current_user = Some(user.clone());
        }
        if let Some(kcal) = profile.recommended_kcal.filter(|kcal| *kcal > 0.0) {
            self.recommended_kcal = kcal;
        }
    }

    pub async fn login(
        &mut self,
        api: &FoodApi,
        username: &str,
        password: &str,
    ) -> Result<&User, ServiceError> {
        let credentials = Self::credentials(UserAction::Login, username, password, None)?;
        let user: User = api
            .post_json(LOGIN_PATH, &credentials)
            .await
            .map_err(|e| ServiceError::from_api(UserAction::Login, e))?;
        info!(username = %user.username, "logged in");
        Ok(self.current_user.insert(user))
    }

    pub async fn register(
        &mut self,
        api: &FoodApi,
        username: &str,
        password: &str,
        email: Option<&str>,
    ) -> Result<&User, ServiceError> {
        let credentials = Self::credentials(UserAction::Register, username, password, email)?;
        let user: User = api
            .post_json(REGISTER_PATH, &credentials)
            .await
            .map_err(|e| ServiceError::from_api(UserAction::Register, e))?;
        info!(username = %user.username, "registered");
        Ok(self.current_user.insert(user))
    }

    pub async fn logout(&mut self, api: &FoodApi) -> Result<(), ServiceError> {
        api.post_empty(LOGOUT_PATH)
            .await
            .map_err(|e| ServiceError::from_api(UserAction::Logout, e))?;
        self.current_user = None;
        info!("logged out");
        Ok(())
    }

    fn credentials(
        action: UserAction,
        username: &str,
        password: &str,
        email: Option<&str>,
    ) -> Result<Credentials, ServiceError> {
        if username.trim().is_empty() || password.is_empty() {
            return Err(ServiceError::precondition(
                action,
                "Username and password are required.",
            ));
        }
        Ok(Credentials {
            username: username.trim().to_string(),
            password: password.to_string(),
            email: email
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .map(str::to_string),
        })
    }

    pub fn snapshot(&self, api: &FoodApi) -> StoredSession {
        StoredSession {
            cookies: api.cookies(),
            user: self.current_user.clone(),
            recommended_kcal: self.recommended_kcal,
        }
    }

    /// Rebuilds the context from a saved session and hands its cookies back
    /// to the client.
    pub fn restore(stored: StoredSession, api: &FoodApi) -> Self {
        api.restore_cookies(&stored.cookies);
        Self {
            current_user: stored.user,
            recommended_kcal: stored.recommended_kcal,
        }
    }
}

fn is_auth_rejection(status: StatusCode) -> bool {
    status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN
}

/// What survives between CLI runs: backend cookies plus the cached context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSession {
    pub cookies: Vec<(String, String)>,
    pub user: Option<User>,
    pub recommended_kcal: f64,
}

pub fn save_session(session: &StoredSession, path: &Path) -> anyhow::Result<()> {
    let parent_dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent_dir)?;

    let temp_file = NamedTempFile::new_in(parent_dir)?;
    {
        let mut writer = BufWriter::new(&temp_file);
        bincode::serialize_into(&mut writer, session)?;
        writer.flush()?;
    }
    temp_file.persist(path)?;
    debug!(path = %path.display(), "session saved");
    Ok(())
}

/// A missing file means no session yet; an unreadable one is discarded.
pub fn load_session(path: &Path) -> Option<StoredSession> {
    let file = File::open(path).ok()?;
    match bincode::deserialize_from(BufReader::new(file)) {
        Ok(session) => Some(session),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring unreadable session file");
            None
        }
    }
}

pub fn clear_session(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user() -> User {
        User {
            id: 1,
            username: "minji".to_string(),
            email: String::new(),
        }
    }

    #[test]
    fn test_apply_profile_sets_user_and_kcal() {
        let mut ctx = AppContext::default();
        assert!(!ctx.is_authenticated());
        assert_eq!(ctx.recommended_kcal(), DEFAULT_RECOMMENDED_KCAL);

        let profile: Profile = serde_json::from_value(json!({
            "user": {"id": 1, "username": "minji", "email": ""},
            "recommended_kcal": 1850
        }))
        .unwrap();
        ctx.apply_profile(&profile);
        assert_eq!(ctx.current_user(), Some(&user()));
        assert_eq!(ctx.recommended_kcal(), 1850.0);
    }

    #[test]
    fn test_apply_profile_without_kcal_keeps_previous_target() {
        let mut ctx = AppContext::new(2200.0);
        ctx.apply_profile(&Profile::default());
        assert_eq!(ctx.recommended_kcal(), 2200.0);
        assert!(ctx.current_user().is_none());
    }

    #[test]
    fn test_blank_credentials_are_rejected_before_sending() {
        let err = AppContext::credentials(UserAction::Login, "  ", "pw", None).unwrap_err();
        assert!(err.source.is_none());
        let creds =
            AppContext::credentials(UserAction::Register, "kim ", "pw", Some(" ")).unwrap();
        assert_eq!(creds.username, "kim");
        assert_eq!(creds.email, None);
    }

    #[test]
    fn test_session_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("session.bin");
        let session = StoredSession {
            cookies: vec![("sessionid".to_string(), "xyz".to_string())],
            user: Some(user()),
            recommended_kcal: 1900.0,
        };
        save_session(&session, &path).unwrap();
        assert_eq!(load_session(&path), Some(session));

        clear_session(&path).unwrap();
        assert_eq!(load_session(&path), None);
        clear_session(&path).unwrap();
    }

    #[test]
    fn test_corrupt_session_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.bin");
        fs::write(&path, b"\xff\xff").unwrap();
        assert_eq!(load_session(&path), None);
    }

    #[test]
    fn test_restore_hands_cookies_to_client() {
        let api = FoodApi::new("http://localhost:8000/api").unwrap();
        let ctx = AppContext::restore(
            StoredSession {
                cookies: vec![("csrftoken".to_string(), "t0k".to_string())],
                user: Some(user()),
                recommended_kcal: 1700.0,
            },
            &api,
        );
        assert!(ctx.is_authenticated());
        assert_eq!(api.csrf_token().as_deref(), Some("t0k"));
    }
}
