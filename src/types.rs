//! Wire types for the Memory Lane API

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Bearer credentials held by a session (access + refresh)
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_token: String,
    /// Absent when only the access token survived in storage; refresh is impossible then.
    pub refresh_token: Option<String>,
}

impl Credentials {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: Some(refresh_token.into()),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Uniform response wrapper returned by the backend
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiEnvelope<T = Value> {
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
}

/// The `data` member of an envelope, or the whole body when there is none.
pub(crate) fn unwrap_data(body: Value) -> Value {
    match body {
        Value::Object(mut map) => match map.remove("data") {
            Some(data) if !data.is_null() => data,
            _ => Value::Object(map),
        },
        other => other,
    }
}

/// Best human-readable failure text the server supplied, if any.
pub(crate) fn server_message(body: &Value) -> Option<String> {
    let text = |key: &str| {
        body.get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
    };

    text("error").or_else(|| text("message")).or_else(|| {
        let errors: Vec<&str> = body
            .get("errors")?
            .as_array()?
            .iter()
            .filter_map(Value::as_str)
            .collect();
        (!errors.is_empty()).then(|| errors.join("; "))
    })
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Public,
    Friends,
    Private,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Photo,
    Audio,
    Video,
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Recent,
    Popular,
    Distance,
    Relevance,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrivacySettings {
    pub profile_visibility: Visibility,
    pub location_sharing: bool,
    pub memory_visibility: Visibility,
    pub allow_messages: bool,
}

/// User profile as returned by auth and user endpoints
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct User {
    pub user_id: String,
    pub username: String,
    pub email: String,
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    pub is_active: bool,
    pub is_verified: bool,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub last_active: Option<String>,
    pub memories_count: u64,
    pub followers_count: u64,
    pub following_count: u64,
    pub privacy_settings: Option<PrivacySettings>,
}

/// Successful login or registration payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthResponse {
    #[serde(default)]
    pub user: User,
    pub access_token: String,
    pub refresh_token: String,
}

impl AuthResponse {
    pub fn credentials(&self) -> Credentials {
        Credentials::new(&self.access_token, &self.refresh_token)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
}

/// Login by username or by email
#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub password: String,
}

impl LoginRequest {
    pub fn with_username(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            email: None,
            password: password.into(),
        }
    }

    pub fn with_email(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: None,
            email: Some(email.into()),
            password: password.into(),
        }
    }
}

/// Account creation; field policy is enforced server-side
#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Availability {
    pub available: bool,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// A location-tagged post
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Memory {
    pub memory_id: String,
    pub creator_id: String,
    pub creator: Option<User>,
    pub title: String,
    pub description: Option<String>,
    pub content_type: Option<ContentType>,
    pub content_url: Option<String>,
    pub content_text: Option<String>,
    pub thumbnail_url: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub location_name: Option<String>,
    pub privacy_level: Visibility,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub expiration_date: Option<String>,
    pub likes_count: u64,
    pub comments_count: u64,
    pub views_count: u64,
    pub category_tags: Vec<String>,
    pub mood: Option<String>,
    pub has_liked: Option<bool>,
    pub distance_km: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateMemoryRequest {
    pub title: String,
    pub content_type: ContentType,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub privacy_level: Option<Visibility>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub category_tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mood: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration_hours: Option<u32>,
}

impl CreateMemoryRequest {
    pub fn new(title: impl Into<String>, content_type: ContentType, at: Coordinates) -> Self {
        Self {
            title: title.into(),
            content_type,
            latitude: at.latitude,
            longitude: at.longitude,
            description: None,
            content_url: None,
            content_text: None,
            location_name: None,
            privacy_level: None,
            category_tags: Vec::new(),
            mood: None,
            expiration_hours: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UpdateMemoryRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub privacy_level: Option<Visibility>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mood: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Comment {
    pub comment_id: String,
    pub user_id: String,
    pub memory_id: String,
    pub content: String,
    pub created_at: Option<String>,
    pub user: Option<User>,
}

/// Optional narrowing for memory search
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub content_type: Option<ContentType>,
    pub privacy_level: Option<Visibility>,
    pub mood: Option<String>,
    pub category_tags: Vec<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub radius_km: Option<f64>,
    pub sort_by: Option<SortOrder>,
}

impl SearchFilters {
    pub(crate) fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(ct) = self.content_type {
            pairs.push(("content_type", wire_name(&ct)));
        }
        if let Some(level) = &self.privacy_level {
            pairs.push(("privacy_level", wire_name(level)));
        }
        if let Some(mood) = &self.mood {
            pairs.push(("mood", mood.clone()));
        }
        if !self.category_tags.is_empty() {
            pairs.push(("category_tags", self.category_tags.join(",")));
        }
        if let Some(from) = &self.date_from {
            pairs.push(("date_from", from.clone()));
        }
        if let Some(to) = &self.date_to {
            pairs.push(("date_to", to.clone()));
        }
        if let Some(radius) = self.radius_km {
            pairs.push(("radius_km", radius.to_string()));
        }
        if let Some(sort) = self.sort_by {
            pairs.push(("sort_by", wire_name(&sort)));
        }
        pairs
    }
}

fn wire_name<T: Serialize>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(Value::String(s)) => s,
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unwrap_data_prefers_data_member() {
        let body = json!({"success": true, "data": {"memory_id": "m1"}});
        assert_eq!(unwrap_data(body), json!({"memory_id": "m1"}));
    }

    #[test]
    fn unwrap_data_falls_back_to_envelope() {
        let body = json!({"success": true, "message": "Liked"});
        assert_eq!(unwrap_data(body.clone()), body);

        let body = json!({"success": true, "data": null});
        assert_eq!(unwrap_data(body), json!({"success": true}));

        assert_eq!(unwrap_data(json!([1, 2])), json!([1, 2]));
    }

    #[test]
    fn server_message_priority() {
        assert_eq!(
            server_message(&json!({"error": "Username taken", "message": "nope"})).as_deref(),
            Some("Username taken")
        );
        assert_eq!(server_message(&json!({"message": "Bad request"})).as_deref(), Some("Bad request"));
        assert_eq!(
            server_message(&json!({"errors": ["email invalid", "password too short"]})).as_deref(),
            Some("email invalid; password too short")
        );
        assert_eq!(server_message(&json!({"success": false})), None);
    }

    #[test]
    fn auth_response_tolerates_sparse_user() {
        let payload = json!({"user": {"username": "alice"}, "access_token": "A1", "refresh_token": "R1"});
        let auth: AuthResponse = serde_json::from_value(payload).unwrap();
        assert_eq!(auth.user.username, "alice");
        assert_eq!(auth.credentials(), Credentials::new("A1", "R1"));
    }

    #[test]
    fn credentials_debug_hides_tokens() {
        let printed = format!("{:?}", Credentials::new("secret-access", "secret-refresh"));
        assert!(!printed.contains("secret"));
    }

    #[test]
    fn login_request_omits_unused_identifier() {
        let body = serde_json::to_value(LoginRequest::with_username("alice", "secret1")).unwrap();
        assert_eq!(body, json!({"username": "alice", "password": "secret1"}));
    }

    #[test]
    fn search_filters_use_wire_names() {
        let filters = SearchFilters {
            content_type: Some(ContentType::Photo),
            sort_by: Some(SortOrder::Popular),
            category_tags: vec!["Food".into(), "Travel".into()],
            ..Default::default()
        };
        assert_eq!(
            filters.query_pairs(),
            vec![
                ("content_type", "photo".to_string()),
                ("category_tags", "Food,Travel".to_string()),
                ("sort_by", "popular".to_string()),
            ]
        );
    }
}
