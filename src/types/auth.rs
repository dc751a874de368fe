// src/types/auth.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::serde_util::lenient_time;

/// Form body for `auth/login` (OAuth2 password form).
#[derive(Serialize, Clone, Debug)]
pub struct LoginCredentials {
    pub username: String,
    pub password: String,
}

#[derive(Serialize, Clone, Debug)]
pub struct Registration {
    pub username: String,
    pub email: String,
    pub password: String,
}

impl Registration {
    pub fn credentials(&self) -> LoginCredentials {
        LoginCredentials {
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct TokenPair {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
}

#[derive(Serialize, Debug)]
pub struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Guest,
    #[default]
    User,
    Admin,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub role: UserRole,
    #[serde(default = "Utc::now", with = "lenient_time")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_login: Option<String>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }
}
