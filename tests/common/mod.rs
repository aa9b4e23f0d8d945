use constcat::concat;
use reqwest::StatusCode;
use restaurant_voting::api;
use serde_json::json;
use uuid::Uuid;

const BASE_URL: &str = "http://localhost:3000";

/// Generates an email unseen by previous test runs.
pub fn unique_email(name: &str) -> String {
    format!("{name}-{}@restaurant.test", Uuid::new_v4())
}

pub struct Client {
    inner: reqwest::Client,
    pub auth_token: Option<String>,
}

impl Client {
    pub fn new() -> Self {
        Self {
            inner: reqwest::Client::new(),
            auth_token: None,
        }
    }

    pub async fn register(
        &self,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<api::User, StatusCode> {
        const URL: &str = concat!(BASE_URL, "/user");

        Ok(self
            .inner
            .post(URL)
            .json(&json!({
                "name": name,
                "email": email,
                "password": password,
            }))
            .send()
            .await
            .expect("failed to send a request")
            .error_for_status()
            .map_err(|e| e.status().expect("status error"))?
            .json::<api::User>()
            .await
            .expect("failed to get a response"))
    }

    pub async fn auth(mut self, email: &str, password: &str) -> Self {
        const URL: &str = concat!(BASE_URL, "/auth");

        self.auth_token = Some(
            self.inner
                .post(URL)
                .json(&json!({
                    "email": email,
                    "password": password,
                }))
                .send()
                .await
                .expect("failed to send a request")
                .error_for_status()
                .expect("wrong status code")
                .text()
                .await
                .expect("failed to get a response"),
        );

        self
    }

    pub async fn try_auth(
        &self,
        email: &str,
        password: &str,
    ) -> Result<String, StatusCode> {
        const URL: &str = concat!(BASE_URL, "/auth");

        Ok(self
            .inner
            .post(URL)
            .json(&json!({
                "email": email,
                "password": password,
            }))
            .send()
            .await
            .expect("failed to send a request")
            .error_for_status()
            .map_err(|e| e.status().expect("status error"))?
            .text()
            .await
            .expect("failed to get a response"))
    }

    pub async fn user(&self) -> Result<api::User, StatusCode> {
        const URL: &str = concat!(BASE_URL, "/user");

        let mut req = self.inner.get(URL);
        if let Some(token) = &self.auth_token {
            req = req.header("Authorization", format!("Bearer {token}"));
        }
        Ok(req
            .send()
            .await
            .expect("failed to send a request")
            .error_for_status()
            .map_err(|e| e.status().expect("status error"))?
            .json::<api::User>()
            .await
            .expect("failed to get a response"))
    }

    pub async fn user_raw(&self) -> Result<serde_json::Value, StatusCode> {
        const URL: &str = concat!(BASE_URL, "/user");

        let mut req = self.inner.get(URL);
        if let Some(token) = &self.auth_token {
            req = req.header("Authorization", format!("Bearer {token}"));
        }
        Ok(req
            .send()
            .await
            .expect("failed to send a request")
            .error_for_status()
            .map_err(|e| e.status().expect("status error"))?
            .json::<serde_json::Value>()
            .await
            .expect("failed to get a response"))
    }

    pub async fn restaurants(
        &self,
    ) -> Result<Vec<api::Restaurant>, StatusCode> {
        const URL: &str = concat!(BASE_URL, "/restaurant");

        let mut req = self.inner.get(URL);
        if let Some(token) = &self.auth_token {
            req = req.header("Authorization", format!("Bearer {token}"));
        }
        Ok(req
            .send()
            .await
            .expect("failed to send a request")
            .error_for_status()
            .map_err(|e| e.status().expect("status error"))?
            .json::<Vec<api::Restaurant>>()
            .await
            .expect("failed to get a response"))
    }

    pub async fn vote(
        &self,
        restaurant_id: api::restaurant::Id,
    ) -> Result<api::Vote, StatusCode> {
        const URL: &str = concat!(BASE_URL, "/vote");

        let mut req = self.inner.post(URL);
        if let Some(token) = &self.auth_token {
            req = req.header("Authorization", format!("Bearer {token}"));
        }
        Ok(req
            .json(&json!({
                "restaurantId": restaurant_id,
            }))
            .send()
            .await
            .expect("failed to send a request")
            .error_for_status()
            .map_err(|e| e.status().expect("status error"))?
            .json::<api::Vote>()
            .await
            .expect("failed to get a response"))
    }

    pub async fn set_user_roles(
        &self,
        id: api::user::Id,
        roles: &[api::user::Role],
    ) -> Result<api::User, StatusCode> {
        const URL: &str = concat!(BASE_URL, "/user");

        let mut req = self.inner.patch(format!("{URL}/{id}"));
        if let Some(token) = &self.auth_token {
            req = req.header("Authorization", format!("Bearer {token}"));
        }
        Ok(req
            .json(&json!({
                "op": "setRoles",
                "data": {
                    "roles": roles,
                }
            }))
            .send()
            .await
            .expect("failed to send a request")
            .error_for_status()
            .map_err(|e| e.status().expect("status error"))?
            .json::<api::User>()
            .await
            .expect("failed to get a response"))
    }

    pub async fn enable_user(
        &self,
        id: api::user::Id,
    ) -> Result<api::User, StatusCode> {
        const URL: &str = concat!(BASE_URL, "/user");

        let mut req = self.inner.patch(format!("{URL}/{id}"));
        if let Some(token) = &self.auth_token {
            req = req.header("Authorization", format!("Bearer {token}"));
        }
        Ok(req
            .json(&json!({
                "op": "enable",
            }))
            .send()
            .await
            .expect("failed to send a request")
            .error_for_status()
            .map_err(|e| e.status().expect("status error"))?
            .json::<api::User>()
            .await
            .expect("failed to get a response"))
    }

    pub async fn disable_user(
        &self,
        id: api::user::Id,
    ) -> Result<api::User, StatusCode> {
        const URL: &str = concat!(BASE_URL, "/user");

        let mut req = self.inner.patch(format!("{URL}/{id}"));
        if let Some(token) = &self.auth_token {
            req = req.header("Authorization", format!("Bearer {token}"));
        }
        Ok(req
            .json(&json!({
                "op": "disable",
            }))
            .send()
            .await
            .expect("failed to send a request")
            .error_for_status()
            .map_err(|e| e.status().expect("status error"))?
            .json::<api::User>()
            .await
            .expect("failed to get a response"))
    }
}
