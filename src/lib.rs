use std::sync::Arc;

use reqwest::blocking::Client;
use reqwest::cookie::Jar;
use reqwest::header::LOCATION;
use reqwest::redirect;
use scraper::{Html, Selector};
use serde::Deserialize;
use url::Url;
use uuid::Uuid;

pub mod api;
pub mod config;
pub mod error;
pub mod output;

use api::UserInfo;
use error::{ApiError, Result};

const AUTH_BASE_URL: &str = "https://vandebron.nl";
const API_BASE_URL: &str = "https://mijn.vandebron.nl";

const AUTH_PATH: &str = "/auth/realms/vandebron/protocol/openid-connect/auth";
const TOKEN_PATH: &str = "/auth/realms/vandebron/protocol/openid-connect/token";
const USER_INFO_PATH: &str = "/api/authentication/userinfo";

/// The portal only issues tokens to its own website client.
const CLIENT_ID: &str = "website";
const REDIRECT_URI: &str = "https://mijn.vandebron.nl/";

/// Authorized access to the portal API. Components take this as a trait
/// object so they can be exercised against canned transports.
pub trait ApiClient {
    fn http_get(&self, path: &str, query: &[(String, String)]) -> Result<String>;
}

/// A logged-in (or about to be logged-in) portal session.
///
/// The portal has no token endpoint for third parties; `login` replays the
/// browser's OpenID-Connect authorization-code dance, HTML login form
/// included. The whole exchange rides on one cookie jar.
pub struct VandebronApi {
    username: String,
    password: String,
    auth_base_url: String,
    api_base_url: String,

    /// Default client, follows redirects.
    http: Client,
    /// Shares the cookie jar with `http` but never follows redirects. Used
    /// for the credential POST only: the next hop's `Location` fragment
    /// carries the authorization code and would be lost to an auto-follow.
    http_no_redirect: Client,

    token: Option<String>,
    user: Option<UserInfo>,
}

impl VandebronApi {
    pub fn new(username: String, password: String) -> Result<Self> {
        let jar = Arc::new(Jar::default());
        let http = Client::builder().cookie_provider(Arc::clone(&jar)).build()?;
        let http_no_redirect = Client::builder()
            .cookie_provider(jar)
            .redirect(redirect::Policy::none())
            .build()?;

        Ok(VandebronApi {
            username,
            password,
            auth_base_url: AUTH_BASE_URL.to_string(),
            api_base_url: API_BASE_URL.to_string(),
            http,
            http_no_redirect,
            token: None,
            user: None,
        })
    }

    pub fn with_auth_base_url(mut self, base_url: String) -> Self {
        self.auth_base_url = base_url;
        self
    }

    pub fn with_api_base_url(mut self, base_url: String) -> Self {
        self.api_base_url = base_url;
        self
    }

    /// Run the full login sequence and keep the resulting token and user
    /// identity on the session. Strictly sequential, no retry: the first
    /// failing step aborts.
    pub fn login(&mut self) -> Result<()> {
        let form_url = self.authorize_form_url()?;
        let code = self.submit_login(&form_url)?;
        let token = self.exchange_code(&code)?;
        let user = self.fetch_user(&token)?;

        tracing::info!(user_id = %user.user_id, org_id = %user.org_id, "logged in");

        self.token = Some(token);
        self.user = Some(user);
        Ok(())
    }

    /// Identity of the logged-in user.
    pub fn user(&self) -> Result<&UserInfo> {
        self.user
            .as_ref()
            .ok_or_else(|| ApiError::Auth("not logged in".to_string()))
    }

    /// Steps 1 and 2 of the login dance: request the hosted login page and
    /// pull the form submission URL out of it. `state` and `nonce` are
    /// fresh v4 UUIDs, used once; the server expects them but we never
    /// check them on the way back (neither does it).
    fn authorize_form_url(&self) -> Result<String> {
        let state = Uuid::new_v4().to_string();
        let nonce = Uuid::new_v4().to_string();

        let url = format!("{}{}", self.auth_base_url, AUTH_PATH);
        let response = self
            .http
            .get(&url)
            .query(&[
                ("client_id", CLIENT_ID),
                ("redirect_uri", REDIRECT_URI),
                ("state", state.as_str()),
                ("response_mode", "fragment"),
                ("response_type", "code"),
                ("scope", "openid"),
                ("nonce", nonce.as_str()),
            ])
            .send()?;

        let status = response.status();
        let body = response.text()?;
        if !status.is_success() {
            tracing::error!(%status, body, "authorization request rejected");
            return Err(ApiError::Transport { status, body });
        }

        form_action(&body)
    }

    /// Steps 3 and 4: POST the credentials to the extracted form URL and
    /// read the authorization code from the redirect we refuse to follow.
    fn submit_login(&self, form_url: &str) -> Result<String> {
        let response = self
            .http_no_redirect
            .post(form_url)
            .form(&[
                ("username", self.username.as_str()),
                ("password", self.password.as_str()),
                ("login", "Log in"),
            ])
            .send()?;

        let status = response.status();
        if !status.is_redirection() {
            // The portal re-renders the login page on bad credentials.
            return Err(ApiError::Auth(format!(
                "login was not accepted (status {status})"
            )));
        }

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| {
                ApiError::Auth("login response carries no Location header".to_string())
            })?;

        code_from_redirect(location)
    }

    /// Step 5: trade the authorization code for a bearer token.
    fn exchange_code(&self, code: &str) -> Result<String> {
        let url = format!("{}{}", self.auth_base_url, TOKEN_PATH);
        let response = self
            .http
            .post(&url)
            .form(&[
                ("grant_type", "authorization_code"),
                ("client_id", CLIENT_ID),
                ("code", code),
                ("redirect_uri", REDIRECT_URI),
            ])
            .send()?;

        let status = response.status();
        let body = response.text()?;
        if !status.is_success() {
            tracing::error!(%status, body, "token exchange rejected");
            return Err(ApiError::Transport { status, body });
        }

        let reply: serde_json::Value = serde_json::from_str(&body)?;
        reply
            .get("access_token")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ApiError::Auth("token response carries no access_token".to_string()))
    }

    /// Step 6: resolve who we just logged in as.
    fn fetch_user(&self, token: &str) -> Result<UserInfo> {
        #[derive(Deserialize)]
        struct UserInfoReply {
            id: String,
            #[serde(rename = "organizationId")]
            organization_id: String,
        }

        let url = format!("{}{}", self.api_base_url, USER_INFO_PATH);
        let response = self.http.get(&url).bearer_auth(token).send()?;

        let status = response.status();
        let body = response.text()?;
        if !status.is_success() {
            tracing::error!(%status, body, "userinfo request rejected");
            return Err(ApiError::Transport { status, body });
        }

        let reply: UserInfoReply = serde_json::from_str(&body)?;
        Ok(UserInfo {
            user_id: reply.id,
            org_id: reply.organization_id,
        })
    }
}

impl ApiClient for VandebronApi {
    fn http_get(&self, path: &str, query: &[(String, String)]) -> Result<String> {
        let token = self
            .token
            .as_deref()
            .ok_or_else(|| ApiError::Auth("not logged in".to_string()))?;

        let url = format!("{}{}", self.api_base_url, path);
        tracing::debug!(%url, "GET");

        let response = self
            .http
            .get(&url)
            .query(&query)
            .bearer_auth(token)
            .send()?;

        let status = response.status();
        let body = response.text()?;
        if !status.is_success() {
            // The error body typically names the offending parameter, so
            // log it before the error propagates.
            tracing::error!(%status, %url, body, "request failed");
            return Err(ApiError::Transport { status, body });
        }

        Ok(body)
    }
}

/// `action` attribute of the first form on the login page.
fn form_action(html: &str) -> Result<String> {
    let document = Html::parse_document(html);
    let form = Selector::parse("form")
        .map_err(|e| ApiError::Parse(format!("form selector: {e}")))?;

    document
        .select(&form)
        .next()
        .and_then(|element| element.value().attr("action"))
        .map(str::to_string)
        .ok_or_else(|| ApiError::Parse("login page carries no form action".to_string()))
}

/// The authorization code arrives as `code=...` inside the URL fragment of
/// the post-login redirect, query-string encoded.
fn code_from_redirect(location: &str) -> Result<String> {
    let url = Url::parse(location)
        .map_err(|e| ApiError::Parse(format!("redirect location is not a URL: {e}")))?;
    let fragment = url
        .fragment()
        .ok_or_else(|| ApiError::Parse("redirect location carries no fragment".to_string()))?;

    for (key, value) in url::form_urlencoded::parse(fragment.as_bytes()) {
        if key == "code" {
            return Ok(value.into_owned());
        }
    }
    Err(ApiError::Parse(
        "no authorization code in redirect fragment".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn form_action_finds_the_first_form() {
        let html = r#"
            <html><body>
              <div id="kc-content">
                <form id="kc-form-login" action="https://vandebron.nl/auth/login-actions/authenticate?tab_id=x" method="post">
                  <input name="username">
                </form>
                <form action="https://vandebron.nl/other"></form>
              </div>
            </body></html>
        "#;
        assert_eq!(
            form_action(html).unwrap(),
            "https://vandebron.nl/auth/login-actions/authenticate?tab_id=x"
        );
    }

    #[test]
    fn form_action_without_form_is_a_parse_error() {
        let html = "<html><body><p>maintenance</p></body></html>";
        assert!(matches!(form_action(html), Err(ApiError::Parse(_))));
    }

    #[test]
    fn code_is_read_from_the_location_fragment() {
        let location = "https://mijn.vandebron.nl/#state=abc&session_state=def&code=secret-code";
        assert_eq!(code_from_redirect(location).unwrap(), "secret-code");
    }

    #[test]
    fn missing_code_in_fragment_is_a_parse_error() {
        let location = "https://mijn.vandebron.nl/#state=abc&session_state=def";
        assert!(matches!(
            code_from_redirect(location),
            Err(ApiError::Parse(_))
        ));
    }

    #[test]
    fn fragmentless_location_is_a_parse_error() {
        let location = "https://mijn.vandebron.nl/";
        assert!(matches!(
            code_from_redirect(location),
            Err(ApiError::Parse(_))
        ));
    }
}
