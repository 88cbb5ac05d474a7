//! Minimal REST client helpers for consumers (clients).

use super::endpoints as ep;
use super::*;
use crate::domain::{Mix, MixTemplate, UserProfile};
use once_cell::sync::Lazy;
use std::time::Duration;

pub use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum RestError {
    #[error("http: {0}")]
    Http(String),
    #[error("status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("serde: {0}")]
    Serde(String),
}

static HTTP_CLIENT: Lazy<reqwest::Client> = Lazy::new(|| {
    reqwest::Client::builder()
        // Keep TCP connections alive at kernel level
        .tcp_keepalive(Some(Duration::from_secs(180)))
        .pool_max_idle_per_host(4)
        .pool_idle_timeout(Duration::from_secs(180))
        .timeout(Duration::from_secs(30))
        .build()
        .expect("failed to build HTTP client")
});

// Streams stay open indefinitely, so only the connect phase is bounded.
static STREAM_CLIENT: Lazy<reqwest::Client> = Lazy::new(|| {
    reqwest::Client::builder()
        .tcp_keepalive(Some(Duration::from_secs(60)))
        .connect_timeout(Duration::from_secs(15))
        .build()
        .expect("failed to build streaming HTTP client")
});

fn mk_client() -> Result<reqwest::Client, RestError> {
    Ok(HTTP_CLIENT.clone())
}

async fn check_status(res: reqwest::Response) -> Result<reqwest::Response, RestError> {
    let status = res.status();
    if !status.is_success() {
        let body = res.text().await.unwrap_or_default();
        return Err(RestError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(res)
}

async fn handle_json<T: for<'de> serde::Deserialize<'de>>(
    res: reqwest::Response,
) -> Result<T, RestError> {
    check_status(res)
        .await?
        .json::<T>()
        .await
        .map_err(|e| RestError::Serde(e.to_string()))
}

async fn handle_empty(res: reqwest::Response) -> Result<(), RestError> {
    check_status(res).await.map(|_| ())
}

fn http_err(e: reqwest::Error) -> RestError {
    RestError::Http(e.to_string())
}

pub async fn login(base: &str, req: &AuthReq) -> Result<AuthResp, RestError> {
    let client = mk_client()?;
    let res = client
        .post(ep::auth_login(base))
        .json(req)
        .send()
        .await
        .map_err(http_err)?;
    handle_json(res).await
}

pub async fn signup(base: &str, req: &SignupReq) -> Result<AuthResp, RestError> {
    let client = mk_client()?;
    let res = client
        .post(ep::auth_signup(base))
        .json(req)
        .send()
        .await
        .map_err(http_err)?;
    handle_json(res).await
}

pub async fn me(base: &str, bearer: &str) -> Result<UserProfile, RestError> {
    let client = mk_client()?;
    let res = client
        .get(ep::me(base))
        .bearer_auth(bearer)
        .send()
        .await
        .map_err(http_err)?;
    handle_json(res).await
}

pub async fn list_mixes(
    base: &str,
    bearer: &str,
    owner_id: Option<&str>,
) -> Result<Vec<Mix>, RestError> {
    let client = mk_client()?;
    let url = match owner_id {
        Some(o) => ep::mixes_by_owner(base, o),
        None => ep::mixes(base),
    };
    let res = client
        .get(url)
        .bearer_auth(bearer)
        .send()
        .await
        .map_err(http_err)?;
    handle_json(res).await
}

pub async fn get_mix(base: &str, bearer: &str, mix_id: &str) -> Result<Mix, RestError> {
    let client = mk_client()?;
    let res = client
        .get(ep::mix(base, mix_id))
        .bearer_auth(bearer)
        .send()
        .await
        .map_err(http_err)?;
    handle_json(res).await
}

pub async fn create_mix(base: &str, bearer: &str, req: &CreateMixReq) -> Result<Mix, RestError> {
    let client = mk_client()?;
    let res = client
        .post(ep::mixes(base))
        .bearer_auth(bearer)
        .json(req)
        .send()
        .await
        .map_err(http_err)?;
    handle_json(res).await
}

pub async fn create_mix_from_template(
    base: &str,
    bearer: &str,
    template_id: &str,
) -> Result<Mix, RestError> {
    let client = mk_client()?;
    let body = CreateFromTemplateReq {
        template_id: template_id.to_string(),
    };
    let res = client
        .post(ep::mixes_from_template(base))
        .bearer_auth(bearer)
        .json(&body)
        .send()
        .await
        .map_err(http_err)?;
    handle_json(res).await
}

pub async fn advance_mix(
    base: &str,
    bearer: &str,
    mix_id: &str,
    from_index: usize,
) -> Result<Mix, RestError> {
    let client = mk_client()?;
    let res = client
        .post(ep::mix_advance(base, mix_id))
        .bearer_auth(bearer)
        .json(&AdvanceReq { from_index })
        .send()
        .await
        .map_err(http_err)?;
    handle_json(res).await
}

pub async fn update_mix(
    base: &str,
    bearer: &str,
    mix_id: &str,
    req: &UpdateMixReq,
) -> Result<Mix, RestError> {
    let client = mk_client()?;
    let res = client
        .patch(ep::mix(base, mix_id))
        .bearer_auth(bearer)
        .json(req)
        .send()
        .await
        .map_err(http_err)?;
    handle_json(res).await
}

pub async fn delete_mix(base: &str, bearer: &str, mix_id: &str) -> Result<(), RestError> {
    let client = mk_client()?;
    let res = client
        .delete(ep::mix(base, mix_id))
        .bearer_auth(bearer)
        .send()
        .await
        .map_err(http_err)?;
    handle_empty(res).await
}

pub async fn save_mix_as_template(
    base: &str,
    bearer: &str,
    mix_id: &str,
    template_name: &str,
) -> Result<MixTemplate, RestError> {
    let client = mk_client()?;
    let body = SaveAsTemplateReq {
        template_name: template_name.to_string(),
    };
    let res = client
        .post(ep::mix_save_template(base, mix_id))
        .bearer_auth(bearer)
        .json(&body)
        .send()
        .await
        .map_err(http_err)?;
    handle_json(res).await
}

pub async fn list_templates(base: &str, bearer: &str) -> Result<Vec<MixTemplate>, RestError> {
    let client = mk_client()?;
    let res = client
        .get(ep::templates(base))
        .bearer_auth(bearer)
        .send()
        .await
        .map_err(http_err)?;
    handle_json(res).await
}

pub async fn create_template(
    base: &str,
    bearer: &str,
    req: &CreateTemplateReq,
) -> Result<MixTemplate, RestError> {
    let client = mk_client()?;
    let res = client
        .post(ep::templates(base))
        .bearer_auth(bearer)
        .json(req)
        .send()
        .await
        .map_err(http_err)?;
    handle_json(res).await
}

pub async fn delete_template(base: &str, bearer: &str, template_id: &str) -> Result<(), RestError> {
    let client = mk_client()?;
    let res = client
        .delete(ep::template(base, template_id))
        .bearer_auth(bearer)
        .send()
        .await
        .map_err(http_err)?;
    handle_empty(res).await
}

/// Opens the server-sent-events mix stream. The caller reads the body.
pub async fn open_mix_stream(
    base: &str,
    bearer: &str,
    mix_id: Option<&str>,
) -> Result<reqwest::Response, RestError> {
    let res = STREAM_CLIENT
        .get(ep::mixes_stream(base, mix_id))
        .bearer_auth(bearer)
        .header(reqwest::header::ACCEPT, "text/event-stream")
        .send()
        .await
        .map_err(http_err)?;
    check_status(res).await
}
