use std::io::{self, Write};
use std::path::{Path, PathBuf};

use mixboard_shared::api::{self, rest::RestError};
use mixboard_shared::jwt;
use tracing::{debug, info};

use crate::AppError;
use crate::config::{
    ClientConfig, load_config, normalize_server_url, resolve_config_path, save_config,
};

const KEYRING_SERVICE: &str = "mixboard-client";

/// Keyring entry holding the bearer token for `server_url`.
pub fn keyring_entry(server_url: &str) -> Result<keyring::Entry, AppError> {
    keyring::Entry::new(KEYRING_SERVICE, &normalize_server_url(server_url))
        .map_err(|e| AppError::Keyring(e.to_string()))
}

pub fn save_token(entry: &keyring::Entry, token: &str) -> Result<(), AppError> {
    entry
        .set_password(token)
        .map_err(|e| AppError::Keyring(e.to_string()))
}

/// Stored token, or `NotLoggedIn` when the keyring has none.
pub fn load_token(entry: &keyring::Entry) -> Result<String, AppError> {
    match entry.get_password() {
        Ok(token) => Ok(token),
        Err(keyring::Error::NoEntry) => Err(AppError::NotLoggedIn),
        Err(e) => Err(AppError::Keyring(e.to_string())),
    }
}

/// Returns false if there was nothing to remove.
pub fn delete_token(entry: &keyring::Entry) -> Result<bool, AppError> {
    match entry.delete_credential() {
        Ok(()) => Ok(true),
        Err(keyring::Error::NoEntry) => Ok(false),
        Err(e) => Err(AppError::Keyring(e.to_string())),
    }
}

/// Token for the configured server.
pub fn token_for(cfg: &ClientConfig) -> Result<String, AppError> {
    let token = load_token(&keyring_entry(&cfg.server_url)?)?;
    debug!(server = %cfg.server_url, "loaded token from keyring");
    Ok(token)
}

/// Config at the resolved path, or a fresh one for `server` when none exists yet.
fn config_for_auth(
    server_arg: Option<String>,
    cfg_path_opt: Option<PathBuf>,
) -> Result<(PathBuf, ClientConfig, bool), AppError> {
    let path = resolve_config_path(cfg_path_opt)?;
    let existing = if path.exists() {
        Some(load_config(&path)?)
    } else {
        None
    };
    let server_url = match (&server_arg, &existing) {
        (Some(s), _) => normalize_server_url(s),
        (None, Some(cfg)) => cfg.server_url.clone(),
        (None, None) => normalize_server_url(&prompt("Server URL (e.g., 127.0.0.1:5151): ")?),
    };
    match existing {
        Some(mut cfg) => {
            let changed = cfg.server_url != server_url;
            cfg.server_url = server_url;
            Ok((path, cfg, changed))
        }
        None => Ok((path, ClientConfig::new(&server_url), true)),
    }
}

fn finish_auth(
    path: &Path,
    cfg: &ClientConfig,
    write_config: bool,
    token: String,
) -> Result<(), AppError> {
    let claims =
        jwt::decode_unverified(&token).map_err(|e| AppError::Http(format!("invalid token: {e}")))?;
    if write_config {
        save_config(path, cfg)?;
        info!(path = %path.display(), "wrote config");
    }
    save_token(&keyring_entry(&cfg.server_url)?, &token)?;
    println!(
        "Logged in to {} as {}; token saved in keyring",
        cfg.server_url, claims.email
    );
    Ok(())
}

pub async fn login(
    server_arg: Option<String>,
    email_arg: Option<String>,
    cfg_path_opt: Option<PathBuf>,
) -> Result<(), AppError> {
    let (path, cfg, write_config) = config_for_auth(server_arg, cfg_path_opt)?;
    let email = match email_arg {
        Some(e) => e,
        None => prompt("Email: ")?,
    };
    let password = rpassword::prompt_password("Password: ")?;
    let resp = api::rest::login(&cfg.server_url, &api::AuthReq { email, password })
        .await
        .map_err(|e| match e {
            RestError::Status { status: 401, .. } => {
                AppError::Http("login failed: wrong email or password".into())
            }
            e => AppError::Http(format!("login failed: {e}")),
        })?;
    finish_auth(&path, &cfg, write_config, resp.token)
}

pub async fn signup(
    server_arg: Option<String>,
    email_arg: Option<String>,
    display_name: Option<String>,
    cfg_path_opt: Option<PathBuf>,
) -> Result<(), AppError> {
    let (path, cfg, write_config) = config_for_auth(server_arg, cfg_path_opt)?;
    let email = match email_arg {
        Some(e) => e,
        None => prompt("Email: ")?,
    };
    let password = rpassword::prompt_password("Password: ")?;
    let again = rpassword::prompt_password("Repeat password: ")?;
    if password != again {
        return Err(AppError::Config("passwords do not match".into()));
    }
    let resp = api::rest::signup(
        &cfg.server_url,
        &api::SignupReq {
            email,
            password,
            display_name,
        },
    )
    .await
    .map_err(|e| match e {
        RestError::Status { status: 409, .. } => {
            AppError::Http("signup failed: an account with this email already exists".into())
        }
        RestError::Status { status: 400, body } => AppError::Http(format!("signup failed: {body}")),
        e => AppError::Http(format!("signup failed: {e}")),
    })?;
    finish_auth(&path, &cfg, write_config, resp.token)
}

pub fn logout(cfg_path_opt: Option<PathBuf>) -> Result<(), AppError> {
    let (_, cfg) = ClientConfig::find_and_load(cfg_path_opt)?;
    if delete_token(&keyring_entry(&cfg.server_url)?)? {
        println!("Logged out of {}", cfg.server_url);
    } else {
        println!("Not logged in");
    }
    Ok(())
}

pub async fn whoami(cfg_path_opt: Option<PathBuf>) -> Result<(), AppError> {
    let (_, cfg) = ClientConfig::find_and_load(cfg_path_opt)?;
    let token = token_for(&cfg)?;
    let me = api::rest::me(&cfg.server_url, &token)
        .await
        .map_err(crate::rest_err)?;
    match &me.display_name {
        Some(name) => println!("{name} <{}> ({})", me.email, me.id),
        None => println!("{} ({})", me.email, me.id),
    }
    Ok(())
}

fn prompt(msg: &str) -> Result<String, AppError> {
    print!("{}", msg);
    io::stdout().flush().ok();
    let mut buf = String::new();
    io::stdin().read_line(&mut buf)?;
    Ok(buf.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mock_entry() -> keyring::Entry {
        keyring::set_default_credential_builder(keyring::mock::default_credential_builder());
        keyring::Entry::new(KEYRING_SERVICE, "http://h:1").unwrap()
    }

    #[test]
    fn token_save_load_delete() {
        let entry = mock_entry();
        assert!(matches!(load_token(&entry), Err(AppError::NotLoggedIn)));
        assert!(!delete_token(&entry).unwrap());

        save_token(&entry, "tok").unwrap();
        assert_eq!(load_token(&entry).unwrap(), "tok");
        save_token(&entry, "tok2").unwrap();
        assert_eq!(load_token(&entry).unwrap(), "tok2");

        assert!(delete_token(&entry).unwrap());
        assert!(matches!(load_token(&entry), Err(AppError::NotLoggedIn)));
    }
}
