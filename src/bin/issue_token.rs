//! Mint a session token for a user.
//!
//! Users sign in upstream of this service, so operators and trusted callers
//! use this to get a token the API accepts as the `access_token` cookie or a
//! Bearer header.
//!
//! ## Usage
//! `issue_token <user_id>` with `JWT_SECRET` set (a `.env` file works too).

use serde::Deserialize;
use std::process::ExitCode;

use crosspost::services::session::create_access_token;

#[derive(Deserialize)]
struct TokenConfig {
    jwt_secret: String,
}

fn issue(arg: Option<String>, secret: &str) -> Result<String, String> {
    let user_id = arg
        .as_deref()
        .and_then(|a| a.parse::<i64>().ok())
        .filter(|id| *id > 0)
        .ok_or_else(|| "Usage: issue_token <user_id>".to_string())?;
    create_access_token(user_id, secret.as_bytes()).map_err(|e| format!("Failed to issue token: {}", e))
}

fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let config = match envy::from_env::<TokenConfig>() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("JWT_SECRET is required: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match issue(std::env::args().nth(1), &config.jwt_secret) {
        Ok(token) => {
            println!("{}", token);
            ExitCode::SUCCESS
        }
        Err(message) => {
            eprintln!("{}", message);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crosspost::services::session::validate_access_token;

    #[test]
    fn test_issued_token_validates_for_the_user() {
        let token = issue(Some("42".into()), "secret").unwrap();
        assert_eq!(validate_access_token(&token, b"secret"), Ok(42));
    }

    #[test]
    fn test_bad_user_id_prints_usage() {
        assert!(issue(None, "secret").unwrap_err().starts_with("Usage"));
        assert!(issue(Some("abc".into()), "secret").is_err());
        assert!(issue(Some("0".into()), "secret").is_err());
    }
}
