use chrono::Utc;
use clap::Subcommand;
use pawmodoro_core::backend::{Credential, KeyringIdentity};

#[derive(Subcommand)]
pub enum AuthAction {
    /// Store backend tokens in the OS keyring
    Login {
        #[arg(long)]
        username: String,
        #[arg(long)]
        access_token: String,
        #[arg(long)]
        refresh_token: Option<String>,
        /// Access token lifetime in seconds
        #[arg(long)]
        expires_in: Option<i64>,
    },
    /// Remove stored tokens
    Logout,
    /// Check login status
    Status,
}

pub fn run(action: AuthAction) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        AuthAction::Login {
            username,
            access_token,
            refresh_token,
            expires_in,
        } => {
            let credential = Credential {
                username,
                access_token,
                refresh_token,
                expires_at: expires_in.map(|secs| Utc::now().timestamp() + secs),
            };
            KeyringIdentity::store(&credential)?;
            println!("logged in as {}", credential.username);
        }
        AuthAction::Logout => {
            KeyringIdentity::clear()?;
            println!("logged out");
        }
        AuthAction::Status => {
            let status = match KeyringIdentity::stored()? {
                Some(credential) => serde_json::json!({
                    "logged_in": true,
                    "username": credential.username,
                    "expires_at": credential.expires_at,
                    "needs_refresh": credential.needs_refresh(),
                }),
                None => serde_json::json!({ "logged_in": false }),
            };
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }
    Ok(())
}
