//! Command-line interface of the `noteo` binary.

use clap::{Parser, Subcommand};

use noteo_common::error::AppError;
use noteo_common::types::RecipientId;

use crate::middleware::auth::encode_jwt;

/// Default lifetime of an issued management token.
pub const DEFAULT_TOKEN_HOURS: u64 = 24;

/// Noteo notification relay.
#[derive(Parser, Debug)]
#[command(name = "noteo", about = "Relay project events to Telegram subscribers")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Run the HTTP server (the default).
    Serve,
    /// Print a management API token for a recipient, signed with NOTEO_JWT_SECRET.
    Token {
        /// Telegram id of the recipient the token authenticates.
        recipient_id: RecipientId,

        /// Hours until the token expires.
        #[arg(long, default_value_t = DEFAULT_TOKEN_HOURS, value_parser = clap::value_parser!(u64).range(1..=8760))]
        hours: u64,
    },
}

impl Cli {
    /// The subcommand to run; `serve` when none was given.
    pub fn command(&self) -> &Command {
        self.command.as_ref().unwrap_or(&Command::Serve)
    }
}

/// Issue a management JWT for `recipient_id`.
pub fn issue_token(recipient_id: RecipientId, secret: &str, hours: u64) -> Result<String, AppError> {
    encode_jwt(recipient_id, secret, hours)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::auth::decode_jwt;

    #[test]
    fn test_no_subcommand_serves() {
        let cli = Cli::try_parse_from(["noteo"]).unwrap();
        assert_eq!(cli.command(), &Command::Serve);
    }

    #[test]
    fn test_token_subcommand() {
        let cli = Cli::try_parse_from(["noteo", "token", "42"]).unwrap();
        assert_eq!(
            cli.command(),
            &Command::Token {
                recipient_id: RecipientId::new(42).unwrap(),
                hours: DEFAULT_TOKEN_HOURS,
            }
        );

        let cli = Cli::try_parse_from(["noteo", "token", "42", "--hours", "2"]).unwrap();
        assert!(matches!(cli.command(), Command::Token { hours: 2, .. }));
    }

    #[test]
    fn test_token_subcommand_rejects_bad_input() {
        assert!(Cli::try_parse_from(["noteo", "token", "0"]).is_err());
        assert!(Cli::try_parse_from(["noteo", "token", "abc"]).is_err());
        assert!(Cli::try_parse_from(["noteo", "token"]).is_err());
        assert!(Cli::try_parse_from(["noteo", "token", "42", "--hours", "0"]).is_err());
    }

    #[test]
    fn test_issued_token_authenticates_recipient() {
        let recipient = RecipientId::new(42).unwrap();
        let token = issue_token(recipient, "cli-secret", 1).unwrap();

        let claims = decode_jwt(&token, "cli-secret").unwrap();
        assert_eq!(claims.sub, "42");
        assert_eq!(claims.exp - claims.iat, 3600);
        assert!(decode_jwt(&token, "other-secret").is_err());
    }
}
