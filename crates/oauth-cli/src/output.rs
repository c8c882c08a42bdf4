//! `--output json|text` rendering, text mode colored with `owo-colors`.

use clap::ValueEnum;
use owo_colors::OwoColorize as _;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

pub fn print_token(format: OutputFormat, provider_id: &str, token: &oauth_core::TokenResponse) {
    match format {
        OutputFormat::Json => print_json(token),
        OutputFormat::Text => {
            println!("{} {}", "provider:".dimmed(), provider_id);
            println!("{} {}", "access_token:".dimmed(), token.access_token);
            println!("{} {}", "token_type:".dimmed(), token.token_type);
            if let Some(expires_in) = token.expires_in {
                println!("{} {}s", "expires_in:".dimmed(), expires_in);
            }
            if token.refresh_token.is_some() {
                println!("{}", "refresh_token: <saved>".dimmed());
            }
            println!("{}", "status: ok".green());
        }
    }
}

pub fn print_device_session(format: OutputFormat, session: &oauth_core::DeviceCodeSession) {
    match format {
        OutputFormat::Json => print_json(session_json(session)),
        OutputFormat::Text => {
            println!(
                "{} visit {} and enter code {}",
                "action required:".yellow().bold(),
                session.verification_uri,
                session.user_code.bold()
            );
            if let Some(complete) = &session.verification_uri_complete {
                println!("{} {complete}", "or open directly:".dimmed());
            }
        }
    }
}

fn session_json(session: &oauth_core::DeviceCodeSession) -> serde_json::Value {
    serde_json::json!({
        "userCode": session.user_code,
        "verificationUri": session.verification_uri,
        "verificationUriComplete": session.verification_uri_complete,
        "expiresInSecs": session.expires_in_secs,
    })
}

pub fn print_error(format: OutputFormat, err: &oauth_core::Error) {
    match format {
        OutputFormat::Json => {
            print_json(serde_json::json!({"error": err.to_string()}));
        }
        OutputFormat::Text => {
            eprintln!("{} {err}", "error:".red().bold());
        }
    }
}

pub fn print_json<T: Serialize>(value: T) {
    let mut stdout = std::io::stdout();
    let _ = serde_json::to_writer_pretty(&mut stdout, &value);
    println!();
}
