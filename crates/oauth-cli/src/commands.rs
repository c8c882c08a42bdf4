//! Subcommand implementations. Each takes its parsed args plus the shared [`TokenStore`] and
//! returns a plain [`anyhow::Result`]; `main` maps any `oauth_core::Error` inside it to the exit
//! code the engine assigns, and anything else to exit code 1.

use crate::output::{self, OutputFormat};
use crate::provider_args::ProviderArgs;
use anyhow::{Context as _, bail};
use clap::{Args, Subcommand, ValueEnum};
use oauth_core::{Grant, GrantContext, ImplicitResponseType, ProviderRecord, StoredToken, TokenStore};

const DEFAULT_CALLBACK_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(300);

/// The `--scope` flag wins when present; otherwise fall back to the provider's configured
/// `default_scopes` so a value set via the config file or `<PROVIDER>_SCOPE` still takes effect.
fn effective_scope(explicit: Option<String>, provider: &ProviderRecord) -> Option<String> {
    explicit.or_else(|| {
        if provider.default_scopes.is_empty() {
            None
        } else {
            Some(provider.default_scopes.join(" "))
        }
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PreferredGrant {
    AuthorizationCode,
    DeviceCode,
    Implicit,
}

#[derive(Debug, Args)]
pub struct AuthArgs {
    #[command(flatten)]
    pub provider: ProviderArgs,
    /// Force a specific interactive grant instead of the automatic preference order
    /// (authorization-code, then device-code).
    #[arg(long, value_enum)]
    pub grant: Option<PreferredGrant>,
}

#[derive(Debug, Subcommand)]
pub enum GrantCommand {
    AuthorizationCode(ProviderArgs),
    ClientCredentials(ProviderArgs),
    Password {
        #[command(flatten)]
        provider: ProviderArgs,
        #[arg(long, env = "OAUTH_USERNAME")]
        username: String,
        #[arg(long, env = "OAUTH_PASSWORD")]
        password: String,
    },
    DeviceCode(ProviderArgs),
    Implicit(ProviderArgs),
    Refresh {
        #[command(flatten)]
        provider: ProviderArgs,
        #[arg(long)]
        refresh_token: Option<String>,
    },
}

#[derive(Debug, Args)]
pub struct RefreshArgs {
    #[command(flatten)]
    pub provider: ProviderArgs,
    #[arg(long)]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Args)]
pub struct InspectArgs {
    /// Token to decode. If omitted, decodes the access token stored for `--provider`.
    pub token: Option<String>,
    #[arg(long)]
    pub provider: Option<String>,
}

#[derive(Debug, Args)]
pub struct RevokeArgs {
    #[command(flatten)]
    pub provider: ProviderArgs,
    pub token: String,
    #[arg(long)]
    pub token_type_hint: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum TokensCommand {
    List,
    Clear,
    Remove { provider: String },
}

pub async fn auth(args: AuthArgs, store: &TokenStore, cfg: &crate::config::CliConfig, format: OutputFormat) -> anyhow::Result<()> {
    let provider = args.provider.resolve(cfg)?;
    let ctx = grant_context();

    let scope = effective_scope(args.provider.scope(), &provider);
    let grant = match args.grant {
        Some(PreferredGrant::Implicit) => {
            if !args.provider.allow_implicit {
                bail!("the implicit grant is deprecated; pass --allow-implicit to select it explicitly");
            }
            #[allow(deprecated)]
            Grant::Implicit {
                redirect_uri: args.provider.redirect_uri(),
                scope,
                response_type: ImplicitResponseType::Token,
                callback_timeout: DEFAULT_CALLBACK_TIMEOUT,
            }
        }
        Some(PreferredGrant::DeviceCode) => device_code_grant(scope, format),
        Some(PreferredGrant::AuthorizationCode) => Grant::AuthorizationCode {
            redirect_uri: args.provider.redirect_uri(),
            scope,
            use_pkce: !args.provider.no_pkce,
            nonce: None,
            callback_timeout: DEFAULT_CALLBACK_TIMEOUT,
        },
        None if provider.authorization_url.is_some() => Grant::AuthorizationCode {
            redirect_uri: args.provider.redirect_uri(),
            scope,
            use_pkce: !args.provider.no_pkce,
            nonce: None,
            callback_timeout: DEFAULT_CALLBACK_TIMEOUT,
        },
        None if provider.device_authorization_url.is_some() => device_code_grant(scope, format),
        None => bail!(
            "provider '{}' exposes neither an authorization_url nor a device_authorization_url",
            provider.id
        ),
    };

    let outcome = oauth_core::grant::run(grant, &provider, &ctx).await?;
    store.store(&provider.id, outcome.token.clone())?;
    output::print_token(format, &provider.id, &outcome.token);
    Ok(())
}

fn device_code_grant(scope: Option<String>, format: OutputFormat) -> Grant {
    Grant::DeviceCode {
        scope,
        on_session: Box::new(move |session| output::print_device_session(format, session)),
    }
}

pub async fn token(grant: GrantCommand, store: &TokenStore, cfg: &crate::config::CliConfig, format: OutputFormat) -> anyhow::Result<()> {
    let ctx = grant_context();
    let (provider, grant) = match grant {
        GrantCommand::AuthorizationCode(p) => {
            let provider = p.resolve(cfg)?;
            let redirect_uri = p.redirect_uri();
            let scope = effective_scope(p.scope(), &provider);
            let use_pkce = !p.no_pkce;
            (
                provider,
                Grant::AuthorizationCode {
                    redirect_uri,
                    scope,
                    use_pkce,
                    nonce: None,
                    callback_timeout: DEFAULT_CALLBACK_TIMEOUT,
                },
            )
        }
        GrantCommand::ClientCredentials(p) => {
            let provider = p.resolve(cfg)?;
            let scope = effective_scope(p.scope(), &provider);
            (provider, Grant::ClientCredentials { scope })
        }
        GrantCommand::Password {
            provider: p,
            username,
            password,
        } => {
            let provider = p.resolve(cfg)?;
            let scope = effective_scope(p.scope(), &provider);
            (
                provider,
                Grant::Password {
                    username,
                    password,
                    scope,
                },
            )
        }
        GrantCommand::DeviceCode(p) => {
            let provider = p.resolve(cfg)?;
            let scope = effective_scope(p.scope(), &provider);
            (provider, device_code_grant(scope, format))
        }
        GrantCommand::Implicit(p) => {
            if !p.allow_implicit {
                bail!("the implicit grant is deprecated; pass --allow-implicit to select it explicitly");
            }
            let provider = p.resolve(cfg)?;
            let redirect_uri = p.redirect_uri();
            let scope = effective_scope(p.scope(), &provider);
            #[allow(deprecated)]
            let grant = Grant::Implicit {
                redirect_uri,
                scope,
                response_type: ImplicitResponseType::Token,
                callback_timeout: DEFAULT_CALLBACK_TIMEOUT,
            };
            (provider, grant)
        }
        GrantCommand::Refresh {
            provider: p,
            refresh_token,
        } => {
            let refresh_token = resolve_refresh_token(refresh_token, &p.provider, store)?;
            let provider = p.resolve(cfg)?;
            let scope = effective_scope(p.scope(), &provider);
            (provider, Grant::Refresh { refresh_token, scope })
        }
    };

    let outcome = oauth_core::grant::run(grant, &provider, &ctx).await?;

    let previous = store.get(&provider.id)?;
    let stored = match previous {
        Some(prev) => prev.refreshed(outcome.token.clone()),
        None => StoredToken::new(&provider.id, outcome.token.clone()),
    };
    store.store_entry(stored)?;
    output::print_token(format, &provider.id, &outcome.token);
    Ok(())
}

pub async fn refresh(args: RefreshArgs, store: &TokenStore, cfg: &crate::config::CliConfig, format: OutputFormat) -> anyhow::Result<()> {
    let provider = args.provider.resolve(cfg)?;
    let refresh_token = resolve_refresh_token(args.refresh_token, &provider.id, store)?;
    let ctx = grant_context();

    let scope = effective_scope(args.provider.scope(), &provider);
    let outcome = oauth_core::grant::run(Grant::Refresh { refresh_token, scope }, &provider, &ctx).await?;

    let previous = store.get(&provider.id)?;
    let stored = match previous {
        Some(prev) => prev.refreshed(outcome.token.clone()),
        None => StoredToken::new(&provider.id, outcome.token.clone()),
    };
    store.store_entry(stored)?;
    output::print_token(format, &provider.id, &outcome.token);
    Ok(())
}

fn resolve_refresh_token(
    explicit: Option<String>,
    provider_id: &str,
    store: &TokenStore,
) -> anyhow::Result<String> {
    if let Some(token) = explicit {
        return Ok(token);
    }
    let stored = store
        .get(provider_id)?
        .context(format!("no stored token for provider '{provider_id}'; pass --refresh-token"))?;
    stored
        .token
        .refresh_token
        .context(format!("stored token for '{provider_id}' has no refresh_token"))
}

pub fn inspect(args: InspectArgs, store: &TokenStore, format: OutputFormat) -> anyhow::Result<()> {
    let token = match args.token {
        Some(t) => t,
        None => {
            let provider_id = args
                .provider
                .context("pass a token, or --provider to inspect its stored access token")?;
            store
                .get(&provider_id)?
                .context(format!("no stored token for provider '{provider_id}'"))?
                .token
                .access_token
        }
    };

    let decoded = oauth_core::jwt::decode_unverified(&token)?;
    match format {
        OutputFormat::Json => output::print_json(serde_json::json!({
            "header": decoded.header,
            "payload": decoded.payload,
        })),
        OutputFormat::Text => {
            println!("header:\n{}", serde_json::to_string_pretty(&decoded.header)?);
            println!("payload:\n{}", serde_json::to_string_pretty(&decoded.payload)?);
            println!("note: this is an offline decode; the signature was not verified.");
        }
    }
    Ok(())
}

pub async fn revoke(args: RevokeArgs, cfg: &crate::config::CliConfig, format: OutputFormat) -> anyhow::Result<()> {
    let provider = args.provider.resolve(cfg)?;
    let ctx = grant_context();
    oauth_core::grant::revoke(&args.token, args.token_type_hint.as_deref(), &provider, &ctx).await?;
    if format == OutputFormat::Json {
        output::print_json(serde_json::json!({"revoked": true}));
    } else {
        println!("token revoked");
    }
    Ok(())
}

pub fn tokens(cmd: TokensCommand, store: &TokenStore, format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        TokensCommand::List => {
            let providers = store.list_providers()?;
            if format == OutputFormat::Json {
                output::print_json(serde_json::json!({"providers": providers}));
            } else if providers.is_empty() {
                println!("no stored tokens");
            } else {
                for id in providers {
                    println!("{id}");
                }
            }
        }
        TokensCommand::Clear => {
            store.clear_all()?;
            println!("cleared all stored tokens");
        }
        TokensCommand::Remove { provider } => {
            store.delete(&provider)?;
            println!("removed stored token for '{provider}'");
        }
    }
    Ok(())
}

/// A [`GrantContext`] whose cancellation token fires on Ctrl-C, so a stuck Authorization Code
/// callback wait or Device Code poll loop can be interrupted instead of hanging until its own
/// timeout.
fn grant_context() -> GrantContext {
    let ctx = GrantContext::default();
    let cancel = ctx.cancel.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        cancel.cancel();
    });
    ctx
}
