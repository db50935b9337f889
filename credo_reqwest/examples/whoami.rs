use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use credo_clock::DurationSecs;
use credo_reqwest::{ExactHostMatch, HttpsOnly, RequestPipeline};
use credo_tokens::{
    backoff::ErrorBackoffConfig,
    jitter::RandomEarlyJitter,
    persistence::FilePersistence,
    refresher,
    service::{OAuth2Config, OAuth2TokenService},
    AuthorizationCode, ClientId, ClientSecret, CredentialStore, DeviceId, Session,
    TokenLifetimeConfig,
};
use predicates::prelude::PredicateBooleanExt;

#[derive(Debug, Parser)]
struct Opts {
    /// The authority's token request URL
    #[clap(long, env)]
    token_url: reqwest::Url,

    /// The authority's token revocation URL
    #[clap(long, env)]
    revoke_url: reqwest::Url,

    /// The client ID of this application
    #[clap(short, long, env)]
    client_id: ClientId,

    /// The client secret, if this is not an installed application
    #[clap(short = 's', long, env, hide_env_values = true)]
    client_secret: Option<ClientSecret>,

    /// The identifier of this installation, used for anonymous sessions
    #[clap(short, long, env)]
    device_id: DeviceId,

    /// The API endpoint to call
    #[clap(long, env)]
    api_url: reqwest::Url,

    /// An authorization code from an interactive login to exchange first
    #[clap(long, env, hide_env_values = true)]
    authorization_code: Option<AuthorizationCode>,

    /// The redirect URI used to obtain the authorization code
    #[clap(long, env, default_value = "http://localhost/callback")]
    redirect_uri: String,

    /// The directory used to persist credentials
    #[clap(short = 'f', long, env, default_value = ".credo")]
    credentials_dir: PathBuf,

    /// Revoke and forget the credential after calling the API
    #[clap(long)]
    logout: bool,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    dotenvy::dotenv().ok();
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let http = reqwest::Client::builder()
        .user_agent(concat!("credo-whoami/", env!("CARGO_PKG_VERSION")))
        .https_only(true)
        .build()?;

    let mut config = OAuth2Config::new(opts.token_url, opts.revoke_url, opts.client_id);
    if let Some(secret) = opts.client_secret {
        config = config.with_client_secret(secret);
    }
    let service = OAuth2TokenService::new(http.clone(), config, TokenLifetimeConfig::default());

    let store = Arc::new(CredentialStore::load(FilePersistence::new(opts.credentials_dir)).await);
    store.set_listener(|credential| {
        tracing::info!(kind = credential.kind(), "credential changed");
    });

    let session = Session::new(store, Arc::new(service), opts.device_id);

    if let Some(code) = &opts.authorization_code {
        session.login(code, &opts.redirect_uri).await?;
    }

    let _refresher = refresher::spawn_refresher(
        session.clone(),
        RandomEarlyJitter::new(DurationSecs(60)),
        ErrorBackoffConfig::default(),
    );

    let api_host = opts.api_url.host_str().unwrap_or_default().to_owned();
    let client = RequestPipeline::new(session.clone())
        .with_predicate(HttpsOnly.and(ExactHostMatch::new(api_host)))
        .build(http);

    let resp = client.get(opts.api_url).send().await?;
    let status = resp.status();
    let body = resp.text().await?;
    tracing::info!(status = status.as_u16(), "called API");
    println!("{body}");

    if opts.logout {
        session.logout().await?;
    }

    Ok(())
}
