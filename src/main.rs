// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::Parser;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands};
use radsched_analyze::{AnalyzerOptions, CompletionClient, HttpCompletionClient, OrderAnalyzer};
use radsched_catalog::Catalog;
use radsched_config::{CarrierAccount, Config, ConfigError};
use radsched_identity::PhoneCipher;
use radsched_session::{
    ConversationEngine, EngineConfig, HttpSlotSource, ScriptedSlotSource, SlotSource,
    StaticPatientContexts,
};
use radsched_sms::{SmsDispatcher, SmsProvider, TelnyxProvider, TwilioProvider};
use radsched_store::{MemoryStore, StoreError};

const EXIT_SUCCESS: i32 = 0;
const EXIT_CONFIG_ERROR: i32 = 2;
const EXIT_STORE_UNAVAILABLE: i32 = 3;
const EXIT_MISSING_ENV: i32 = 4;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    std::process::exit(run(cli).await);
}

async fn run(cli: Cli) -> i32 {
    let config = match radsched_config::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("configuration error: {e:#}");
            return EXIT_CONFIG_ERROR;
        }
    };

    match cli.command {
        Commands::ShowConfig => {
            match serde_yaml::to_string(&config.redacted()) {
                Ok(yaml) => {
                    println!("{yaml}");
                    EXIT_SUCCESS
                }
                Err(e) => {
                    eprintln!("configuration error: {e}");
                    EXIT_CONFIG_ERROR
                }
            }
        }
        Commands::ExpireSessions => run_sweep(&config, Sweep::Expire).await,
        Commands::RetryTimeouts => run_sweep(&config, Sweep::RetryTimeouts).await,
    }
}

enum Sweep {
    Expire,
    RetryTimeouts,
}

async fn run_sweep(config: &Config, sweep: Sweep) -> i32 {
    if let Err(e) = config.validate() {
        eprintln!("configuration error: {e}");
        return EXIT_CONFIG_ERROR;
    }

    let engine = match build_engine(config) {
        Ok(engine) => engine,
        Err(BuildError::MissingEnv(var)) => {
            eprintln!("required environment variable {var} is not set");
            return EXIT_MISSING_ENV;
        }
        Err(BuildError::Config(msg)) => {
            eprintln!("configuration error: {msg}");
            return EXIT_CONFIG_ERROR;
        }
    };

    let result = match sweep {
        Sweep::Expire => engine.expire_sessions(Utc::now()).await,
        Sweep::RetryTimeouts => engine.retry_slot_timeouts(Utc::now()).await,
    };

    match result {
        Ok(report) => {
            println!(
                "examined {} sessions, transitioned {}",
                report.examined, report.transitioned
            );
            EXIT_SUCCESS
        }
        Err(radsched_session::SessionError::Storage(StoreError::Unavailable(msg))) => {
            eprintln!("storage unavailable: {msg}");
            EXIT_STORE_UNAVAILABLE
        }
        Err(e) => {
            eprintln!("sweep failed: {e}");
            EXIT_STORE_UNAVAILABLE
        }
    }
}

enum BuildError {
    MissingEnv(String),
    Config(String),
}

impl From<ConfigError> for BuildError {
    fn from(e: ConfigError) -> Self {
        match e {
            ConfigError::MissingEnv(var) => BuildError::MissingEnv(var),
            ConfigError::Invalid(msg) => BuildError::Config(msg),
        }
    }
}

/// Wire the engine from process config.
///
/// Tenants, locations, and sessions live in the store; the process-local
/// backend here is what single-node deployments and the sweep commands
/// run against. A shared database backend plugs in behind the same
/// traits.
fn build_engine(config: &Config) -> Result<ConversationEngine, BuildError> {
    let key = config.resolve_encryption_key()?;
    let cipher = PhoneCipher::from_process_key(&key)
        .map_err(|e| BuildError::Config(e.to_string()))?;

    let store = Arc::new(MemoryStore::new());

    let mut providers: Vec<Arc<dyn SmsProvider>> = Vec::new();
    if let Some(account) = &config.carriers.twilio {
        providers.push(Arc::new(twilio_from(account)?));
    }
    if let Some(account) = &config.carriers.telnyx {
        providers.push(Arc::new(telnyx_from(account)?));
    }

    let dispatcher = Arc::new(SmsDispatcher::new(
        providers,
        store.clone(),
        store.clone(),
        Duration::from_secs(config.scheduling.send_deadline_secs),
    ));

    let completion: Option<Arc<dyn CompletionClient>> = match &config.analyzer.api_key_env {
        Some(var) => {
            let api_key = std::env::var(var)
                .map_err(|_| BuildError::MissingEnv(var.clone()))?;
            Some(Arc::new(HttpCompletionClient::new(
                api_key,
                config.analyzer.base_url.clone(),
            )))
        }
        None => None,
    };
    let analyzer = Arc::new(OrderAnalyzer::new(
        store.clone(),
        store.clone(),
        completion,
        AnalyzerOptions {
            prompt_key_prefix: config.analyzer.prompt_key_prefix.clone(),
            deadline_secs: config.analyzer.deadline_secs,
        },
    ));

    let slot_source: Arc<dyn SlotSource> = match &config.slot_source.base_url {
        Some(base_url) => {
            let api_key = match &config.slot_source.api_key_env {
                Some(var) => Some(
                    std::env::var(var).map_err(|_| BuildError::MissingEnv(var.clone()))?,
                ),
                None => None,
            };
            Arc::new(HttpSlotSource::new(base_url.clone(), api_key))
        }
        // No slot source configured: sweeps still expire and cancel
        // correctly, retries simply find nothing to fetch.
        None => Arc::new(ScriptedSlotSource::new(Vec::new())),
    };

    Ok(ConversationEngine::new(
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        dispatcher,
        slot_source,
        analyzer,
        Arc::new(StaticPatientContexts::new()),
        Catalog::default(),
        Arc::new(cipher),
        EngineConfig {
            session_ttl_hours: config.scheduling.session_ttl_hours,
            slot_timeout_secs: config.scheduling.slot_timeout_secs,
            ..EngineConfig::default()
        },
    ))
}

fn twilio_from(account: &CarrierAccount) -> Result<TwilioProvider, BuildError> {
    let token = account.resolve_auth_token()?;
    Ok(TwilioProvider::new(
        account.account_id.clone(),
        token,
        account.base_url.clone(),
        account.enabled,
    ))
}

fn telnyx_from(account: &CarrierAccount) -> Result<TelnyxProvider, BuildError> {
    let token = account.resolve_auth_token()?;
    Ok(TelnyxProvider::new(
        token,
        account.base_url.clone(),
        account.enabled,
    ))
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env("RADSCHED_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}
