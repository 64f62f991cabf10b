// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application configuration loaded from environment variables.
//!
//! Everything is read once at startup into an immutable [`Config`]. Tunable
//! parameters (dedupe window, backoff constants, risk thresholds, ...) have
//! defaults and may be overridden per deployment.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    // --- Environment Variables (non-sensitive) ---
    /// Frontend URL allowed by CORS
    pub frontend_url: String,
    /// Server port
    pub port: u16,
    /// SQLite database file path
    pub database_path: String,

    // --- Secrets ---
    /// JWT signing key for coach sessions (raw bytes)
    pub jwt_signing_key: Vec<u8>,

    pub whatsapp: WhatsAppConfig,
    pub telegram: TelegramConfig,
    pub email: EmailConfig,
    pub completion: CompletionConfig,

    pub ingest: IngestConfig,
    pub enrichment: EnrichmentConfig,
    pub dispatch: DispatchConfig,
    pub risk: RiskConfig,
    pub outreach: OutreachConfig,
}

/// WhatsApp Cloud API settings (chat-bot channel keyed by phone number).
#[derive(Debug, Clone)]
pub struct WhatsAppConfig {
    /// Token echoed back during the `hub.*` subscription handshake
    pub verify_token: String,
    /// App secret used to verify `X-Hub-Signature-256`
    pub app_secret: String,
    /// Graph API access token for outbound sends
    pub access_token: Option<String>,
    /// Sending phone number id
    pub phone_number_id: Option<String>,
    pub api_base_url: String,
}

/// Telegram Bot API settings (chat-bot channel keyed by opaque user id).
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    /// Value Telegram sends in `X-Telegram-Bot-Api-Secret-Token`
    pub webhook_secret: String,
    pub bot_token: Option<String>,
    pub api_base_url: String,
}

/// Inbound/outbound email relay settings.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    /// Shared token the inbound relay sends in `X-Webhook-Token`
    pub inbound_token: String,
    /// HTTP relay used for outbound mail
    pub relay_url: Option<String>,
    pub relay_token: Option<String>,
    pub from_address: String,
}

/// Completion and speech-to-text provider settings (OpenAI-compatible API).
#[derive(Debug, Clone)]
pub struct CompletionConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub transcription_model: String,
}

/// Normalizer and Deduplicator & Store tunables.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Lookback for fingerprint duplicates
    pub dedupe_window: chrono::Duration,
    /// Coarse timestamp bucket folded into the fingerprint
    pub fingerprint_bucket_secs: i64,
    /// A conversation untouched for longer than this is closed; the next
    /// message opens a new one
    pub conversation_idle: chrono::Duration,
    /// Country code assumed for phone numbers without one
    pub default_country_code: String,
    pub transcription_timeout: Duration,
}

/// Action Orchestrator tunables.
#[derive(Debug, Clone)]
pub struct EnrichmentConfig {
    /// Global switch for automatic completion calls
    pub enabled: bool,
    pub highlight_context: usize,
    pub reply_context: usize,
    pub max_highlights: usize,
    /// Normalized similarity above which a suggestion counts as a duplicate
    pub similarity_threshold: f64,
    pub action_timeout: Duration,
    /// Actions run after webhook ingestion
    pub webhook_highlights: bool,
    pub webhook_reply: bool,
    pub webhook_todo: bool,
}

/// Outbox dispatcher tunables.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub poll_interval: Duration,
    pub batch_size: usize,
    /// How long a claim is held before another dispatcher may take over
    pub claim_lease: Duration,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
    pub send_timeout: Duration,
}

/// Risk engine tunables.
#[derive(Debug, Clone)]
pub struct RiskConfig {
    pub medium_threshold: f64,
    pub high_threshold: f64,
    /// Weight of the new raw score in exponential smoothing
    pub smoothing_alpha: f64,
    pub highlight_window: chrono::Duration,
    pub sentiment_samples: usize,
}

/// Check-in drafting for at-risk athletes.
#[derive(Debug, Clone)]
pub struct OutreachConfig {
    /// BCP 47 tag drafts are written in
    pub language: String,
    /// Signature used in drafts
    pub coach_name: Option<String>,
    /// Replaces `{{calendar}}` in drafts
    pub calendar_url: Option<String>,
    pub max_highlights: usize,
    /// Characters of recent conversation shown to the model
    pub excerpt_chars: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            dedupe_window: chrono::Duration::hours(24),
            fingerprint_bucket_secs: 60,
            conversation_idle: chrono::Duration::hours(72),
            default_country_code: "34".to_string(),
            transcription_timeout: Duration::from_secs(60),
        }
    }
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            highlight_context: 15,
            reply_context: 6,
            max_highlights: 5,
            similarity_threshold: 0.85,
            action_timeout: Duration::from_secs(20),
            webhook_highlights: true,
            webhook_reply: true,
            webhook_todo: true,
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            batch_size: 20,
            claim_lease: Duration::from_secs(120),
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(3600),
            max_attempts: 5,
            send_timeout: Duration::from_secs(15),
        }
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            medium_threshold: 30.0,
            high_threshold: 60.0,
            smoothing_alpha: 0.5,
            highlight_window: chrono::Duration::days(14),
            sentiment_samples: 7,
        }
    }
}

impl Default for OutreachConfig {
    fn default() -> Self {
        Self {
            language: "es-ES".to_string(),
            coach_name: None,
            calendar_url: None,
            max_highlights: 5,
            excerpt_chars: 800,
        }
    }
}

impl Config {
    /// Deterministic configuration for tests.
    pub fn test_default() -> Self {
        Self {
            frontend_url: "http://localhost:5173".to_string(),
            port: 8080,
            database_path: ":memory:".to_string(),
            jwt_signing_key: b"test_jwt_key_32_bytes_minimum!!".to_vec(),
            whatsapp: WhatsAppConfig {
                verify_token: "test_verify_token".to_string(),
                app_secret: "test_app_secret".to_string(),
                access_token: None,
                phone_number_id: None,
                api_base_url: "http://127.0.0.1:9/whatsapp".to_string(),
            },
            telegram: TelegramConfig {
                webhook_secret: "test_telegram_secret".to_string(),
                bot_token: None,
                api_base_url: "http://127.0.0.1:9/telegram".to_string(),
            },
            email: EmailConfig {
                inbound_token: "test_email_token".to_string(),
                relay_url: None,
                relay_token: None,
                from_address: "coach@example.com".to_string(),
            },
            completion: CompletionConfig {
                api_key: None,
                base_url: "http://127.0.0.1:9/v1".to_string(),
                model: "gpt-4o-mini".to_string(),
                transcription_model: "whisper-1".to_string(),
            },
            ingest: IngestConfig::default(),
            enrichment: EnrichmentConfig {
                action_timeout: Duration::from_secs(2),
                ..EnrichmentConfig::default()
            },
            dispatch: DispatchConfig::default(),
            risk: RiskConfig::default(),
            outreach: OutreachConfig::default(),
        }
    }

    /// Load configuration from environment variables.
    ///
    /// For local development a `.env` file is honored.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let ingest_defaults = IngestConfig::default();
        let enrichment_defaults = EnrichmentConfig::default();
        let dispatch_defaults = DispatchConfig::default();
        let risk_defaults = RiskConfig::default();
        let outreach_defaults = OutreachConfig::default();

        Ok(Self {
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            port: env_or("PORT", 8080),
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "coach_inbox.db".to_string()),

            jwt_signing_key: required("JWT_SIGNING_KEY")?.into_bytes(),

            whatsapp: WhatsAppConfig {
                verify_token: required("WHATSAPP_VERIFY_TOKEN")?,
                app_secret: required("WHATSAPP_APP_SECRET")?,
                access_token: optional("WHATSAPP_ACCESS_TOKEN"),
                phone_number_id: optional("WHATSAPP_PHONE_NUMBER_ID"),
                api_base_url: env::var("WHATSAPP_API_BASE_URL")
                    .unwrap_or_else(|_| "https://graph.facebook.com/v19.0".to_string()),
            },
            telegram: TelegramConfig {
                webhook_secret: required("TELEGRAM_WEBHOOK_SECRET")?,
                bot_token: optional("TELEGRAM_BOT_TOKEN"),
                api_base_url: env::var("TELEGRAM_API_BASE_URL")
                    .unwrap_or_else(|_| "https://api.telegram.org".to_string()),
            },
            email: EmailConfig {
                inbound_token: required("EMAIL_INBOUND_TOKEN")?,
                relay_url: optional("EMAIL_RELAY_URL"),
                relay_token: optional("EMAIL_RELAY_TOKEN"),
                from_address: env::var("EMAIL_FROM_ADDRESS")
                    .unwrap_or_else(|_| "coach@localhost".to_string()),
            },
            completion: CompletionConfig {
                api_key: optional("OPENAI_API_KEY"),
                base_url: env::var("OPENAI_BASE_URL")
                    .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
                model: env::var("COMPLETION_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
                transcription_model: env::var("TRANSCRIPTION_MODEL")
                    .unwrap_or_else(|_| "whisper-1".to_string()),
            },

            ingest: IngestConfig {
                dedupe_window: chrono::Duration::hours(env_or("DEDUPE_WINDOW_HOURS", 24)),
                fingerprint_bucket_secs: env_or(
                    "FINGERPRINT_BUCKET_SECS",
                    ingest_defaults.fingerprint_bucket_secs,
                )
                .max(1),
                conversation_idle: chrono::Duration::hours(env_or(
                    "CONVERSATION_IDLE_HOURS",
                    72,
                )),
                default_country_code: env::var("DEFAULT_COUNTRY_CODE")
                    .unwrap_or(ingest_defaults.default_country_code),
                transcription_timeout: Duration::from_secs(env_or(
                    "TRANSCRIPTION_TIMEOUT_SECS",
                    ingest_defaults.transcription_timeout.as_secs(),
                )),
            },
            enrichment: EnrichmentConfig {
                enabled: env_or("ENRICHMENT_ENABLED", enrichment_defaults.enabled),
                highlight_context: env_or(
                    "HIGHLIGHT_CONTEXT_MESSAGES",
                    enrichment_defaults.highlight_context,
                ),
                reply_context: env_or("REPLY_CONTEXT_MESSAGES", enrichment_defaults.reply_context),
                max_highlights: env_or("MAX_HIGHLIGHTS", enrichment_defaults.max_highlights),
                similarity_threshold: env_or(
                    "HIGHLIGHT_SIMILARITY_THRESHOLD",
                    enrichment_defaults.similarity_threshold,
                ),
                action_timeout: Duration::from_secs(env_or(
                    "ACTION_TIMEOUT_SECS",
                    enrichment_defaults.action_timeout.as_secs(),
                )),
                webhook_highlights: env_or("WEBHOOK_GENERATE_HIGHLIGHTS", true),
                webhook_reply: env_or("WEBHOOK_SUGGEST_REPLY", true),
                webhook_todo: env_or("WEBHOOK_MAYBE_TODO", true),
            },
            dispatch: DispatchConfig {
                poll_interval: Duration::from_secs(env_or(
                    "DISPATCH_POLL_SECS",
                    dispatch_defaults.poll_interval.as_secs(),
                )),
                batch_size: env_or("DISPATCH_BATCH_SIZE", dispatch_defaults.batch_size),
                claim_lease: Duration::from_secs(env_or(
                    "DISPATCH_CLAIM_LEASE_SECS",
                    dispatch_defaults.claim_lease.as_secs(),
                )),
                base_delay: Duration::from_secs(env_or(
                    "DISPATCH_BASE_DELAY_SECS",
                    dispatch_defaults.base_delay.as_secs(),
                )),
                max_delay: Duration::from_secs(env_or(
                    "DISPATCH_MAX_DELAY_SECS",
                    dispatch_defaults.max_delay.as_secs(),
                )),
                max_attempts: env_or("DISPATCH_MAX_ATTEMPTS", dispatch_defaults.max_attempts)
                    .max(1),
                send_timeout: Duration::from_secs(env_or(
                    "DISPATCH_SEND_TIMEOUT_SECS",
                    dispatch_defaults.send_timeout.as_secs(),
                )),
            },
            risk: RiskConfig {
                medium_threshold: env_or("RISK_MEDIUM_THRESHOLD", risk_defaults.medium_threshold),
                high_threshold: env_or("RISK_HIGH_THRESHOLD", risk_defaults.high_threshold),
                smoothing_alpha: env_or("RISK_SMOOTHING_ALPHA", risk_defaults.smoothing_alpha)
                    .clamp(0.0, 1.0),
                ..risk_defaults
            },
            outreach: OutreachConfig {
                language: env::var("OUTREACH_LANGUAGE").unwrap_or(outreach_defaults.language),
                coach_name: optional("COACH_NAME"),
                calendar_url: optional("COACH_CALENDAR_URL"),
                ..outreach_defaults
            },
        })
    }
}

/// Read a required variable, trimming surrounding whitespace.
fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name)
        .map(|v| v.trim().to_string())
        .map_err(|_| ConfigError::Missing(name))
}

fn optional(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Read and parse a variable, falling back to `default` when unset or invalid.
fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_env() {
        // Set required env vars for test
        env::set_var("JWT_SIGNING_KEY", "test_jwt_key_32_bytes_minimum!!");
        env::set_var("WHATSAPP_VERIFY_TOKEN", "verify");
        env::set_var("WHATSAPP_APP_SECRET", " secret ");
        env::set_var("TELEGRAM_WEBHOOK_SECRET", "tg");
        env::set_var("EMAIL_INBOUND_TOKEN", "mail");
        env::set_var("DISPATCH_MAX_ATTEMPTS", "not-a-number");

        let config = Config::from_env().expect("Config should load");

        assert_eq!(config.whatsapp.app_secret, "secret");
        assert_eq!(config.port, 8080);
        assert_eq!(config.dispatch.max_attempts, 5);
        assert_eq!(config.ingest.dedupe_window, chrono::Duration::hours(24));
        assert!(config.enrichment.enabled);
        assert_eq!(config.outreach.excerpt_chars, 800);
    }

    #[test]
    fn test_env_or_falls_back_on_garbage() {
        env::set_var("COACH_INBOX_TEST_GARBAGE", "abc");
        let value: u32 = env_or("COACH_INBOX_TEST_GARBAGE", 7);
        assert_eq!(value, 7);
    }
}
