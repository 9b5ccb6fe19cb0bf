use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use config::{Config, ConfigError, Environment};
use serde::{Deserialize, Serialize};
use url::Url;

pub const DEFAULT_WEBHOOK_TOKEN: &str = "default-webhook-token-change-me";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Settings {
    /// Base URL of the hosted database platform. Without it the service runs
    /// against an in-process store.
    pub backend_url: Option<Url>,
    pub backend_api_key: String,
    /// Shared secret the platform's database webhooks present.
    pub webhook_token: String,
    pub debug: bool,
    pub enable_swagger: bool,
    pub port: u16,
    pub timezone: String,
    pub booking_window_days: u16,
    pub refresh_debounce_ms: u32,
    pub gym_title: String,
    pub gym_location: String,
    pub gym_latitude: f64,
    pub gym_longitude: f64,
    pub contact_email: String,
    pub contact_phone: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            backend_url: None,
            backend_api_key: String::new(),
            webhook_token: DEFAULT_WEBHOOK_TOKEN.to_string(),
            debug: false,
            enable_swagger: true,
            port: 8080,
            timezone: "Europe/Warsaw".to_string(),
            booking_window_days: 14,
            refresh_debounce_ms: 100,
            gym_title: "Ringside Boxing Club".to_string(),
            gym_location: "ul. Hetmańska 40, 35-045 Rzeszów, Poland".to_string(),
            gym_latitude: 50.0260,
            gym_longitude: 22.0090,
            contact_email: "hello@ringside.example".to_string(),
            contact_phone: None,
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        let defaults = Settings::default();

        let config = Config::builder()
            // APP_BACKEND_URL, APP_GYM_TITLE, ...
            .add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_default("backend_api_key", defaults.backend_api_key)?
            .set_default("webhook_token", defaults.webhook_token)?
            .set_default("debug", defaults.debug)?
            .set_default("enable_swagger", defaults.enable_swagger)?
            .set_default("port", i64::from(defaults.port))?
            .set_default("timezone", defaults.timezone)?
            .set_default("booking_window_days", i64::from(defaults.booking_window_days))?
            .set_default("refresh_debounce_ms", i64::from(defaults.refresh_debounce_ms))?
            .set_default("gym_title", defaults.gym_title)?
            .set_default("gym_location", defaults.gym_location)?
            .set_default("gym_latitude", defaults.gym_latitude)?
            .set_default("gym_longitude", defaults.gym_longitude)?
            .set_default("contact_email", defaults.contact_email)?
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.timezone.parse::<Tz>().is_err() {
            return Err(ConfigError::Message(format!(
                "unknown timezone: {}",
                self.timezone
            )));
        }
        if self.booking_window_days == 0 {
            return Err(ConfigError::Message(
                "booking_window_days must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// True while the webhook token is still the well-known default, which
    /// lets anyone post change events.
    pub fn uses_default_webhook_token(&self) -> bool {
        self.webhook_token == DEFAULT_WEBHOOK_TOKEN
    }

    /// Today's date at the gym.
    pub fn today(&self) -> NaiveDate {
        match self.timezone.parse::<Tz>() {
            Ok(tz) => Utc::now().with_timezone(&tz).date_naive(),
            Err(_) => Utc::now().date_naive(),
        }
    }
}
