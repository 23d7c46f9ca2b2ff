use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agent::tools::TravelData;

pub const DEFAULT_CHAT_MODEL: &str = "gpt-4.1-mini";
pub const DEFAULT_IMAGE_MODEL: &str = "dall-e-2";
pub const DEFAULT_SYSTEM_MESSAGE: &str = "You are a helpful assistant for an Airline called FlightAI. \
You also have access to data about levels of danger in a country. \
Give short, courteous answers, no more than 1 sentence. \
Always be accurate. If you don't know the answer, say so.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Provider {
    OpenAI,
    Anthropic,
    DeepSeek,
    XAI,
}

impl Provider {
    pub const ALL: [Provider; 4] = [Provider::OpenAI, Provider::Anthropic, Provider::DeepSeek, Provider::XAI];

    pub fn key_var(self) -> &'static str {
        match self {
            Provider::OpenAI => "OPENAI_API_KEY",
            Provider::Anthropic => "ANTHROPIC_API_KEY",
            Provider::DeepSeek => "DEEPSEEK_API_KEY",
            Provider::XAI => "XAI_API_KEY",
        }
    }

    /// OpenAI-compatible endpoint of each provider.
    pub fn default_base_url(self) -> &'static str {
        match self {
            Provider::OpenAI => "https://api.openai.com/v1",
            Provider::Anthropic => "https://api.anthropic.com/v1",
            Provider::DeepSeek => "https://api.deepseek.com/v1",
            Provider::XAI => "https://api.x.ai/v1",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Provider::OpenAI => "OpenAI",
            Provider::Anthropic => "Anthropic",
            Provider::DeepSeek => "DeepSeek",
            Provider::XAI => "XAI",
        };
        f.write_str(s)
    }
}

impl FromStr for Provider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Provider::ALL
            .into_iter()
            .find(|p| p.to_string().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| anyhow::anyhow!("unknown provider '{}'", s))
    }
}

/// A `{provider, model}` pair, displayed as `"Provider: model"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSelection {
    pub provider: Provider,
    pub model: String,
}

impl ModelSelection {
    pub fn openai(model: impl Into<String>) -> Self {
        Self { provider: Provider::OpenAI, model: model.into() }
    }

    /// `"Provider: model"` or a bare model name, which means OpenAI.
    pub fn parse(s: &str) -> anyhow::Result<Self> {
        let selection = match s.split_once(": ") {
            Some((provider, model)) => Self { provider: provider.parse()?, model: model.trim().to_string() },
            None => Self::openai(s.trim()),
        };
        if selection.model.is_empty() {
            anyhow::bail!("model name missing in '{}'", s);
        }
        Ok(selection)
    }
}

impl fmt::Display for ModelSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.provider, self.model)
    }
}

/// Models offered in the picker.
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    entries: Vec<ModelSelection>,
}

impl Default for ModelCatalog {
    fn default() -> Self {
        let list: [(Provider, &[&str]); 4] = [
            (Provider::OpenAI, &["gpt-4.1-mini", "gpt-5-mini", "gpt-4o-mini"]),
            (Provider::Anthropic, &["claude-haiku-4-5-20251001", "claude-sonnet-4-5-20250929"]),
            (Provider::DeepSeek, &["deepseek-chat", "deepseek-reasoner"]),
            (Provider::XAI, &["grok-4-fast-reasoning", "grok-beta", "grok-vision-beta"]),
        ];
        let entries = list
            .iter()
            .flat_map(|(p, models)| models.iter().map(move |m| ModelSelection { provider: *p, model: (*m).to_string() }))
            .collect();
        Self { entries }
    }
}

impl ModelCatalog {
    pub fn all_models(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.to_string()).collect()
    }

    /// Catalog restricted to providers that have an API key.
    pub fn available(&self, creds: &[ProviderCredentials]) -> Self {
        let entries = self
            .entries
            .iter()
            .filter(|e| creds.iter().any(|c| c.provider == e.provider && c.api_key.is_some()))
            .cloned()
            .collect();
        Self { entries }
    }

    pub fn first(&self) -> Option<&ModelSelection> {
        self.entries.first()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCredentials {
    pub provider: Provider,
    pub base_url: String,
    pub api_key: Option<String>,
}

/// Process-wide configuration read once from the environment at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub providers: Vec<ProviderCredentials>,
    pub chat_model: ModelSelection,
    pub image_model: String,
    pub system_message: String,
    pub dataset: String,
    pub images_enabled: bool,
    pub image_prompt: String,
    pub basic_auth: Option<(String, String)>,
    pub http_timeout: Duration,
    pub max_tool_rounds: usize,
}

pub const DEFAULT_IMAGE_PROMPT: &str =
    "An image representing a vacation in {places}, showing tourist spots and everything unique about it, in a vibrant pop-art style";

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Builds the config from any key lookup; `from_env` passes `std::env::var`.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |k: &str| get(k).filter(|v| !v.trim().is_empty());
        let mut providers = Vec::new();
        for p in Provider::ALL {
            let base_url = match p {
                Provider::OpenAI => get("OPENAI_BASE_URL").unwrap_or_else(|| p.default_base_url().to_string()),
                _ => p.default_base_url().to_string(),
            };
            url::Url::parse(&base_url).map_err(|e| anyhow::anyhow!("invalid base url for {}: {}", p, e))?;
            providers.push(ProviderCredentials { provider: p, base_url, api_key: get(p.key_var()) });
        }
        // Without an explicit choice, the default follows whichever provider has a key.
        let chat_model = match get("CHATBOT_MODEL") {
            Some(m) => ModelSelection::parse(&m)?,
            None if providers.iter().any(|c| c.provider == Provider::OpenAI && c.api_key.is_some()) => {
                ModelSelection::openai(DEFAULT_CHAT_MODEL)
            }
            None => ModelCatalog::default()
                .available(&providers)
                .first()
                .cloned()
                .unwrap_or_else(|| ModelSelection::openai(DEFAULT_CHAT_MODEL)),
        };
        let basic_auth = get("CHATBOT_BASIC_AUTH").map(|v| parse_credentials(&v)).transpose()?;
        let http_timeout = match get("CHATBOT_HTTP_TIMEOUT_SECS") {
            Some(v) => Duration::from_secs(v.parse().map_err(|e| anyhow::anyhow!("CHATBOT_HTTP_TIMEOUT_SECS: {}", e))?),
            None => Duration::from_secs(60),
        };
        let max_tool_rounds = match get("CHATBOT_MAX_TOOL_ROUNDS") {
            Some(v) => v.parse().map_err(|e| anyhow::anyhow!("CHATBOT_MAX_TOOL_ROUNDS: {}", e))?,
            None => 8,
        };
        let images_enabled = get("CHATBOT_IMAGES").map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on")).unwrap_or(false);
        let dataset = get("CHATBOT_DATASET").unwrap_or_else(|| "flight-ai".into());
        dataset.parse::<TravelData>()?;
        Ok(Self {
            providers,
            chat_model,
            image_model: get("CHATBOT_IMAGE_MODEL").unwrap_or_else(|| DEFAULT_IMAGE_MODEL.into()),
            system_message: get("CHATBOT_SYSTEM_MESSAGE").unwrap_or_else(|| DEFAULT_SYSTEM_MESSAGE.into()),
            dataset,
            images_enabled,
            image_prompt: get("CHATBOT_IMAGE_PROMPT").unwrap_or_else(|| DEFAULT_IMAGE_PROMPT.into()),
            basic_auth,
            http_timeout,
            max_tool_rounds,
        })
    }

    /// At least one provider must have a key, and the default chat model's
    /// provider must be one of them.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !Provider::ALL.iter().any(|p| self.has_provider_key(*p)) {
            let vars: Vec<&str> = Provider::ALL.iter().map(|p| p.key_var()).collect();
            anyhow::bail!("no API keys found; set at least one of {}", vars.join(", "));
        }
        if !self.has_provider_key(self.chat_model.provider) {
            anyhow::bail!(
                "default model '{}' needs {}; set it or pick another model",
                self.chat_model,
                self.chat_model.provider.key_var()
            );
        }
        Ok(())
    }

    pub fn has_provider_key(&self, provider: Provider) -> bool {
        self.providers.iter().any(|p| p.provider == provider && p.api_key.is_some())
    }

    /// Logs which keys are present, showing only a short prefix.
    pub fn log_key_status(&self) {
        for p in &self.providers {
            match &p.api_key {
                Some(k) => tracing::info!(provider = %p.provider, key_prefix = %mask_key(k), "API key present"),
                None => tracing::debug!(provider = %p.provider, "API key not set"),
            }
        }
    }
}

pub fn parse_credentials(v: &str) -> anyhow::Result<(String, String)> {
    let (user, pass) = v.split_once(':').ok_or_else(|| anyhow::anyhow!("basic auth must look like user:password"))?;
    Ok((user.to_string(), pass.to_string()))
}

fn mask_key(k: &str) -> String {
    let prefix: String = k.chars().take(8).collect();
    format!("{}...", prefix)
}

/// Per-session overrides editable from the UI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SessionSettings {
    pub model: Option<String>,
    pub system_message: Option<String>,
    pub generate_image: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SessionSettingsPatch {
    pub model: Option<String>,
    pub system_message: Option<String>,
    pub generate_image: Option<bool>,
}

impl SessionSettings {
    pub fn apply_patch(&mut self, patch: SessionSettingsPatch) {
        if patch.model.is_some() { self.model = patch.model; }
        if patch.system_message.is_some() { self.system_message = patch.system_message; }
        if patch.generate_image.is_some() { self.generate_image = patch.generate_image; }
    }
}

/// Per-message overrides sent along with a chat turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RequestOverrides {
    pub model: Option<String>,
    pub generate_image: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveSettings {
    pub model: ModelSelection,
    pub system_message: String,
    pub generate_image: bool,
}

/// Request overrides win over session settings, which win over the global config.
pub fn resolve_effective_settings(
    global: &AppConfig,
    session: &SessionSettings,
    request: &RequestOverrides,
) -> anyhow::Result<EffectiveSettings> {
    let model = match chosen(&request.model).or(chosen(&session.model)) {
        Some(m) => ModelSelection::parse(m)?,
        None => global.chat_model.clone(),
    };
    let system_message = session
        .system_message
        .clone()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| global.system_message.clone());
    let generate_image = request
        .generate_image
        .or(session.generate_image)
        .unwrap_or(global.images_enabled);
    Ok(EffectiveSettings { model, system_message, generate_image })
}

/// A blank model name from the UI means "no choice".
fn chosen(model: &Option<String>) -> Option<&str> {
    model.as_deref().filter(|m| !m.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> anyhow::Result<AppConfig> {
        let env: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        AppConfig::from_lookup(|k| env.get(k).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let c = config_from(&[]).unwrap();
        assert_eq!(c.chat_model, ModelSelection::openai("gpt-4.1-mini"));
        assert_eq!(c.image_model, "dall-e-2");
        assert_eq!(c.http_timeout, Duration::from_secs(60));
        assert!(!c.images_enabled);
        assert!(c.validate().is_err());
    }

    #[test]
    fn reads_keys_and_overrides() {
        let c = config_from(&[
            ("OPENAI_API_KEY", "sk-proj-abcdefghijkl"),
            ("DEEPSEEK_API_KEY", "sk-deepseek"),
            ("CHATBOT_MODEL", "DeepSeek: deepseek-chat"),
            ("CHATBOT_BASIC_AUTH", "b:b"),
            ("CHATBOT_IMAGES", "true"),
            ("OPENAI_BASE_URL", "http://localhost:8080/v1"),
        ])
        .unwrap();
        assert!(c.validate().is_ok());
        assert!(c.has_provider_key(Provider::OpenAI));
        assert!(!c.has_provider_key(Provider::Anthropic));
        assert!(c.has_provider_key(Provider::DeepSeek));
        assert_eq!(c.chat_model.provider, Provider::DeepSeek);
        assert_eq!(c.basic_auth, Some(("b".into(), "b".into())));
        assert!(c.images_enabled);
        assert_eq!(c.providers[0].base_url, "http://localhost:8080/v1");
        assert_eq!(mask_key("sk-proj-abcdefghijkl"), "sk-proj-...");
    }

    #[test]
    fn rejects_bad_values() {
        assert!(config_from(&[("OPENAI_BASE_URL", "not a url")]).is_err());
        assert!(config_from(&[("CHATBOT_DATASET", "mars")]).is_err());
        assert!(config_from(&[("CHATBOT_BASIC_AUTH", "nocolon")]).is_err());
    }

    #[test]
    fn model_selection_display_and_parse() {
        let s = ModelSelection::parse("Anthropic: claude-haiku-4-5-20251001").unwrap();
        assert_eq!(s.provider, Provider::Anthropic);
        assert_eq!(s.to_string(), "Anthropic: claude-haiku-4-5-20251001");
        assert_eq!(ModelSelection::parse("gpt-4o-mini").unwrap(), ModelSelection::openai("gpt-4o-mini"));
        assert!(ModelSelection::parse("Acme: model").is_err());
        assert!(ModelSelection::parse("").is_err());
        assert!(ModelSelection::parse("  ").is_err());
        assert!(ModelSelection::parse("XAI: ").is_err());
    }

    #[test]
    fn default_model_follows_the_only_key() {
        let c = config_from(&[("XAI_API_KEY", "xai-123")]).unwrap();
        assert_eq!(c.chat_model.to_string(), "XAI: grok-4-fast-reasoning");
        assert!(c.validate().is_ok());

        let c = config_from(&[("ANTHROPIC_API_KEY", "sk-ant"), ("OPENAI_API_KEY", "sk-openai")]).unwrap();
        assert_eq!(c.chat_model, ModelSelection::openai(DEFAULT_CHAT_MODEL));
    }

    #[test]
    fn validate_rejects_default_model_without_key() {
        let c = config_from(&[("XAI_API_KEY", "xai-123"), ("CHATBOT_MODEL", "OpenAI: gpt-4.1-mini")]).unwrap();
        let err = c.validate().unwrap_err().to_string();
        assert!(err.contains("OPENAI_API_KEY"), "{}", err);
    }

    #[test]
    fn blank_model_overrides_count_as_unset() {
        let global = config_from(&[("XAI_API_KEY", "xai-123")]).unwrap();
        let session = SessionSettings { model: Some(String::new()), ..Default::default() };
        let request = RequestOverrides { model: Some(" ".into()), generate_image: None };
        let eff = resolve_effective_settings(&global, &session, &request).unwrap();
        assert_eq!(eff.model, global.chat_model);

        let session = SessionSettings { model: Some("DeepSeek: deepseek-chat".into()), ..Default::default() };
        let eff = resolve_effective_settings(&global, &session, &request).unwrap();
        assert_eq!(eff.model.provider, Provider::DeepSeek);
    }

    #[test]
    fn catalog_lists_provider_prefixed_models() {
        let cat = ModelCatalog::default();
        let all = cat.all_models();
        assert_eq!(all[0], "OpenAI: gpt-4.1-mini");
        assert!(all.contains(&"XAI: grok-beta".to_string()));
        let c = config_from(&[("XAI_API_KEY", "xai-123")]).unwrap();
        let avail = cat.available(&c.providers).all_models();
        assert!(avail.iter().all(|m| m.starts_with("XAI: ")));
    }

    #[test]
    fn precedence_request_over_session_over_global() {
        let global = config_from(&[]).unwrap();
        let session = SessionSettings {
            model: Some("OpenAI: gpt-4o-mini".into()),
            system_message: Some("Be terse.".into()),
            generate_image: Some(true),
        };
        let request = RequestOverrides { model: Some("DeepSeek: deepseek-chat".into()), generate_image: None };

        let eff = resolve_effective_settings(&global, &session, &request).unwrap();
        assert_eq!(eff.model.provider, Provider::DeepSeek); // from request
        assert_eq!(eff.system_message, "Be terse."); // from session
        assert!(eff.generate_image); // from session

        let eff = resolve_effective_settings(&global, &SessionSettings::default(), &RequestOverrides::default()).unwrap();
        assert_eq!(eff.model, global.chat_model);
        assert_eq!(eff.system_message, DEFAULT_SYSTEM_MESSAGE);
        assert!(!eff.generate_image);
    }

    #[test]
    fn patch_only_touches_given_fields() {
        let mut s = SessionSettings { model: Some("OpenAI: gpt-5-mini".into()), ..Default::default() };
        s.apply_patch(SessionSettingsPatch { generate_image: Some(true), ..Default::default() });
        assert_eq!(s.model.as_deref(), Some("OpenAI: gpt-5-mini"));
        assert_eq!(s.generate_image, Some(true));
    }
}
