//! Server configuration from environment variables

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Which model backend to talk to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderKind {
    Ollama,
    OpenAi,
}

impl ProviderKind {
    fn parse(raw: &str) -> Result<Self, ConfigError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAi),
            other => Err(ConfigError::Invalid {
                key: "SQUAD_PROVIDER",
                reason: format!("unknown provider '{other}' (expected ollama or openai)"),
            }),
        }
    }
}

/// An agent declared in `SQUAD_AGENTS`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentSpec {
    pub name: String,
    pub description: String,
}

/// Parse `name|description;name|description`
pub fn parse_agents(raw: &str) -> Result<Vec<AgentSpec>, ConfigError> {
    raw.split(';')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (name, description) = entry.split_once('|').ok_or_else(|| ConfigError::Invalid {
                key: "SQUAD_AGENTS",
                reason: format!("'{entry}' is not of the form name|description"),
            })?;
            let (name, description) = (name.trim(), description.trim());
            if name.is_empty() || description.is_empty() {
                return Err(ConfigError::Invalid {
                    key: "SQUAD_AGENTS",
                    reason: format!("'{entry}' needs both a name and a description"),
                });
            }
            Ok(AgentSpec {
                name: name.to_string(),
                description: description.to_string(),
            })
        })
        .collect()
}

const DEFAULT_AGENTS: &str = "Tech Agent|Hardware, software, networking and troubleshooting questions;\
Billing Agent|Invoices, payments, refunds and subscription questions;\
General Agent|General knowledge and small talk that fits no other agent";

/// Server settings
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub provider: ProviderKind,
    /// Model used by agents
    pub model: String,
    /// Model used for classification
    pub classifier_model: String,
    pub agents: Vec<AgentSpec>,
    /// Name of the fallback agent; the first declared agent when unset
    pub default_agent: Option<String>,
    /// Summarize trimmed history instead of discarding it
    pub summarize_history: bool,
    /// Agents answer with token streams
    pub streaming: bool,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let provider = lookup("SQUAD_PROVIDER")
            .map_or(Ok(ProviderKind::Ollama), |raw| ProviderKind::parse(&raw))?;
        let model = lookup("SQUAD_MODEL").unwrap_or_else(|| match provider {
            ProviderKind::Ollama => "llama3.2".into(),
            ProviderKind::OpenAi => "gpt-4o-mini".into(),
        });
        let classifier_model = lookup("SQUAD_CLASSIFIER_MODEL").unwrap_or_else(|| model.clone());
        let agents = parse_agents(&lookup("SQUAD_AGENTS").unwrap_or_else(|| DEFAULT_AGENTS.into()))?;
        if agents.is_empty() {
            return Err(ConfigError::Invalid {
                key: "SQUAD_AGENTS",
                reason: "at least one agent is required".into(),
            });
        }

        let flag = |key: &'static str, default: bool| -> Result<bool, ConfigError> {
            lookup(key).map_or(Ok(default), |raw| match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => Ok(true),
                "0" | "false" | "no" => Ok(false),
                other => Err(ConfigError::Invalid {
                    key,
                    reason: format!("expected a boolean, got '{other}'"),
                }),
            })
        };

        Ok(Self {
            bind_addr: lookup("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:3000".into()),
            provider,
            model,
            classifier_model,
            agents,
            default_agent: lookup("SQUAD_DEFAULT_AGENT").filter(|name| !name.trim().is_empty()),
            summarize_history: flag("SQUAD_SUMMARIZE_HISTORY", false)?,
            streaming: flag("SQUAD_STREAMING", true)?,
        })
    }
}
