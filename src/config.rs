//! Configuração do resolva carregada a partir de `resolva.toml`.
//!
//! A struct [`ResolvaConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! A variável de ambiente `RESOLVA_CACHE_URL` tem precedência sobre o arquivo.

use anyhow::Result;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Configuração de nível superior carregada de `resolva.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct ResolvaConfig {
    /// Máximo de retentativas para as fases elegíveis.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Atraso base em milissegundos para backoff exponencial.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Fator de crescimento entre atrasos consecutivos.
    #[serde(default = "default_exponential_base")]
    pub exponential_base: f64,

    /// Randomiza cada atraso no intervalo `[0, atraso]`.
    #[serde(default = "default_jitter")]
    pub jitter: bool,

    /// Falhas consecutivas antes do circuit breaker abrir.
    #[serde(default = "default_breaker_threshold")]
    pub breaker_threshold: u32,

    /// Segundos em aberto antes de admitir uma chamada de teste.
    #[serde(default = "default_breaker_timeout_secs")]
    pub breaker_timeout_secs: u64,

    /// URL do cache chave-valor. Vazio desabilita a camada de rede.
    #[serde(default)]
    pub cache_url: String,

    /// Tempo de vida das entradas de checkpoint no cache.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Diretório local para os arquivos de checkpoint (camada de fallback).
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: String,
}

// Valor padrão para retentativas máximas: 3.
fn default_max_retries() -> u32 {
    3
}

// Valor padrão para o atraso base: 1000ms.
fn default_base_delay_ms() -> u64 {
    1000
}

// Valor padrão para o fator exponencial: 2.0.
fn default_exponential_base() -> f64 {
    2.0
}

// Jitter habilitado por padrão.
fn default_jitter() -> bool {
    true
}

// Valor padrão para o limiar do breaker: 5 falhas.
fn default_breaker_threshold() -> u32 {
    5
}

// Valor padrão para o timeout do breaker: 30s.
fn default_breaker_timeout_secs() -> u64 {
    30
}

// TTL padrão no cache: 24 horas.
fn default_cache_ttl_secs() -> u64 {
    86_400
}

// Diretório padrão dos checkpoints.
fn default_checkpoint_dir() -> String {
    ".resolva/checkpoints".to_string()
}

impl Default for ResolvaConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            exponential_base: default_exponential_base(),
            jitter: default_jitter(),
            breaker_threshold: default_breaker_threshold(),
            breaker_timeout_secs: default_breaker_timeout_secs(),
            cache_url: String::new(),
            cache_ttl_secs: default_cache_ttl_secs(),
            checkpoint_dir: default_checkpoint_dir(),
        }
    }
}

impl ResolvaConfig {
    /// Carrega a configuração de `resolva.toml` no diretório atual.
    /// Usa valores padrão se o arquivo não existir.
    pub fn load() -> Result<Self> {
        let path = Path::new("resolva.toml");
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<ResolvaConfig>(&contents)?
        } else {
            Self::default()
        };

        // Variável de ambiente tem precedência sobre o arquivo de configuração.
        if let Ok(url) = std::env::var("RESOLVA_CACHE_URL")
            && !url.is_empty()
        {
            config.cache_url = url;
        }

        Ok(config)
    }

    /// Política de retentativas derivada da configuração.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            exponential_base: self.exponential_base,
            jitter: self.jitter,
        }
    }
}
