//! Configuração do mediabatch carregada a partir de `mediabatch.toml`.
//!
//! A struct [`BatchConfig`] contém todos os parâmetros configuráveis do run:
//! backend de geração, retentativas, pausas entre arquivos/tarefas, regras de
//! validação e a lista de tarefas. Valores não presentes no arquivo usam
//! defaults sensíveis. A variável de ambiente `MEDIABATCH_API_KEY` tem
//! precedência sobre o arquivo.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::Path;

use crate::task::MediaKind;
use crate::validator::ValidationRules;

/// Configuração de nível superior carregada de `mediabatch.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
    /// Chave da API do serviço de geração.
    #[serde(default)]
    pub api_key: String,

    /// Backend de geração: "http" ou "command".
    #[serde(default = "default_generator")]
    pub generator: String,

    /// Endpoint do backend HTTP.
    #[serde(default)]
    pub endpoint: String,

    /// Programa executado pelo backend "command".
    #[serde(default)]
    pub command: String,

    /// Máximo de tentativas por arquivo antes de registrar falha.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Pausa fixa em milissegundos entre tentativas (sem backoff exponencial).
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Pausa fixa entre arquivos de uma mesma tarefa.
    #[serde(default = "default_file_delay_ms")]
    pub file_delay_ms: u64,

    /// Pausa fixa entre tarefas.
    #[serde(default = "default_task_delay_ms")]
    pub task_delay_ms: u64,

    /// Tamanho do pool de workers para validação e correlação.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Valida arquivos de uma tarefa em paralelo (pool limitado).
    #[serde(default = "default_true")]
    pub parallel_validation: bool,

    /// Executa tarefas independentes concorrentemente (pool limitado).
    #[serde(default)]
    pub parallel_tasks: bool,

    /// Modo legado: qualquer arquivo rejeitado aborta o run inteiro antes
    /// de qualquer despacho. O padrão é pular apenas a tarefa afetada.
    #[serde(default)]
    pub strict_validation: bool,

    /// Regras declarativas de validação por tipo de mídia.
    #[serde(default)]
    pub rules: ValidationRules,

    /// Lista de tarefas do run.
    #[serde(default)]
    pub tasks: Vec<TaskConfig>,
}

/// Uma tarefa configurada: diretório base, layout e parâmetros de geração.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskConfig {
    /// Nome da tarefa (também o identificador de efeito usado pelo gerador).
    pub name: String,

    /// Diretório base da tarefa.
    pub dir: String,

    /// Tipo de mídia de entrada.
    #[serde(default = "default_kind")]
    pub kind: MediaKind,

    /// Subdiretório de entradas sob `dir`.
    #[serde(default = "default_input_subdir")]
    pub input_subdir: String,

    /// Subdiretório de artefatos gerados sob `dir`.
    #[serde(default = "default_output_subdir")]
    pub output_subdir: String,

    /// Subdiretório de registros de resultado sob `dir`.
    #[serde(default = "default_metadata_subdir")]
    pub metadata_subdir: String,

    /// Árvore de referência para o modo de comparação.
    #[serde(default)]
    pub reference_dir: Option<String>,

    /// Instante mais cedo (RFC 3339) em que o despacho pode começar.
    #[serde(default)]
    pub start_at: Option<DateTime<Utc>>,

    /// Parâmetros opacos repassados ao gerador sem interpretação.
    #[serde(default, rename = "params")]
    pub generator_params: serde_json::Map<String, serde_json::Value>,
}

// Backend padrão: "http".
fn default_generator() -> String {
    "http".to_string()
}

// Valor padrão para tentativas máximas: 3.
fn default_max_retries() -> u32 {
    3
}

// Pausa padrão entre tentativas: 5s.
fn default_retry_delay_ms() -> u64 {
    5000
}

// Pausa padrão entre arquivos: 2s.
fn default_file_delay_ms() -> u64 {
    2000
}

// Pausa padrão entre tarefas: 10s.
fn default_task_delay_ms() -> u64 {
    10_000
}

// Pool padrão: 4 workers.
fn default_workers() -> usize {
    4
}

fn default_true() -> bool {
    true
}

fn default_kind() -> MediaKind {
    MediaKind::Image
}

fn default_input_subdir() -> String {
    "input".to_string()
}

fn default_output_subdir() -> String {
    "generated".to_string()
}

fn default_metadata_subdir() -> String {
    "Metadata".to_string()
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            generator: default_generator(),
            endpoint: String::new(),
            command: String::new(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            file_delay_ms: default_file_delay_ms(),
            task_delay_ms: default_task_delay_ms(),
            workers: default_workers(),
            parallel_validation: true,
            parallel_tasks: false,
            strict_validation: false,
            rules: ValidationRules::default(),
            tasks: Vec::new(),
        }
    }
}

impl BatchConfig {
    /// Carrega a configuração do caminho fornecido, ou de `mediabatch.toml`
    /// no diretório atual. Usa valores padrão se o arquivo não existir.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.unwrap_or_else(|| Path::new("mediabatch.toml"));
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<BatchConfig>(&contents)?
        } else {
            Self::default()
        };

        // Variável de ambiente tem precedência sobre o arquivo para a chave API.
        if let Ok(key) = std::env::var("MEDIABATCH_API_KEY") {
            if !key.is_empty() {
                config.api_key = key;
            }
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = BatchConfig::default();
        assert_eq!(config.generator, "http");
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay_ms, 5000);
        assert_eq!(config.workers, 4);
        assert!(config.parallel_validation);
        assert!(!config.parallel_tasks);
        assert!(!config.strict_validation);
        assert!(config.tasks.is_empty());
    }

    #[test]
    fn deserialize_partial_toml() {
        let toml_str = r#"
            api_key = "mb-test-123"
            max_retries = 5

            [[tasks]]
            name = "Ocean Wave"
            dir = "/data/ocean"
        "#;
        let config: BatchConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.api_key, "mb-test-123");
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.retry_delay_ms, 5000);
        assert_eq!(config.tasks.len(), 1);
        assert_eq!(config.tasks[0].name, "Ocean Wave");
        assert_eq!(config.tasks[0].input_subdir, "input");
        assert_eq!(config.tasks[0].metadata_subdir, "Metadata");
        assert!(matches!(config.tasks[0].kind, MediaKind::Image));
    }

    #[test]
    fn deserialize_task_with_params_and_schedule() {
        let toml_str = r#"
            [[tasks]]
            name = "Slow Zoom"
            dir = "/data/zoom"
            kind = "video"
            start_at = "2026-09-01T08:00:00Z"

            [tasks.params]
            prompt = "slow cinematic zoom"
            model = "gen-v2"
            strength = 0.8
        "#;
        let config: BatchConfig = toml::from_str(toml_str).unwrap();
        let task = &config.tasks[0];
        assert!(matches!(task.kind, MediaKind::Video));
        assert!(task.start_at.is_some());
        assert_eq!(
            task.generator_params.get("prompt").and_then(|v| v.as_str()),
            Some("slow cinematic zoom")
        );
        assert_eq!(
            task.generator_params.get("strength").and_then(|v| v.as_f64()),
            Some(0.8)
        );
    }

    #[test]
    fn load_falls_back_to_defaults() {
        // Sem mediabatch.toml no diretório de teste, deve usar defaults.
        let config = BatchConfig::load(Some(Path::new("/nonexistent/mediabatch.toml"))).unwrap();
        assert_eq!(config.max_retries, 3);
    }
}
