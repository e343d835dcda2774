//! Interface de linha de comando do mediabatch baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (run, correlate,
//! validate) e flags globais (--config, --max-retries, --verbose).

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// mediabatch — Orquestrador de geração de mídia em lote.
#[derive(Debug, Parser)]
#[command(name = "mediabatch", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho do arquivo de configuração (padrão: mediabatch.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Número máximo de tentativas por arquivo (sobrepõe a configuração).
    #[arg(long, global = true)]
    pub max_retries: Option<u32>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Executa o pipeline completo: validação, despacho e registro.
    Run {
        /// Executa apenas a tarefa com este nome.
        #[arg(long)]
        task: Option<String>,
    },

    /// Correlaciona artefatos gerados com as entradas de cada tarefa.
    Correlate {
        /// Correlaciona apenas a tarefa com este nome.
        #[arg(long)]
        task: Option<String>,
    },

    /// Valida as entradas de todas as tarefas sem despachar nada.
    Validate,
}
