//! Interface de terminal do mediabatch — spinners e saída colorida.
//!
//! Usa as crates `indicatif` para spinners de progresso e `console` para
//! estilização com cores. O [`TaskProgress`] acompanha visualmente o
//! despacho de uma tarefa; as funções `print_*` exibem o relatório do run
//! e o resultado da correlação.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::correlate::MediaPair;
use crate::orchestrator::RunReport;

/// Indicador visual de progresso para o despacho de uma tarefa.
///
/// Exibe um spinner animado durante o processamento e mensagens coloridas
/// para sucesso (verde), falha (vermelho) e retentativa (amarelo).
pub struct TaskProgress {
    // Barra de progresso/spinner do indicatif.
    pb: ProgressBar,
    // Estilo verde para mensagens de sucesso.
    green: Style,
    // Estilo vermelho para mensagens de falha.
    red: Style,
    // Estilo amarelo para avisos e retentativas.
    yellow: Style,
}

impl TaskProgress {
    /// Inicia o spinner com o nome da tarefa e retorna a instância.
    pub fn start(task_name: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .expect("invalid template"),
        );
        pb.set_message(format!("Task: {task_name}"));
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    /// Atualiza a mensagem do spinner para o arquivo em processamento.
    pub fn file(&self, name: &str) {
        self.pb.set_message(format!("Processing {name}"));
    }

    /// Exibe uma linha de retentativa sem interromper o spinner.
    pub fn retry(&self, attempt: u32, max: u32, name: &str, reason: &str) {
        self.pb.println(format!(
            "  {} Retry {attempt}/{max}: {name} ({reason})",
            self.yellow.apply_to("↻")
        ));
    }

    /// Exibe o resultado de um arquivo sem interromper o spinner.
    pub fn file_done(&self, name: &str, success: bool) {
        if success {
            self.pb
                .println(format!("  {} {name}", self.green.apply_to("✓")));
        } else {
            self.pb
                .println(format!("  {} {name}", self.red.apply_to("✗")));
        }
    }

    /// Exibe uma mensagem de aviso (tarefa pulada, arquivo rejeitado).
    pub fn warn(&self, message: &str) {
        self.pb
            .println(format!("  {} {message}", self.yellow.apply_to("!")));
    }

    /// Finaliza o spinner.
    pub fn finish(&self) {
        self.pb.finish_and_clear();
    }
}

/// Linha de aviso fora do contexto de um spinner (tarefas puladas, arquivos
/// rejeitados antes do despacho).
pub fn warn_line(message: &str) {
    eprintln!("  {} {message}", Style::new().yellow().apply_to("!"));
}

/// Imprime o relatório do run formatado em JSON com um cabeçalho colorido.
pub fn print_report(report: &RunReport) {
    let style = if report.total_failed() == 0 {
        Style::new().green().bold()
    } else {
        Style::new().red().bold()
    };
    println!();
    println!("{}", style.apply_to("─── Run Report ───"));
    println!(
        "{} succeeded, {} failed",
        report.total_succeeded(),
        report.total_failed()
    );
    println!(
        "{}",
        serde_json::to_string_pretty(report).unwrap_or_default()
    );
}

/// Imprime o resultado da correlação de uma tarefa: um ✓/✗ por entrada e
/// a contagem final. O modo de comparação acrescenta o estado da referência.
pub fn print_pairs(task_name: &str, pairs: &[MediaPair]) {
    let green = Style::new().green().bold();
    let red = Style::new().red().bold();
    let dim = Style::new().dim();

    println!();
    println!("─── Correlation: {task_name} ───");
    for pair in pairs {
        let mark = if pair.failed {
            red.apply_to("✗")
        } else {
            green.apply_to("✓")
        };
        let source = pair
            .source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| pair.source.display().to_string());
        let generated = if pair.generated.is_empty() {
            dim.apply_to("no artifact").to_string()
        } else {
            pair.generated
                .iter()
                .filter_map(|p| p.file_name())
                .map(|n| n.to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join(", ")
        };
        let dims = match pair.artifact_dimensions {
            Some((w, h)) => format!(" {}", dim.apply_to(format!("({w}x{h})"))),
            None => String::new(),
        };
        let reference = match pair.ref_failed {
            Some(true) => format!("  [ref: {}]", red.apply_to("missing")),
            Some(false) => format!("  [ref: {}]", green.apply_to("ok")),
            None => String::new(),
        };
        println!("  {mark} {source} → {generated}{dims}{reference}");
    }

    let failed = pairs.iter().filter(|p| p.failed).count();
    println!(
        "  {} paired, {} failed, {} total",
        pairs.len() - failed,
        failed,
        pairs.len()
    );
}
