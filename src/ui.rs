//! Interface de terminal do resolva — spinners e saída colorida.
//!
//! Usa as crates `indicatif` para spinners de progresso e `console` para
//! estilização com cores. O [`DisputeProgress`] acompanha visualmente
//! a execução de uma disputa no terminal.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::audit::AuditRecord;
use crate::state_machine::Phase;

/// Indicador visual de progresso para a execução de uma disputa no terminal.
///
/// Exibe um spinner animado durante o processamento e mensagens
/// coloridas para sucesso (verde), escalonamento (amarelo) e falha (vermelho).
pub struct DisputeProgress {
    // Barra de progresso/spinner do indicatif.
    pb: ProgressBar,
    // Estilo verde para mensagens de sucesso.
    green: Style,
    // Estilo vermelho para mensagens de falha.
    red: Style,
    // Estilo amarelo para retentativas e escalonamentos.
    yellow: Style,
}

impl DisputeProgress {
    /// Inicia o spinner com o identificador da disputa.
    pub fn start(task_id: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .expect("invalid template"),
        );
        pb.set_message(format!("CLASSIFY: {task_id}"));
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    /// Atualiza a mensagem do spinner para refletir a fase atual.
    #[allow(dead_code)]
    pub fn update_phase(&self, phase: Phase) {
        self.pb.set_message(format!("{phase}"));
    }

    /// Exibe uma mensagem de retentativa com o número da tentativa e o motivo.
    #[allow(dead_code)]
    pub fn retry(&self, attempt: u32, max: u32, reason: &str) {
        self.pb.println(format!(
            "  {} Retry {attempt}/{max}: {reason}",
            self.yellow.apply_to("↻")
        ));
    }

    /// Finaliza o spinner com o resumo da disputa concluída.
    pub fn finish(&self, record: &AuditRecord) {
        let transitions = record.state_transitions.join(" → ");
        if record.final_state == "ESCALATE" {
            self.pb.finish_with_message(format!(
                "{} {} escalated for manual review ({transitions})",
                self.yellow.apply_to("⚠"),
                record.task_id,
            ));
        } else {
            self.pb.finish_with_message(format!(
                "{} {} resolved in {}ms ({transitions})",
                self.green.apply_to("✔"),
                record.task_id,
                record.duration_ms,
            ));
        }
    }

    /// Finaliza o spinner com uma mensagem de falha.
    pub fn fail(&self, error: &str) {
        self.pb
            .finish_with_message(format!("{} {error}", self.red.apply_to("✘")));
    }
}
