//! Interface de linha de comando do resolva baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (run, resume, status,
//! demo) e flags globais (--max-retries, --verbose).

use clap::{Parser, Subcommand};

/// resolva — Orquestrador resiliente de resolução de disputas.
#[derive(Debug, Parser)]
#[command(name = "resolva", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Número máximo de retentativas para fases elegíveis.
    #[arg(long, global = true)]
    pub max_retries: Option<u32>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Executa uma disputa com a descrição fornecida.
    Run {
        /// Descrição da disputa (o que aconteceu com a cobrança).
        description: Option<String>,

        /// Caminho para um arquivo JSON contendo a tarefa completa.
        #[arg(long)]
        file: Option<String>,

        /// Identificador da tarefa. Gerado automaticamente se omitido.
        #[arg(long)]
        task_id: Option<String>,
    },

    /// Retoma uma disputa a partir do último checkpoint.
    Resume {
        /// Identificador da tarefa a retomar.
        task_id: String,
    },

    /// Mostra o último checkpoint registrado para uma tarefa.
    Status {
        /// Identificador da tarefa.
        task_id: String,
    },

    /// Executa a demonstração embutida do pipeline de disputas.
    Demo,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses_run_subcommand() {
        let cli = Cli::parse_from(["resolva", "run", "charged twice for one order"]);
        match cli.command {
            Command::Run {
                description,
                file,
                task_id,
            } => {
                assert_eq!(description.unwrap(), "charged twice for one order");
                assert!(file.is_none());
                assert!(task_id.is_none());
            }
            _ => panic!("expected Run command"),
        }
    }

    #[test]
    fn cli_parses_global_flags() {
        let cli = Cli::parse_from(["resolva", "--max-retries", "5", "--verbose", "demo"]);
        assert!(cli.verbose);
        assert_eq!(cli.max_retries, Some(5));
    }

    #[test]
    fn cli_parses_resume_subcommand() {
        let cli = Cli::parse_from(["resolva", "resume", "d-42"]);
        match cli.command {
            Command::Resume { task_id } => assert_eq!(task_id, "d-42"),
            _ => panic!("expected Resume command"),
        }
    }

    #[test]
    fn cli_parses_status_subcommand() {
        let cli = Cli::parse_from(["resolva", "status", "d-42"]);
        match cli.command {
            Command::Status { task_id } => assert_eq!(task_id, "d-42"),
            _ => panic!("expected Status command"),
        }
    }

    #[test]
    fn cli_verify() {
        Cli::command().debug_assert();
    }
}
