mod client;
mod config;
mod error;
mod interview;
mod protocol;
mod quiz;
mod ratelimit;
mod server;
mod session;
mod sse;
mod storage;
#[cfg(test)]
mod testing;
mod ui;

use clap::{Parser, Subcommand};
use server::ServerConfig;
use std::path::PathBuf;
use tokio::io::AsyncReadExt;

#[derive(Parser)]
#[command(name = "aceai", version, about = "Turn a job description into a study plan and mock interview")]
struct Cli {
    /// Base URL of the study backend.
    #[arg(long, global = true, env = "STUDY_API_URL", default_value = config::DEFAULT_API_URL)]
    api_url: String,

    /// Where the course, session and rate-limit snapshot are kept.
    #[arg(long, global = true, env = "ACEAI_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Stream a course guide for a role. Reads stdin when no words are given.
    Generate {
        prompt: Vec<String>,
        /// Use one of the built-in role descriptions, numbered from 1.
        #[arg(long, conflicts_with = "prompt")]
        preset: Option<usize>,
    },
    /// Take the saved course's quizzes.
    Quiz {
        /// Only this module, numbered from 1.
        #[arg(long)]
        module: Option<usize>,
    },
    /// Practice the saved mock interview questions.
    Interview,
    /// Show the last rate-limit snapshot.
    Limits {
        #[arg(long)]
        watch: bool,
    },
    /// Serve the request/response proxy endpoints.
    Serve {
        #[arg(long, env = "ACEAI_LISTEN", default_value = config::DEFAULT_LISTEN)]
        listen: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    dotenvy::dotenv().ok();
    config::init_logging();

    let cli = Cli::parse();
    let data_dir = cli.data_dir.unwrap_or_else(config::default_data_dir);
    let context = ui::Context::new(&cli.api_url, data_dir);

    match cli.command {
        Command::Generate { prompt, preset } => {
            let prompt = if let Some(number) = preset {
                ui::preset(number)?.to_string()
            } else if prompt.is_empty() {
                let mut text = String::new();
                tokio::io::stdin().read_to_string(&mut text).await?;
                text
            } else {
                prompt.join(" ")
            };
            ui::generate(&context, prompt).await
        }
        Command::Quiz { module } => ui::quiz(&context, module).await,
        Command::Interview => ui::interview(&context).await,
        Command::Limits { watch } => ui::limits(&context, watch).await,
        Command::Serve { listen } => {
            server::run(ServerConfig {
                listen,
                upstream_base_url: cli.api_url,
            })
            .await
        }
    }
}
