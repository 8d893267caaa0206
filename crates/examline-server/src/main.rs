//! examline — webhook server binary.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::Parser;

use examline_adapters::{load_config_from, GithubQuestionBank, OpenAiExplainer};
use examline_core::store::RecordStore;
use examline_core::subject::SubjectCatalog;
use examline_core::Dispatcher;

mod push;
mod webhook;

use push::LinePush;
use webhook::AppState;

#[derive(Parser)]
#[command(name = "examline", version, about = "Conversational exam-practice bot")]
struct Cli {
    /// Config file path (defaults to examline.toml, then ~/.config/examline/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the listen address from the config
    #[arg(long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("examline=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config_from(cli.config.as_deref())?;
    let listen = cli.listen.unwrap_or_else(|| config.listen.clone());

    std::fs::create_dir_all(&config.data_dir)?;
    let store = Arc::new(RecordStore::new(&config.data_dir));

    let source = Arc::new(GithubQuestionBank::new(
        &config.bank.owner,
        config.bank.api_base.clone(),
        config.bank.raw_base.clone(),
    ));
    let explainer = Arc::new(OpenAiExplainer::new(
        &config.openai.api_key,
        config.openai.base_url.clone(),
        config.openai.model.clone(),
    ));
    let port = Arc::new(LinePush::new(
        &config.line.channel_access_token,
        config.line.api_base.clone(),
    ));

    let dispatcher = Dispatcher::new(store, SubjectCatalog::default(), source, explainer)
        .with_questions_per_session(config.quiz.questions_per_session)
        .with_explanation_quota(config.quiz.explanation_quota);

    let state = Arc::new(AppState { dispatcher, port });
    let app = webhook::router(state);

    let listener = tokio::net::TcpListener::bind(&listen).await?;
    tracing::info!(%listen, data_dir = %config.data_dir.display(), "examline listening");
    axum::serve(listener, app).await?;
    Ok(())
}
