//! One-shot CLI: answer a question from the command line.
//!
//! Usage: `studyforge "<question>" [subject] [grade]`

use studyforge_engine::{AnswerEngine, AnswerRequest};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = studyforge_common::AppConfig::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("studyforge_engine=info,studyforge_common=info")
        }))
        .init();

    studyforge_common::metrics::register_metrics();

    let mut args = std::env::args().skip(1);
    let question = match args.next() {
        Some(q) => q,
        None => {
            eprintln!("Usage: studyforge \"<question>\" [subject] [grade]");
            std::process::exit(2);
        }
    };
    let subject = args.next();
    let grade = args.next().and_then(|g| g.parse::<u8>().ok());

    tracing::info!(version = studyforge_common::VERSION, "Starting StudyForge");

    let engine = AnswerEngine::from_config(config)?;

    let mut request = AnswerRequest::new(question);
    request.subject = subject;
    request.grade = grade;

    let result = engine.answer(request).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);

    Ok(())
}
