use anyhow::Result;
use async_trait::async_trait;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use voxflow::config::{load_dotenv, ServiceConfig};
use voxflow::interview;
use voxflow::logger::init_tracing;
use voxflow::pipeline::runtime::Runtime;
use voxflow::pipeline::SpeechSink;
use voxflow::services::cartesia::CartesiaTts;
use voxflow::services::deepgram::DeepgramStt;
use voxflow::services::openrouter::OpenRouterLlm;
use voxflow::services::AudioClip;

#[derive(Parser, Debug)]
#[command(
    name = "voxflow",
    about = "Real-time voice interview orchestration",
    version = "0.2.0"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the interview runtime with a console transport
    Run(RunArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Seconds before an idle session is evicted
    #[arg(long, default_value = "1800")]
    session_timeout: u64,

    /// Optional log level override (e.g. error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Directory for daily-rolling JSON logs
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Env file holding the service credentials
    #[arg(long, default_value = ".env")]
    env_file: PathBuf,
}

impl Default for RunArgs {
    fn default() -> Self {
        Self {
            session_timeout: 1800,
            log_level: "info".to_string(),
            log_dir: None,
            env_file: PathBuf::from(".env"),
        }
    }
}

/// Console stand-in for the media transport: assistant utterances go to
/// stdout, synthesized audio is dropped after reporting its size.
#[derive(Debug)]
struct ConsoleSink;

#[async_trait]
impl SpeechSink for ConsoleSink {
    async fn deliver(&self, text: &str, audio: Option<AudioClip>) -> Result<()> {
        match audio {
            Some(clip) => println!("assistant> {text}  [{} bytes of audio]", clip.bytes.len()),
            None => println!("assistant> {text}"),
        }
        Ok(())
    }
}

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Run(RunArgs::default())) {
        Commands::Run(args) => run(args).await,
    }
}

async fn run(args: RunArgs) -> Result<()> {
    load_dotenv(&args.env_file);
    init_tracing(&args.log_level, args.log_dir.clone())?;

    let config = ServiceConfig::from_env()?;
    info!("starting voxflow interview runtime");

    let llm = Arc::new(OpenRouterLlm::new(&config.openrouter_api_key, &config.llm_model));
    let tts = Arc::new(CartesiaTts::new(&config.cartesia_api_key, &config.tts_voice_id));
    let stt = Arc::new(DeepgramStt::new(&config.deepgram_api_key));

    let runtime = Runtime::new(
        Arc::new(interview::initial_node),
        llm,
        tts,
        stt,
        args.session_timeout,
    );

    let handle = runtime.on_connected(Arc::new(ConsoleSink)).await;
    info!("console session {} started, type to talk, ctrl-c to hang up", handle.id());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = handle.closed() => {
                info!("session closed by the flow");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                runtime.on_disconnected(handle.id()).await;
                break;
            }
            line = lines.next_line() => match line? {
                Some(text) if !text.trim().is_empty() => {
                    runtime.on_transcript(handle.id(), text.trim()).await;
                }
                Some(_) => {}
                None => {
                    runtime.on_disconnected(handle.id()).await;
                    break;
                }
            },
        }
    }

    handle.closed().await;
    Ok(())
}
