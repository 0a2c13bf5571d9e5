use std::io::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use magic_mirror::api::ApiServerBuilder;
use magic_mirror::db::{self, SCHEMA_VERSION};
use magic_mirror::dialogue::{Dialogue, OpenAiChat};
use magic_mirror::security::SessionKeys;
use magic_mirror::stt::{HttpTranscriber, RecognizerSettings, Recognizers};
use magic_mirror::tts::service::{EngineSettings, TtsServer, TtsServiceState};
use magic_mirror::tts::{HttpSpeechService, HttpVoiceModel, write_wav_file};
use magic_mirror::Config;

/// Voice model requests can run long on CPU hosts
const VOICE_MODEL_TIMEOUT: Duration = Duration::from_secs(300);

/// MagicMirror - voice assistant backend
#[derive(Parser)]
#[command(name = "magicmirror", version, about)]
struct Cli {
    /// Port of the main app (overrides config)
    #[arg(long, env = "MAGICMIRROR_PORT")]
    port: Option<u16>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the speech synthesis service
    TtsService {
        /// Port to listen on (overrides config)
        #[arg(long, env = "MAGICMIRROR_TTS_PORT")]
        port: Option<u16>,
    },
    /// Synthesize text into a WAV file
    Synthesize {
        /// Text to speak
        text: String,
        /// Output file
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Use the reference clip directly instead of the cached clone
        #[arg(long)]
        no_clone: bool,
        /// Registered speaker to use
        #[arg(long)]
        speaker: Option<String>,
    },
    /// Chat with the mirror in the terminal
    Chat,
    /// Create or migrate the database
    InitDb,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,magic_mirror=info",
        1 => "info,magic_mirror=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load();
    tracing::debug!(?config, "loaded configuration");

    match cli.command {
        None => serve(config, cli.port).await,
        Some(Command::TtsService { port }) => tts_service(config, port).await,
        Some(Command::Synthesize {
            text,
            output,
            no_clone,
            speaker,
        }) => synthesize(&config, &text, output, !no_clone, speaker.as_deref()).await,
        Some(Command::Chat) => chat(&config).await,
        Some(Command::InitDb) => init_db(&config),
    }
}

/// Run the main web app
async fn serve(config: Config, port: Option<u16>) -> anyhow::Result<()> {
    let port = port.unwrap_or(config.server.port);
    tracing::info!(port, "starting magicmirror");

    let pool = db::init(&config.server.database_path)?;
    std::fs::create_dir_all(&config.server.audio_dir).with_context(|| {
        format!(
            "failed to create audio directory {}",
            config.server.audio_dir.display()
        )
    })?;

    let chat = Arc::new(OpenAiChat::from_config(&config.llm)?);
    let speech = Arc::new(HttpSpeechService::new(&config.tts.service_url));
    let sessions = SessionKeys::new(&config.auth.secret_key, config.auth.session_ttl_hours);

    let mut builder = ApiServerBuilder::new(port, pool, chat, speech, sessions)
        .audio_dir(config.server.audio_dir.clone())
        .system_prompt(config.llm.system_prompt.clone())
        .password_rounds(config.auth.password_rounds);

    if let Some(transcriber) = HttpTranscriber::from_config(&config.stt)? {
        let recognizers = Recognizers::new(
            Arc::new(transcriber),
            RecognizerSettings::from(&config.stt),
            config.stt.partial_interval_ms,
        );
        builder = builder.recognizers(Arc::new(recognizers));
    }

    let server = builder.build();
    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => tracing::info!("shutting down"),
    }

    Ok(())
}

fn voice_model(config: &Config) -> anyhow::Result<HttpVoiceModel> {
    Ok(HttpVoiceModel::new(
        &config.tts.model_url,
        VOICE_MODEL_TIMEOUT,
    )?)
}

/// Run the standalone TTS service
async fn tts_service(config: Config, port: Option<u16>) -> anyhow::Result<()> {
    let port = port.unwrap_or(config.tts.service_port);
    let model = voice_model(&config)?;
    let settings = EngineSettings::from_config(&config.tts, &config.server.audio_dir);
    let state = Arc::new(TtsServiceState::new(Arc::new(model), settings));

    tracing::info!(port, model_url = %config.tts.model_url, "starting TTS service");

    tokio::select! {
        result = TtsServer::new(state, port).run() => result?,
        _ = tokio::signal::ctrl_c() => tracing::info!("shutting down"),
    }

    Ok(())
}

/// One-shot synthesis to a file
async fn synthesize(
    config: &Config,
    text: &str,
    output: Option<PathBuf>,
    use_clone: bool,
    speaker: Option<&str>,
) -> anyhow::Result<()> {
    let model = voice_model(config)?;
    let settings = EngineSettings::from_config(&config.tts, &config.server.audio_dir);
    let state = TtsServiceState::new(Arc::new(model), settings);
    let engine = state.engine().await?;

    let path = if let Some(spk_id) = speaker {
        let audio = engine.generate_with_speaker(text, spk_id).await?;
        match audio {
            Some(audio) => {
                let path = output.unwrap_or_else(|| {
                    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
                    engine.audio_dir().join(format!("tts_output_{stamp}.wav"))
                });
                write_wav_file(&path, &audio.samples, audio.sample_rate)?;
                Some(path)
            }
            None => None,
        }
    } else {
        engine.text_to_file(text, use_clone, output).await?
    };

    match path {
        Some(path) => println!("Saved {}", path.display()),
        None => anyhow::bail!("audio generation failed"),
    }

    Ok(())
}

/// Interactive console dialogue
async fn chat(config: &Config) -> anyhow::Result<()> {
    let backend = Arc::new(OpenAiChat::from_config(&config.llm)?);
    let mut dialogue = Dialogue::new(backend, config.llm.system_prompt.clone());

    println!("Talk to the mirror. Type 'q' to quit.\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let query = line.trim();
        if query == "q" {
            break;
        }
        if query.is_empty() {
            continue;
        }

        print!("Mirror: ");
        let result = dialogue
            .infer(query, &mut |token: &str| {
                print!("{token}");
                let _ = std::io::stdout().flush();
            })
            .await;
        println!();

        if let Err(e) = result {
            eprintln!("error: {e}");
        }
    }

    Ok(())
}

/// Create or migrate the database, then exit
fn init_db(config: &Config) -> anyhow::Result<()> {
    let path = &config.server.database_path;
    db::init(path)?;
    println!(
        "Database ready at {} (schema v{SCHEMA_VERSION})",
        path.display()
    );
    Ok(())
}
