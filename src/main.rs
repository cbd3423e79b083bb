use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use yt_live_relay::{
    config::Config,
    models::{
        AudioCodec, BatchPlan, BatchState, EncodeSettings, Resolution, StreamParams, StreamTarget,
        VideoCodec,
    },
    services::{BroadcastRequest, FFmpegCommandBuilder, OAuthTokens, Privacy, YouTubeClient},
    utils::mask_url,
    SupervisorState,
};

#[derive(Parser)]
#[command(name = "yt-live-relay")]
#[command(version)]
#[command(about = "Stream local video files to YouTube Live over RTMP")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Database URL (overrides config file)
    #[arg(short = 'd', long, value_name = "URL")]
    database_url: Option<String>,

    /// FFmpeg executable (overrides config file)
    #[arg(long, value_name = "PATH")]
    ffmpeg: Option<String>,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Stream one video until it ends, fails or Ctrl-C
    Stream(StreamArgs),
    /// Run every batch in a TOML plan file concurrently
    Plan {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Show persisted log lines, most recent first
    Logs {
        /// Restrict to one session
        #[arg(long)]
        session: Option<String>,
        #[arg(short = 'n', long, default_value_t = 50)]
        limit: u32,
    },
    /// List recorded sessions
    Sessions,
    /// List saved YouTube channels
    Channels,
    /// Print the Google consent URL
    AuthUrl {
        /// Public URL of the app the redirect helper should return to
        #[arg(long)]
        app_url: String,
    },
    /// Exchange an authorization code and save the channel
    ExchangeCode {
        #[arg(long)]
        code: String,
    },
    /// Create a broadcast and ingest stream, optionally streaming a video to it
    CreateBroadcast(BroadcastArgs),
}

#[derive(Args)]
struct StreamArgs {
    /// Video file to loop
    #[arg(long)]
    video: PathBuf,
    #[arg(long, conflicts_with = "url")]
    stream_key: Option<String>,
    /// Full RTMP URL, used verbatim
    #[arg(long)]
    url: Option<String>,
    #[arg(long, default_value_t = 1)]
    batch: u32,
    #[command(flatten)]
    encode: EncodeArgs,
    #[arg(long)]
    channel: Option<String>,
    #[arg(long)]
    title: Option<String>,
}

#[derive(Args)]
struct EncodeArgs {
    /// Stop after this many seconds
    #[arg(long, value_name = "SECONDS")]
    duration: Option<u64>,
    /// 720x1280 portrait output for Shorts
    #[arg(long)]
    vertical: bool,
    #[arg(long)]
    resolution: Option<Resolution>,
    #[arg(long)]
    video_codec: Option<VideoCodec>,
    /// Video bitrate in kbps
    #[arg(long)]
    bitrate: Option<u32>,
    #[arg(long)]
    fps: Option<u32>,
    #[arg(long)]
    preset: Option<String>,
    #[arg(long)]
    audio_codec: Option<AudioCodec>,
    /// Audio bitrate in kbps
    #[arg(long)]
    audio_bitrate: Option<u32>,
}

#[derive(Args)]
struct BroadcastArgs {
    /// Saved channel whose credentials to use
    #[arg(long, conflicts_with = "tokens")]
    channel: Option<String>,
    /// URL-encoded token JSON from the redirect helper
    #[arg(long)]
    tokens: Option<String>,
    #[arg(long)]
    title: String,
    #[arg(long, default_value = "")]
    description: String,
    /// RFC 3339 start time, defaults to now
    #[arg(long)]
    start: Option<String>,
    /// Comma separated tags
    #[arg(long, value_delimiter = ',')]
    tags: Vec<String>,
    #[arg(long)]
    category: Option<String>,
    #[arg(long, default_value = "unlisted")]
    privacy: Privacy,
    #[arg(long)]
    made_for_kids: bool,
    /// Start streaming this video as soon as the broadcast exists
    #[arg(long)]
    video: Option<PathBuf>,
    #[command(flatten)]
    encode: EncodeArgs,
}

impl EncodeArgs {
    fn apply(&self, params: &mut StreamParams, defaults: &EncodeSettings) {
        let mut settings = defaults.clone();
        if let Some(resolution) = self.resolution {
            settings.resolution = resolution;
        }
        if let Some(codec) = self.video_codec {
            settings.video_codec = codec;
        }
        if let Some(bitrate) = self.bitrate {
            settings.video_bitrate_kbps = bitrate;
        }
        if let Some(fps) = self.fps {
            settings.fps = fps;
        }
        if let Some(preset) = &self.preset {
            settings.preset = preset.clone();
        }
        if let Some(codec) = self.audio_codec {
            settings.audio_codec = codec;
        }
        if let Some(bitrate) = self.audio_bitrate {
            settings.audio_bitrate_kbps = bitrate;
        }
        params.settings = settings;
        params.duration_limit_secs = self.duration;
        params.vertical = self.vertical;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_filter = format!("yt_live_relay={}", cli.log_level);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = Config::load(&cli.config)?;
    info!("Configuration loaded from: {}", cli.config);

    if let Some(database_url) = cli.database_url {
        config.database.url = database_url;
    }
    if let Some(ffmpeg) = cli.ffmpeg {
        config.ffmpeg.command = ffmpeg;
    }

    let state = SupervisorState::initialize(config).await;
    let result = run_command(&state, cli.command).await;
    state.shutdown().await;
    result
}

async fn run_command(state: &SupervisorState, command: Command) -> Result<()> {
    match command {
        Command::Stream(args) => {
            check_ffmpeg(state).await;
            let target = StreamTarget::from_parts(args.stream_key.clone(), args.url.clone())?;
            let mut params = StreamParams::new(&args.video, target);
            args.encode.apply(&mut params, &state.config.streaming.default_settings);
            params.channel_name = args.channel.clone();
            run_batches(state, vec![(args.batch, params, args.title.clone())]).await
        }
        Command::Plan { file } => {
            check_ffmpeg(state).await;
            let contents = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("Failed to read plan {}", file.display()))?;
            let plan = BatchPlan::from_toml(&contents)
                .map_err(|e| anyhow::anyhow!("Invalid plan {}: {}", file.display(), e))?;

            let defaults = &state.config.streaming.default_settings;
            let mut batches = Vec::with_capacity(plan.batches.len());
            for planned in &plan.batches {
                let params = planned
                    .to_params(defaults)
                    .with_context(|| format!("Batch {}", planned.index))?;
                batches.push((planned.index, params, planned.title.clone()));
            }
            run_batches(state, batches).await
        }
        Command::Logs { session, limit } => {
            let records = state.log_sink.query(session.as_deref(), limit).await?;
            for record in records {
                let batch = record
                    .batch_index
                    .map(|i| format!("#{}", i))
                    .unwrap_or_else(|| "-".to_string());
                println!("{} {} {}", record.session_id, batch, record.display_line());
            }
            Ok(())
        }
        Command::Sessions => {
            for session in state.sessions.load_all().await? {
                println!(
                    "{}  updated {}  video={}  title={}  batches={:?}",
                    session.session_id,
                    session.updated_at.format("%Y-%m-%d %H:%M:%S"),
                    session.video_name.as_deref().unwrap_or("-"),
                    session.stream_title.as_deref().unwrap_or("-"),
                    session.batch_indices
                );
            }
            Ok(())
        }
        Command::Channels => {
            for channel in state.channels.list_channels().await? {
                println!(
                    "{}  ({})  last used {}",
                    channel.channel_name,
                    channel.channel_id,
                    channel.last_used.format("%Y-%m-%d %H:%M:%S")
                );
            }
            Ok(())
        }
        Command::ExchangeCode { code } => {
            let client = YouTubeClient::new(state.config.youtube.clone())?;
            let tokens = client.exchange_code(&code).await?;
            let channel = client.get_channel_info(&tokens).await?;
            state
                .channels
                .save_channel(&channel.to_saved_channel(&tokens)?)
                .await?;
            println!(
                "Saved channel {} ({}), {} subscribers",
                channel.title,
                channel.channel_id,
                channel
                    .subscriber_count
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "hidden".to_string())
            );
            Ok(())
        }
        Command::CreateBroadcast(args) => create_broadcast(state, args).await,
        Command::AuthUrl { app_url } => {
            let client = YouTubeClient::new(state.config.youtube.clone())?;
            println!("{}", client.authorization_url(&app_url)?);
            Ok(())
        }
    }
}

async fn create_broadcast(state: &SupervisorState, args: BroadcastArgs) -> Result<()> {
    let client = YouTubeClient::new(state.config.youtube.clone())?;

    let tokens = match (&args.channel, &args.tokens) {
        (Some(name), _) => {
            let saved = state
                .channels
                .find_channel(name)
                .await?
                .with_context(|| format!("No saved channel named {}", name))?;
            let mut tokens = OAuthTokens::from_json(&saved.auth_json)?;
            if let Some(refresh) = tokens.refresh_token.clone() {
                tokens = client.refresh_access_token(&refresh).await?;
                let mut updated = saved.clone();
                updated.auth_json = tokens.to_json()?;
                state.channels.save_channel(&updated).await?;
            }
            state.channels.touch_channel(name).await?;
            tokens
        }
        (None, Some(encoded)) => OAuthTokens::from_query_param(encoded)?,
        (None, None) => anyhow::bail!("Pass --channel or --tokens"),
    };

    let scheduled_start = match &args.start {
        Some(start) => DateTime::parse_from_rfc3339(start)
            .with_context(|| format!("Invalid --start {}", start))?
            .with_timezone(&Utc),
        None => Utc::now(),
    };

    let request = BroadcastRequest {
        title: args.title.clone(),
        description: args.description.clone(),
        scheduled_start,
        tags: args.tags.clone(),
        category_id: args.category.clone(),
        privacy: args.privacy,
        made_for_kids: args.made_for_kids,
    };
    let live = client.create_live_stream(&tokens, &request).await?;
    let target = live.stream_target();

    println!("Broadcast: {}", live.broadcast_id);
    println!("Watch:     {}", live.watch_url);
    println!("Ingest:    {}", mask_url(target.secret()));

    let Some(video) = &args.video else {
        return Ok(());
    };

    check_ffmpeg(state).await;
    let mut params = StreamParams::new(video, target);
    args.encode.apply(&mut params, &state.config.streaming.default_settings);
    params.channel_name = args.channel.clone();
    run_batches(state, vec![(1, params, Some(args.title.clone()))]).await
}

async fn check_ffmpeg(state: &SupervisorState) {
    let builder = FFmpegCommandBuilder::from_config(&state.config.ffmpeg);
    match builder.check_available().await {
        (true, Some(version)) => info!("FFmpeg {} available", version),
        (true, None) => info!("FFmpeg available (unknown version)"),
        (false, _) => warn!(
            "FFmpeg command '{}' is not usable; batches will fail to start",
            builder.command()
        ),
    }
}

/// Start every batch, then wait for all of them. Ctrl-C stops them all.
async fn run_batches(
    state: &SupervisorState,
    batches: Vec<(u32, StreamParams, Option<String>)>,
) -> Result<()> {
    let supervisor = &state.supervisor;
    let mut started = Vec::new();

    for (index, params, title) in batches {
        if let Err(e) = state.sessions.record_batch(index, &params, title.as_deref()).await {
            warn!(batch_index = index, "Failed to record session metadata: {}", e);
        }
        match supervisor.start_batch(index, params).await {
            Ok(()) => started.push(index),
            Err(e) => warn!(batch_index = index, "Batch not started: {}", e),
        }
    }
    if started.is_empty() {
        anyhow::bail!("No batch could be started");
    }
    info!(
        "Session {} running batches {:?}",
        state.session_id(),
        started
    );

    let wait_all = async {
        let mut views = Vec::with_capacity(started.len());
        for index in &started {
            views.push(supervisor.wait_for_batch(*index).await);
        }
        views
    };
    tokio::pin!(wait_all);

    let views = tokio::select! {
        views = &mut wait_all => views,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, stopping batches");
            supervisor.stop_all().await;
            wait_all.await
        }
    };

    let mut failed = 0;
    for view in views {
        let view = view?;
        println!(
            "Batch {}: {} after {}s -> {}{}",
            view.batch_index,
            view.state,
            view.uptime_seconds().unwrap_or(0),
            view.target_display,
            view.failure
                .as_deref()
                .map(|f| format!(" ({})", f))
                .unwrap_or_default()
        );
        if view.state == BatchState::Failed {
            failed += 1;
        }
    }

    if failed > 0 {
        anyhow::bail!("{} batch(es) failed", failed);
    }
    Ok(())
}
