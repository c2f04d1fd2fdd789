use anyhow::Result;
use serenity::{model::gateway::GatewayIntents, Client};
use songbird::{SerenityInit, Songbird};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use guild_jukebox::audio::{voice::SongbirdConnector, SessionRegistry};
use guild_jukebox::bot::{notifier::spawn_notifier, JukeboxBot, JukeboxRegistry};
use guild_jukebox::config::Config;
use guild_jukebox::sources::{SourceResolver, YtDlpProvider};

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("guild_jukebox=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando Guild Jukebox v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let config = Config::load()?;
    info!("{}", config.summary());

    let provider = Arc::new(YtDlpProvider::new(
        config.ytdlp_path.clone(),
        config.ytdlp_concurrency,
    ));

    // Manejar health check si es necesario
    if std::env::args().any(|arg| arg == "--health-check") {
        let version = provider.check_available().await?;
        println!("OK (yt-dlp {version})");
        return Ok(());
    }

    let resolver = Arc::new(SourceResolver::new(provider, config.resolver_settings()));
    let songbird = Songbird::serenity();
    let registry = Arc::new(SessionRegistry::new(
        Arc::new(SongbirdConnector::new(songbird.clone())),
        resolver,
        config.session_settings(),
        config.idle_timeout(),
    ));

    // Configurar intents mínimos necesarios
    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_VOICE_STATES
        | GatewayIntents::GUILD_MESSAGES;

    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(JukeboxBot::new(registry.clone()))
        .register_songbird_with(songbird)
        .await?;

    {
        let mut data = client.data.write().await;
        data.insert::<JukeboxRegistry>(registry.clone());
    }

    let shutdown = CancellationToken::new();
    let sweeper = registry.spawn_idle_sweeper(config.sweep_interval(), shutdown.clone());
    let notifier = spawn_notifier(client.http.clone(), registry.subscribe(), shutdown.clone());

    // Manejar shutdown graceful
    let shard_manager = client.shard_manager.clone();
    let registry_for_signal = registry.clone();
    let shutdown_for_signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Error al registrar Ctrl+C: {:?}", e);
            return;
        }
        info!("⚠️ Señal de shutdown recibida, cerrando...");
        shutdown_for_signal.cancel();
        registry_for_signal.shutdown_all().await;
        shard_manager.shutdown_all().await;
    });

    // Iniciar bot
    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    shutdown.cancel();
    let _ = tokio::join!(sweeper, notifier);
    Ok(())
}
