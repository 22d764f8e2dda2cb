use clap::Parser;
use log::{error, info};
use server::acceptor::ControllerAcceptor;
use server::channel::ServerState;
use server::events::EventBus;
use server::modifier::{ModifierCatalog, SoundModifier};
use server::sync::{RequestHandler, StateRequestHandler, SyncClient};
use std::sync::{Arc, Mutex};

/// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server name reported to the controller
    #[clap(short, long, default_value = "voicechat")]
    name: String,
    /// Host address to bind the controller acceptor to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Port the external controller connects to
    #[clap(short, long, default_value = "28960")]
    port: u16,
    /// Hearing radius of the linear-circular modifier registered at startup
    #[clap(short, long, default_value = "50.0")]
    radius: f32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let bus = Arc::new(EventBus::new());
    let mut catalog = ModifierCatalog::new();
    catalog.register(SoundModifier::linear_circular(args.radius))?;

    let state = Arc::new(Mutex::new(ServerState::new(
        args.name.clone(),
        catalog,
        Arc::clone(&bus),
    )));
    let handler: Arc<Mutex<dyn RequestHandler>> =
        Arc::new(Mutex::new(StateRequestHandler::new(Arc::clone(&state))));

    let addr = format!("{}:{}", args.host, args.port);
    let (acceptor, mut controllers) = ControllerAcceptor::open(&addr).await?;
    info!("Server '{}' started", args.name);

    // Attach the synchronization client once the single controller shows up
    let controller_task = tokio::spawn(async move {
        if let Some(stream) = controllers.recv().await {
            let _client = SyncClient::attach(bus, stream, handler);
            // The client's tasks run until connection loss; keep it alive
            std::future::pending::<()>().await;
        }
    });

    tokio::select! {
        result = controller_task => {
            if let Err(e) = result {
                error!("Controller task failed: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    acceptor.close().await;
    Ok(())
}
