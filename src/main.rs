use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use searchdb_operator::{controller, telemetry, Error};
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the operator
    Run(RunArgs),
    /// Show version and build information
    Version,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Only watch SearchClusters in this namespace (all namespaces if unset)
    #[arg(long, env = "OPERATOR_NAMESPACE")]
    namespace: Option<String>,

    /// Emit logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Seconds to wait after node sets converge (0 disables the wait)
    #[arg(long, env = "SETTLE_SECONDS", default_value_t = 30)]
    settle_seconds: u64,

    /// Do not serve the validating admission webhook
    #[arg(long, env = "DISABLE_WEBHOOK")]
    disable_webhook: bool,

    /// Webhook listen address
    #[arg(long, env = "WEBHOOK_ADDR", default_value = "0.0.0.0:8443")]
    webhook_addr: SocketAddr,

    /// PEM certificate for the webhook (plain HTTP when unset)
    #[arg(long, env = "WEBHOOK_TLS_CERT", requires = "tls_key")]
    tls_cert: Option<String>,

    /// PEM private key for the webhook
    #[arg(long, env = "WEBHOOK_TLS_KEY", requires = "tls_cert")]
    tls_key: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    match args.command {
        Commands::Version => {
            println!("SearchDB Operator v{}", env!("CARGO_PKG_VERSION"));
            println!("Build Date: {}", env!("BUILD_DATE"));
            println!("Git SHA: {}", env!("GIT_SHA"));
            println!("Rust Version: {}", env!("RUST_VERSION"));
            Ok(())
        }
        Commands::Run(run_args) => run_operator(run_args).await,
    }
}

async fn run_operator(args: RunArgs) -> Result<(), Error> {
    telemetry::init_logging(args.log_json)?;

    info!("Starting SearchDB Operator v{}", env!("CARGO_PKG_VERSION"));

    let client = kube::Client::try_default()
        .await
        .map_err(Error::KubeError)?;

    info!("Connected to Kubernetes cluster");

    #[cfg(feature = "admission-webhook")]
    {
        if !args.disable_webhook {
            spawn_webhook(&client, &args)?;
        }
    }

    let state = Arc::new(controller::ControllerState::new(
        client,
        Duration::from_secs(args.settle_seconds),
    ));

    let result = controller::run_controller(state, args.namespace).await;

    telemetry::shutdown_telemetry();

    result
}

#[cfg(feature = "admission-webhook")]
fn spawn_webhook(client: &kube::Client, args: &RunArgs) -> Result<(), Error> {
    use searchdb_operator::webhook::{AdmissionHandles, AdmissionState, WebhookServer};

    if args.tls_cert.is_some() {
        rustls::crypto::aws_lc_rs::default_provider()
            .install_default()
            .map_err(|_| Error::ConfigError("Failed to install rustls crypto provider".into()))?;
    }

    let (ports, _) = controller::kube_ports(client.clone());
    let state = AdmissionState::Ready(AdmissionHandles {
        catalog: ports.catalog,
        secrets: ports.secrets,
        clusters: Arc::new(controller::KubeClusters::new(client.clone())),
    });

    let mut server = WebhookServer::new(state);
    if let (Some(cert), Some(key)) = (args.tls_cert.clone(), args.tls_key.clone()) {
        server = server.with_tls(cert, key);
    }

    let addr = args.webhook_addr;
    tokio::spawn(async move {
        if let Err(e) = server.start(addr).await {
            tracing::error!("Webhook server error: {:?}", e);
        }
    });
    Ok(())
}
