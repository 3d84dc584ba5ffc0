use std::sync::Arc;

use axum::Router;
use clap::{Args, Parser, Subcommand};

use engine_backend::sim::SimulatedBackend;
use engine_common::EngineConfig;
use engine_core::Engine;

#[derive(Parser, Debug)]
#[command(name = "engine", version, about = "Admission and scheduling engine CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Serve,
    Submit(SubmitArgs),
    TenantStatus(TenantStatusArgs),
    RegisterTenant(RegisterTenantArgs),
    Stats(StatsArgs),
    Version,
}

#[derive(Args, Debug)]
struct SubmitArgs {
    #[arg(short, long)]
    tenant_id: String,
    #[arg(short, long, default_value = "")]
    prompt: String,
    #[arg(short = 'n', long, default_value_t = 128)]
    tokens_requested: i64,
    #[arg(short = 'b', long, default_value_t = 5)]
    priority_bid: i32,
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    url: String,
}

#[derive(Args, Debug)]
struct TenantStatusArgs {
    tenant_id: String,
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    url: String,
}

#[derive(Args, Debug)]
struct RegisterTenantArgs {
    tenant_id: String,
    #[arg(long, default_value_t = 100.0)]
    rate: f64,
    #[arg(long, default_value_t = 100.0)]
    burst_cap: f64,
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    url: String,
}

#[derive(Args, Debug)]
struct StatsArgs {
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    url: String,
}

#[tokio::main]
async fn main() {
    engine_obs::init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve => serve().await,
        Commands::Submit(args) => submit(args).await,
        Commands::TenantStatus(args) => tenant_status(args).await,
        Commands::RegisterTenant(args) => register_tenant(args).await,
        Commands::Stats(args) => stats(args).await,
        Commands::Version => println!("{}", env!("CARGO_PKG_VERSION")),
    }
}

async fn serve() {
    let config = EngineConfig::load();
    let backend = Arc::new(SimulatedBackend::new(config.prefill_rate, config.decode_base));
    let engine = Arc::new(Engine::start(config, backend));
    let app: Router = engine_api::app_with_engine(engine);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", 8080)).await.unwrap();
    tracing::info!("listening on http://0.0.0.0:8080");
    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
    };
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .unwrap();
}

async fn submit(args: SubmitArgs) {
    let client = reqwest::Client::new();
    let body = serde_json::json!({
        "tenant_id": args.tenant_id,
        "prompt": args.prompt,
        "tokens_requested": args.tokens_requested,
        "priority_bid": args.priority_bid,
    });
    match client.post(format!("{}/submit", args.url)).json(&body).send().await {
        Ok(resp) => println!("{}", resp.text().await.unwrap_or_default()),
        Err(e) => eprintln!("request error: {e}"),
    }
}

async fn tenant_status(args: TenantStatusArgs) {
    let client = reqwest::Client::new();
    match client.get(format!("{}/tenant/{}", args.url, args.tenant_id)).send().await {
        Ok(resp) => println!("{}", resp.text().await.unwrap_or_default()),
        Err(e) => eprintln!("request error: {e}"),
    }
}

async fn register_tenant(args: RegisterTenantArgs) {
    let client = reqwest::Client::new();
    let body = serde_json::json!({
        "tenant_id": args.tenant_id,
        "rate": args.rate,
        "burst_cap": args.burst_cap,
    });
    match client.post(format!("{}/tenant", args.url)).json(&body).send().await {
        Ok(resp) => println!("status: {}", resp.status()),
        Err(e) => eprintln!("request error: {e}"),
    }
}

async fn stats(args: StatsArgs) {
    use sysinfo::{CpuExt, System, SystemExt};
    let mut sys = System::new_all();
    sys.refresh_all();
    let total_mem = sys.total_memory();
    let used_mem = sys.used_memory();
    let cpu_avg: f32 = sys.cpus().iter().map(|c| c.cpu_usage()).sum::<f32>() / (sys.cpus().len() as f32);
    println!("CPU: {cpu_avg:.1}%");
    println!("Memory: {} / {} MiB", used_mem / 1024 / 1024, total_mem / 1024 / 1024);

    let client = reqwest::Client::new();
    match client
        .get(format!("{}/metrics_snapshot", args.url))
        .send()
        .await
    {
        Ok(resp) => match resp.json::<serde_json::Value>().await {
            Ok(snapshot) => {
                let gpu_utilization = snapshot
                    .get("gpu_utilization")
                    .and_then(|v| v.as_f64())
                    .unwrap_or(0.0);
                println!("GPU utilization (modeled): {:.1}%", gpu_utilization * 100.0);
            }
            Err(e) => eprintln!("failed to parse metrics snapshot: {e}"),
        },
        Err(e) => eprintln!("request error: {e}"),
    }
}
