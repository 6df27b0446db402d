use centavo_core::model::{ConfirmationView, ResendResponse};
use centavo_core::money::format_brl;
use clap::{Parser, Subcommand};
use serde_json::json;
use uuid::Uuid;

#[derive(Parser)]
#[command(
    name = "centavo",
    version,
    about = "Centavo operational CLI — inspect confirmations and force delivery retries"
)]
struct Cli {
    /// API base URL
    #[arg(long, env = "CENTAVO_API_URL", default_value = "http://localhost:8080")]
    api_url: String,

    /// Service token for the operational endpoints
    #[arg(long, env = "CENTAVO_OPS_TOKEN")]
    ops_token: Option<String>,

    /// Print raw JSON instead of the table rendering
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check API health
    Health,
    /// List confirmations waiting for a user reply
    Pending,
    /// List confirmed records that exhausted their delivery attempts
    Failed,
    /// Force one delivery attempt for a confirmation
    Resend {
        /// Confirmation id
        id: Uuid,
    },
}

fn exit_error(message: &str) -> ! {
    eprintln!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "error": "cli_error",
            "message": message
        }))
        .unwrap_or_else(|_| message.to_string())
    );
    std::process::exit(1);
}

async fn fetch(
    client: &reqwest::Client,
    method: reqwest::Method,
    url: String,
    ops_token: Option<&str>,
) -> String {
    let mut builder = client.request(method, &url);
    if let Some(token) = ops_token {
        builder = builder.bearer_auth(token);
    }

    let response = match builder.send().await {
        Ok(response) => response,
        Err(err) => exit_error(&format!("request to {url} failed: {err}")),
    };

    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if !status.is_success() {
        exit_error(&format!("{url} returned {status}: {body}"));
    }
    body
}

fn render_confirmations(body: &str, raw: bool) {
    if raw {
        println!("{body}");
        return;
    }

    let views: Vec<ConfirmationView> = match serde_json::from_str(body) {
        Ok(views) => views,
        Err(err) => exit_error(&format!("unexpected response shape: {err}")),
    };

    if views.is_empty() {
        println!("nothing to show");
        return;
    }

    for view in views {
        let category = match &view.sub_category_name {
            Some(sub) => format!("{} > {}", view.category_name, sub),
            None => view.category_name.clone(),
        };
        let mut line = format!(
            "{}  {:9}  {:>12}  {}  ({})",
            view.id,
            format!("{:?}", view.status).to_lowercase(),
            format_brl(view.amount_minor_units),
            category,
            view.date
        );
        if view.delivery_attempts > 0 {
            line.push_str(&format!("  attempts={}", view.delivery_attempts));
        }
        if let Some(error) = &view.last_delivery_error {
            line.push_str(&format!("  last_error={error}"));
        }
        println!("{line}");
    }
}

fn render_resend(body: &str, raw: bool) {
    if raw {
        println!("{body}");
        return;
    }

    let response: ResendResponse = match serde_json::from_str(body) {
        Ok(response) => response,
        Err(err) => exit_error(&format!("unexpected response shape: {err}")),
    };

    if response.delivered {
        match response.remote_transaction_id {
            Some(remote) => println!("{} delivered (remote: {remote})", response.id),
            None => println!("{} already delivered", response.id),
        }
    } else {
        println!(
            "{} failed: {}",
            response.id,
            response.error.unwrap_or_else(|| "unknown error".to_string())
        );
    }
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let token = cli.ops_token.as_deref();

    match cli.command {
        Commands::Health => {
            let body = fetch(
                &client,
                reqwest::Method::GET,
                format!("{}/health", cli.api_url),
                None,
            )
            .await;
            println!("{body}");
        }
        Commands::Pending => {
            let body = fetch(
                &client,
                reqwest::Method::GET,
                format!("{}/v1/ops/confirmations/pending", cli.api_url),
                token,
            )
            .await;
            render_confirmations(&body, cli.json);
        }
        Commands::Failed => {
            let body = fetch(
                &client,
                reqwest::Method::GET,
                format!("{}/v1/ops/deliveries/failed", cli.api_url),
                token,
            )
            .await;
            render_confirmations(&body, cli.json);
        }
        Commands::Resend { id } => {
            let body = fetch(
                &client,
                reqwest::Method::POST,
                format!("{}/v1/ops/deliveries/{}/resend", cli.api_url, id),
                token,
            )
            .await;
            render_resend(&body, cli.json);
        }
    }
}
