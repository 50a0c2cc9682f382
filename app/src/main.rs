use anyhow::Context;
use bistro::DashboardApp;
use bistro_core::config::ClientSettings;
use bistro_core::order::{OrderStatus, RecordId};
use bistro_core::session::SessionClient;
use bistro_core::telemetry;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::runtime::Runtime;

#[derive(Parser, Debug)]
#[command(name = "bistro", version, about = "Bistro dashboard client")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in and store the session credentials.
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Create an account and sign in.
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    Logout,
    Status,
    /// Send an authenticated API request and print the JSON response.
    Request {
        method: String,
        path: String,
        #[arg(long)]
        body: Option<String>,
    },
    /// Show the live kitchen board.
    Kds,
    /// Ask the kitchen to move an order to a new status.
    Advance {
        order_id: String,
        #[arg(value_parser = parse_status)]
        status: OrderStatus,
    },
}

fn parse_status(value: &str) -> Result<OrderStatus, String> {
    value.parse()
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init_tracing(telemetry::filter_from_env("warn"))?;

    let cli = Cli::parse();
    let settings = ClientSettings::load()?;
    let session = Arc::new(
        SessionClient::from_settings(&settings).context("failed to initialise the session")?,
    );
    let app = DashboardApp::new(session, settings);
    let runtime = Runtime::new()?;

    match cli.command {
        Command::Login { email, password } => runtime.block_on(app.login(&email, &password)),
        Command::Register {
            name,
            email,
            password,
        } => runtime.block_on(app.register(&name, &email, &password)),
        Command::Logout => {
            app.logout();
            Ok(())
        }
        Command::Status => {
            app.status();
            Ok(())
        }
        Command::Request { method, path, body } => {
            runtime.block_on(app.request(&method, &path, body.as_deref()))
        }
        Command::Kds => runtime.block_on(app.kitchen_board()).map(|_| ()),
        Command::Advance { order_id, status } => {
            runtime.block_on(app.advance_order(RecordId::new(order_id), status))
        }
    }
}
