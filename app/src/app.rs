use crate::board::render_board;
use anyhow::{anyhow, bail, Context, Result};
use bistro_core::config::ClientSettings;
use bistro_core::feed::{classify, FeedStatus, Lane, OrderFeed};
use bistro_core::order::{OrderStatus, RecordId};
use bistro_core::push::LiveOrderFeed;
use bistro_core::session::{SessionClient, SessionEvent, SessionState};
use chrono::Utc;
use reqwest::Method;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

const BOARD_TICK: Duration = Duration::from_secs(60);
const CONFIRM_TIMEOUT: Duration = Duration::from_secs(10);

/// Terminal front-end over the session client and the kitchen feed.
pub struct DashboardApp {
    session: Arc<SessionClient>,
    settings: ClientSettings,
}

impl DashboardApp {
    pub fn new(session: Arc<SessionClient>, settings: ClientSettings) -> Self {
        Self { session, settings }
    }

    pub fn session(&self) -> &Arc<SessionClient> {
        &self.session
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<()> {
        match self.session.login(email, password).await {
            Ok(response) => {
                let who = response
                    .user
                    .as_ref()
                    .and_then(|user| user.name.clone())
                    .unwrap_or_else(|| email.to_string());
                println!("Logged in as {who}.");
                Ok(())
            }
            Err(err) => Err(anyhow!(self
                .session
                .last_error()
                .unwrap_or_else(|| err.user_message()))),
        }
    }

    pub async fn register(&self, name: &str, email: &str, password: &str) -> Result<()> {
        match self.session.register(name, email, password).await {
            Ok(_) => {
                println!("Account created, logged in as {name}.");
                Ok(())
            }
            Err(err) => Err(anyhow!(self
                .session
                .last_error()
                .unwrap_or_else(|| err.user_message()))),
        }
    }

    pub fn logout(&self) {
        self.session.logout();
        println!("Logged out.");
    }

    pub fn status(&self) {
        match self.session.state() {
            SessionState::Authenticated => {
                let user = self.session.current_user();
                let email = user
                    .as_ref()
                    .map(|u| u.email.as_str())
                    .unwrap_or("unknown user");
                let role = user
                    .as_ref()
                    .and_then(|u| u.role.as_deref())
                    .unwrap_or("-");
                println!("Authenticated as {email} (role {role})");
            }
            SessionState::Unauthenticated => println!("Not logged in."),
        }
        println!("API:  {}", self.settings.api_base_url);
        println!("Feed: {}", self.settings.feed_url);
    }

    pub async fn request(&self, method: &str, path: &str, body: Option<&str>) -> Result<()> {
        let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
            .with_context(|| format!("invalid HTTP method `{method}`"))?;
        let body = body
            .map(serde_json::from_str::<Value>)
            .transpose()
            .context("request body is not valid JSON")?;
        match self.session.call(method, path, body.as_ref()).await {
            Ok(value) => {
                println!("{}", serde_json::to_string_pretty(&value)?);
                Ok(())
            }
            Err(err) => {
                if self.session.state() == SessionState::Unauthenticated && err.is_unauthorized() {
                    println!("Session expired. Run `bistro login` to sign in again.");
                }
                Err(err.into())
            }
        }
    }

    /// Live two-column kitchen board. Redraws on every feed change and once a
    /// minute for the elapsed-time column. Returns the feed status the board
    /// ended with.
    pub async fn kitchen_board(&self) -> Result<FeedStatus> {
        let mut live = LiveOrderFeed::new(self.settings.feed_url.clone(), OrderFeed::new());
        let Some(token) = self.session.access_token() else {
            println!("Not logged in. Run `bistro login` first.");
            return Ok(live.feed().status());
        };
        // Subscribed before connecting so no credential change is missed.
        let mut session_events = self.session.subscribe();
        if let Err(err) = live.connect(Some(&token)).await {
            self.redraw(&live);
            return Err(err).context("failed to open the kitchen feed");
        }

        let mut orders = live.feed().subscribe();
        let mut status = live.feed().watch_status();
        let mut ticker = tokio::time::interval(BOARD_TICK);

        loop {
            tokio::select! {
                changed = orders.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    self.redraw(&live);
                }
                changed = status.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let current = status.borrow_and_update().clone();
                    if let FeedStatus::Failed(reason) = current {
                        self.redraw(&live);
                        bail!("kitchen feed failed: {reason}");
                    }
                }
                _ = ticker.tick() => self.redraw(&live),
                event = session_events.recv() => match event {
                    Ok(SessionEvent::Expired) | Ok(SessionEvent::LoggedOut) => {
                        live.disconnect();
                        println!("Session ended. Run `bistro login` to continue.");
                        break;
                    }
                    Ok(SessionEvent::Refreshed) | Ok(SessionEvent::LoggedIn) => {
                        info!("credential changed, resubscribing to the kitchen feed");
                        live.connect(self.session.access_token().as_deref()).await?;
                    }
                    Err(RecvError::Lagged(skipped)) => warn!(skipped, "missed session events"),
                    Err(RecvError::Closed) => break,
                },
                _ = tokio::signal::ctrl_c() => break,
            }
        }
        live.disconnect();
        Ok(live.feed().status())
    }

    /// Sends a status change and waits for the server to echo it back. An
    /// order that is not on the board cannot be echoed into a dropped lane, so
    /// for those the command is only confirmed as written.
    pub async fn advance_order(&self, order_id: RecordId, status: OrderStatus) -> Result<()> {
        let Some(token) = self.session.access_token() else {
            bail!("not logged in");
        };
        let mut live = LiveOrderFeed::new(self.settings.feed_url.clone(), OrderFeed::new());
        let mut orders = live.feed().subscribe();
        live.connect(Some(&token))
            .await
            .context("failed to open the kitchen feed")?;

        tokio::time::timeout(CONFIRM_TIMEOUT, orders.changed())
            .await
            .context("timed out waiting for the kitchen snapshot")??;

        let expected = classify(status);
        let current = orders.borrow_and_update().lane_of(&order_id);
        if current == expected && expected != Lane::Dropped {
            println!("Order {order_id} is already {status}.");
            return Ok(());
        }

        live.request_status_change(order_id.clone(), status)?;
        live.flush()
            .await
            .context("kitchen feed closed before the request was sent")?;

        if current == Lane::Dropped && expected == Lane::Dropped {
            live.disconnect();
            println!(
                "Requested {status} for order {order_id}. It is not on the kitchen board, so no confirmation will follow."
            );
            return Ok(());
        }

        let confirmed = tokio::time::timeout(
            CONFIRM_TIMEOUT,
            orders.wait_for(|state| state.lane_of(&order_id) == expected),
        )
        .await
        .map(|result| result.is_ok())
        .unwrap_or(false);
        live.disconnect();

        if confirmed {
            println!("Order {order_id} moved to {status}.");
            Ok(())
        } else {
            bail!(
                "no confirmation for order {order_id} within {:?}",
                CONFIRM_TIMEOUT
            )
        }
    }

    fn redraw(&self, live: &LiveOrderFeed) {
        let board = render_board(&live.feed().current(), &live.feed().status(), Utc::now());
        print!("\x1B[2J\x1B[H{board}");
    }
}
