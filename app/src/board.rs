use bistro_core::feed::{FeedState, FeedStatus};
use bistro_core::order::Order;
use chrono::{DateTime, Utc};
use std::fmt::Write;

/// Renders the two kitchen columns as plain text. A failed feed replaces the
/// columns with a blocking error.
pub fn render_board(state: &FeedState, status: &FeedStatus, now: DateTime<Utc>) -> String {
    let mut out = String::new();
    match status {
        FeedStatus::Failed(reason) => {
            let _ = writeln!(out, "!! Kitchen feed unavailable: {reason}");
            return out;
        }
        FeedStatus::Connecting => {
            let _ = writeln!(out, "Connecting to the kitchen feed...");
            return out;
        }
        FeedStatus::Idle | FeedStatus::Closed => {
            let _ = writeln!(out, "Kitchen feed is not connected.");
            return out;
        }
        FeedStatus::Live => {}
    }
    render_column(&mut out, "OPEN", state.open_orders(), now);
    out.push('\n');
    render_column(&mut out, "PREPARING", state.preparing_orders(), now);
    out
}

fn render_column(out: &mut String, title: &str, orders: &[Order], now: DateTime<Utc>) {
    let _ = writeln!(out, "== {title} ({}) ==", orders.len());
    if orders.is_empty() {
        let _ = writeln!(out, "   (none)");
        return;
    }
    for order in orders {
        let table = order
            .table
            .as_ref()
            .map(|table| table.label())
            .unwrap_or_else(|| "Takeaway".to_string());
        let _ = writeln!(
            out,
            "#{:<8} {:<12} {:>3} min",
            order.id,
            table,
            order.elapsed_minutes(now)
        );
        for item in &order.items {
            let _ = writeln!(out, "   {}x {}", item.quantity, item.name);
            if let Some(notes) = &item.notes {
                let _ = writeln!(out, "      note: {notes}");
            }
        }
        if let Some(notes) = &order.notes {
            let _ = writeln!(out, "   note: {notes}");
        }
    }
}
