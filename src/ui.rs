use crate::state::{AppState, Snapshot};
use std::{sync::Arc, time::{Duration, Instant}};
use tokio::time::sleep;

/// Run the live terminal dashboard.
/// - Tick interval: AGE_TUI_INTERVAL_MS (default 2000 ms).
pub async fn run_terminal_dashboard(app: Arc<AppState>) {
    let interval = std::env::var("AGE_TUI_INTERVAL_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(2000);

    let mut last_total: (u64, Instant) = (0, Instant::now());

    loop {
        let start = Instant::now();
        let snap = app.snapshot();

        // Ingress TPS from total request delta
        let now = Instant::now();
        let dt = now.duration_since(last_total.1).as_secs_f64().max(0.001);
        let ingress_tps = snap.total_requests.saturating_sub(last_total.0) as f64 / dt;
        last_total = (snap.total_requests, now);

        println!("{}", render_frame(&snap, ingress_tps, &app.predictor().describe()));

        // Pace the loop
        let elapsed = start.elapsed();
        if elapsed < Duration::from_millis(interval) {
            sleep(Duration::from_millis(interval) - elapsed).await;
        }
    }
}

const WIDTH: usize = 72;
const GAUGE: usize = 40;

pub fn render_frame(s: &Snapshot, ingress_tps: f64, model: &str) -> String {
    let reject_rate = if s.total_requests == 0 { 0.0 } else { (s.rejected as f64) * 100.0 / (s.total_requests as f64) };
    let lines = [
        format!("  Requests: {} | Admitted: {} | Rejected: {} ({:.1}%)",
                s.total_requests, s.admitted, s.rejected, reject_rate),
        format!("  Ingress: {:.1} TPS   Predictions: {} ok / {} failed",
                ingress_tps, s.predictions, s.prediction_errors),
        format!("  Bucket [{}] {:.2}/{} (+{}/s)",
                gauge(s.tokens, s.capacity, GAUGE), s.tokens, s.capacity, s.refill_rate),
        format!("  Model: {}", model),
    ];

    let mut out = String::new();
    out.push_str(&format!("╭{}╮\n", "─".repeat(WIDTH.saturating_sub(2))));
    for l in lines.iter() {
        out.push_str(&make_summary_line(WIDTH, l));
        out.push('\n');
    }
    out.push_str(&format!("╰{}╯", "─".repeat(WIDTH.saturating_sub(2))));
    out
}

// --- formatting helpers ---

fn gauge(value: f64, max: f64, width: usize) -> String {
    let frac = if max > 0.0 { (value / max).clamp(0.0, 1.0) } else { 0.0 };
    let filled = (frac * width as f64).round() as usize;
    format!("{}{}", "#".repeat(filled), ".".repeat(width - filled))
}

fn pad(s: &str, width: usize) -> String {
    let len = s.chars().count();
    if len >= width { s.to_string() } else { format!("{}{}", s, " ".repeat(width - len)) }
}

fn make_summary_line(total_width: usize, content: &str) -> String {
    let inner = total_width.saturating_sub(2);
    let clipped: String = content.chars().take(inner).collect();
    format!("│{}│", pad(&clipped, inner))
}
