//! Timer-driven payout watcher daemon. Wires the ledger oracle, the durable
//! state directory, and an outbound sender into one detector loop; the loop
//! runs on a single thread so ticks never overlap.

use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use payout_watch::{
    FileConfirmationFeed, LedgerRpcClient, MessageSender, PayoutWatcher, PriceFeed, TickReport,
    TickerHttpClient, WatchConfig, WatchError, WatchStateStore,
};

/// Stand-in delivery collaborator: prints alerts to stdout. Deployments
/// wanting a real chat platform plug their own `MessageSender` in here; the
/// session handling is deliberately outside this crate.
#[derive(Debug, Default)]
struct ConsoleSender;

impl MessageSender for ConsoleSender {
    fn send(&self, destination_id: &str, text: &str) -> Result<String, WatchError> {
        println!("--- alert for {destination_id} ---\n{text}");
        Ok(format!("console-{destination_id}"))
    }

    fn edit(
        &self,
        destination_id: &str,
        message_ref: &str,
        text: &str,
    ) -> Result<String, WatchError> {
        println!("--- alert update for {destination_id} ({message_ref}) ---\n{text}");
        Ok(message_ref.to_string())
    }
}

fn unix_now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}

fn main() {
    let config = match WatchConfig::from_default_sources() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("[daemon] {err}");
            process::exit(2);
        }
    };

    let oracle = match LedgerRpcClient::from_config(&config.oracle) {
        Ok(oracle) => oracle,
        Err(err) => {
            eprintln!("[daemon] {err}");
            process::exit(2);
        }
    };

    let price: Option<Box<dyn PriceFeed>> = match TickerHttpClient::from_config(&config.price) {
        Ok(Some(client)) => Some(Box::new(client)),
        Ok(None) => None,
        Err(err) => {
            eprintln!("[daemon] {err}");
            process::exit(2);
        }
    };

    let store = WatchStateStore::open(&config.store.state_dir);
    let feed = config
        .store
        .confirmations_file
        .as_ref()
        .map(FileConfirmationFeed::open);

    let started_at = unix_now_ms();
    let mut watcher = match PayoutWatcher::new(
        &config,
        oracle,
        ConsoleSender::default(),
        price,
        store,
        feed,
        started_at,
    ) {
        Ok(watcher) => watcher,
        Err(err) => {
            eprintln!("[daemon] {err}");
            process::exit(2);
        }
    };

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        if let Err(err) = ctrlc::set_handler(move || {
            running.store(false, Ordering::SeqCst);
        }) {
            eprintln!("[daemon] install shutdown handler failed: {err}");
            process::exit(2);
        }
    }

    let poll_interval = Duration::from_secs(config.detector.poll_interval_seconds);
    eprintln!(
        "[daemon] watching reward pool every {}s, state dir {}",
        config.detector.poll_interval_seconds, config.store.state_dir
    );

    while running.load(Ordering::SeqCst) {
        let now = unix_now_ms();
        match watcher.tick(now) {
            TickReport::CycleClosed { payout } => {
                eprintln!(
                    "[daemon] payout detected: minted {:.0}, fees {:.0}, duration {}",
                    payout.minted, payout.fees, payout.duration_label
                );
            }
            TickReport::AlreadyProcessed { confirmation_id } => {
                eprintln!("[daemon] cycle {confirmation_id} already alerted, skipped");
            }
            TickReport::Warming => eprintln!("[daemon] first reading accepted as baseline"),
            TickReport::Tracking => {}
            TickReport::Rejected { .. }
            | TickReport::CooledDown { .. }
            | TickReport::Deferred { .. }
            | TickReport::OracleUnavailable { .. } => {}
        }

        // Sleep in one-second slices so a shutdown request lands promptly.
        let mut remaining = poll_interval;
        while running.load(Ordering::SeqCst) && remaining > Duration::ZERO {
            let slice = remaining.min(Duration::from_secs(1));
            std::thread::sleep(slice);
            remaining = remaining.saturating_sub(slice);
        }
    }
    eprintln!("[daemon] shutdown requested, exiting");
}
