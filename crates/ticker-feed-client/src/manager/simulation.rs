/*
[INPUT]:  Instruments gaining/losing their first/last subscriber in simulation mode
[OUTPUT]: Synthetic random-walk ticker updates on a fixed cadence
[POS]:    Manager layer - offline/demo data source
[UPDATE]: When changing synthetic price dynamics
*/

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use ticker_feed_adapter::TickerMessage;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::task::AbortOnDropHandle;
use tracing::debug;

/// One generator task per instrument, stopped by dropping its handle.
pub(crate) struct Simulator {
    period: Duration,
    max_step_bps: u32,
    ticks_tx: mpsc::UnboundedSender<TickerMessage>,
    feeds: HashMap<String, AbortOnDropHandle<()>>,
}

impl Simulator {
    pub(crate) fn new(
        period: Duration,
        max_step_bps: u32,
    ) -> (Self, mpsc::UnboundedReceiver<TickerMessage>) {
        let (ticks_tx, ticks_rx) = mpsc::unbounded_channel();
        let simulator = Self {
            period,
            max_step_bps,
            ticks_tx,
            feeds: HashMap::new(),
        };
        (simulator, ticks_rx)
    }

    /// Start generating for `instrument_id`, continuing from `seed` if cached.
    pub(crate) fn start(&mut self, instrument_id: &str, seed: Option<&TickerMessage>) {
        if self.feeds.contains_key(instrument_id) {
            return;
        }

        let walk = RandomWalk::new(
            instrument_id,
            seed,
            self.max_step_bps,
            StdRng::from_entropy(),
        );
        let period = self.period;
        let ticks_tx = self.ticks_tx.clone();
        let handle = tokio::spawn(run_feed(walk, period, ticks_tx));

        debug!(%instrument_id, period_ms = period.as_millis() as u64, "simulated feed started");
        self.feeds
            .insert(instrument_id.to_string(), AbortOnDropHandle::new(handle));
    }

    pub(crate) fn stop(&mut self, instrument_id: &str) {
        if self.feeds.remove(instrument_id).is_some() {
            debug!(%instrument_id, "simulated feed stopped");
        }
    }

    pub(crate) fn stop_all(&mut self) {
        self.feeds.clear();
    }

    #[cfg(test)]
    pub(crate) fn is_running(&self, instrument_id: &str) -> bool {
        self.feeds.contains_key(instrument_id)
    }
}

async fn run_feed(
    mut walk: RandomWalk,
    period: Duration,
    ticks_tx: mpsc::UnboundedSender<TickerMessage>,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if ticks_tx.send(walk.step()).is_err() {
            break;
        }
    }
}

/// Bounded-percentage random walk around a fixed close price
pub(crate) struct RandomWalk {
    instrument_id: String,
    price: Decimal,
    close_price: Decimal,
    volume: Decimal,
    max_step_bps: i64,
    rng: StdRng,
}

impl RandomWalk {
    pub(crate) fn new(
        instrument_id: &str,
        seed: Option<&TickerMessage>,
        max_step_bps: u32,
        mut rng: StdRng,
    ) -> Self {
        let (price, close_price, volume) = match seed {
            Some(seed) => (
                seed.price,
                seed.close_price,
                seed.volume.unwrap_or(Decimal::ZERO),
            ),
            None => {
                let price = Decimal::new(rng.gen_range(5_000..=50_000), 2);
                (price, price, Decimal::ZERO)
            }
        };

        Self {
            instrument_id: instrument_id.to_string(),
            price,
            close_price,
            volume,
            max_step_bps: i64::from(max_step_bps),
            rng,
        }
    }

    pub(crate) fn step(&mut self) -> TickerMessage {
        let step_bps = self.rng.gen_range(-self.max_step_bps..=self.max_step_bps);
        let factor = Decimal::ONE + Decimal::new(step_bps, 4);
        self.price = (self.price * factor).round_dp(2).max(Decimal::new(1, 2));
        self.volume += Decimal::from(self.rng.gen_range(100i64..=5_000));

        let mut message = TickerMessage {
            instrument_id: Some(self.instrument_id.clone()),
            symbol: Some(self.instrument_id.clone()),
            price: self.price,
            close_price: self.close_price,
            change_price: None,
            change_percent: None,
            volume: Some(self.volume),
            timestamp: Some(Utc::now().timestamp_millis()),
        };
        message.change_price = Some(message.effective_change_price());
        message.change_percent = Some(message.effective_change_percent().round_dp(4));
        message
    }
}
