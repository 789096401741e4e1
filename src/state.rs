use crate::config::Config;
use crate::error::ConfigError;
use crate::model::{load_predictor, Predictor};
use crate::token_bucket::TokenBucket;
use parking_lot::{Mutex, RwLock};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tracing::{info, warn};

/// Process-wide state shared by every request handler.
pub struct AppState {
    pub cfg: tokio::sync::RwLock<Config>,
    pub limiter: Mutex<TokenBucket>,
    predictor: RwLock<Arc<dyn Predictor>>,

    // Counters for /status and the live dashboard
    pub total_requests: AtomicU64, // every inbound request
    pub admitted: AtomicU64,
    pub rejected: AtomicU64,
    pub predictions: AtomicU64, // successful predictions
    pub prediction_errors: AtomicU64,
}

/// Point-in-time view of the limiter and counters.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub capacity: f64,
    pub refill_rate: f64,
    pub tokens: f64,
    pub total_requests: u64,
    pub admitted: u64,
    pub rejected: u64,
    pub predictions: u64,
    pub prediction_errors: u64,
}

impl AppState {
    pub fn new(cfg: Config, predictor: Arc<dyn Predictor>) -> Result<Self, ConfigError> {
        let bucket = cfg.rate_limit.build_bucket()?;
        Ok(Self {
            cfg: tokio::sync::RwLock::new(cfg),
            limiter: Mutex::new(bucket),
            predictor: RwLock::new(predictor),
            total_requests: AtomicU64::new(0),
            admitted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            predictions: AtomicU64::new(0),
            prediction_errors: AtomicU64::new(0),
        })
    }

    /// The admission decision: refill and take one token under the lock.
    pub fn try_admit(&self) -> bool {
        let ok = self.limiter.lock().take_token();
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if ok {
            self.admitted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.rejected.fetch_add(1, Ordering::Relaxed);
        }
        ok
    }

    pub fn predictor(&self) -> Arc<dyn Predictor> { self.predictor.read().clone() }

    pub fn set_predictor(&self, p: Arc<dyn Predictor>) { *self.predictor.write() = p; }

    pub fn snapshot(&self) -> Snapshot {
        let (capacity, refill_rate, tokens) = {
            let mut b = self.limiter.lock();
            (b.capacity(), b.refill_per_sec(), b.available())
        };
        Snapshot {
            capacity,
            refill_rate,
            tokens,
            total_requests: self.total_requests.load(Ordering::Relaxed),
            admitted: self.admitted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            predictions: self.predictions.load(Ordering::Relaxed),
            prediction_errors: self.prediction_errors.load(Ordering::Relaxed),
        }
    }

    /// Swap in a reloaded config. The bucket is rebuilt (full) only when its
    /// parameters changed; invalid parameters keep the current bucket. The
    /// model is always reloaded from the (possibly new) path.
    pub async fn apply_config(&self, new_cfg: Config) -> Result<(), ConfigError> {
        let mut result = Ok(());
        {
            let mut cfg_guard = self.cfg.write().await;
            let mut applied = new_cfg.clone();
            if cfg_guard.rate_limit != new_cfg.rate_limit {
                match new_cfg.rate_limit.build_bucket() {
                    Ok(bucket) => {
                        *self.limiter.lock() = bucket;
                        info!(
                            "rate limiter rebuilt: capacity={} refill_rate={}",
                            new_cfg.rate_limit.capacity, new_cfg.rate_limit.refill_rate
                        );
                    }
                    Err(e) => {
                        warn!("keeping previous rate limiter: {}", e);
                        applied.rate_limit = cfg_guard.rate_limit.clone();
                        result = Err(e);
                    }
                }
            }
            *cfg_guard = applied;
        }
        let model_path = new_cfg.model.path;
        match tokio::task::spawn_blocking(move || load_predictor(&model_path)).await {
            Ok(p) => self.set_predictor(p),
            Err(e) => warn!("model reload task failed, keeping current model: {}", e),
        }
        result
    }
}
