use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::types::{PegView, PriceDirection, ShiftRequest, WallPrices};
use crate::errors::{PegError, Result};

#[derive(Debug, Default)]
struct Inner {
    reference_price: Option<f64>,
    wall: Option<WallPrices>,
    direction: Option<PriceDirection>,
    pending: Option<ShiftRequest>,
}

/// The one place the monitor and the strategy coordinate.
///
/// The shift flag is the presence of a pending request; it is set by
/// [`request_shift`](Self::request_shift) and cleared only by a successful
/// [`complete_shift`](Self::complete_shift).
#[derive(Debug, Default)]
pub struct PegState {
    inner: Mutex<Inner>,
}

fn ensure_ordered(wall: &WallPrices) -> Result<()> {
    if wall.is_ordered() {
        Ok(())
    } else {
        Err(PegError::Invariant(format!(
            "sell price {} must be above buy price {}",
            wall.sell, wall.buy
        )))
    }
}

impl PegState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the first wall computed from the first accepted price.
    pub async fn initialize(&self, reference_price: f64, wall: WallPrices) -> Result<()> {
        ensure_ordered(&wall)?;
        let mut inner = self.inner.lock().await;
        inner.reference_price = Some(reference_price);
        inner.wall = Some(wall);
        debug!(reference_price, sell = wall.sell, buy = wall.buy, "peg initialized");
        Ok(())
    }

    /// Raises a shift. Returns `Ok(false)` without touching anything when a
    /// shift is already in flight.
    pub async fn request_shift(&self, request: ShiftRequest) -> Result<bool> {
        ensure_ordered(&request.wall)?;
        let mut inner = self.inner.lock().await;
        if inner.wall.is_none() {
            return Err(PegError::NotInitialized);
        }
        if inner.pending.is_some() {
            warn!(
                reference_price = request.reference_price,
                "wall shift postponed, another shift is in flight"
            );
            return Ok(false);
        }
        inner.reference_price = Some(request.reference_price);
        inner.wall = Some(request.wall);
        inner.direction = Some(request.direction);
        inner.pending = Some(request);
        Ok(true)
    }

    /// The outstanding shift, if any. It stays outstanding until completed.
    pub async fn begin_shift(&self) -> Option<ShiftRequest> {
        self.inner.lock().await.pending
    }

    /// Clears the in-flight flag on success; on failure the request is kept
    /// so the next cycle retries it.
    pub async fn complete_shift(&self, ok: bool) {
        let mut inner = self.inner.lock().await;
        if ok {
            inner.pending = None;
        } else if let Some(pending) = inner.pending {
            warn!(direction = %pending.direction, "wall shift failed, will retry");
        }
    }

    pub async fn is_shift_in_flight(&self) -> bool {
        self.inner.lock().await.pending.is_some()
    }

    pub async fn wall(&self) -> Option<WallPrices> {
        self.inner.lock().await.wall
    }

    pub async fn reference_price(&self) -> Option<f64> {
        self.inner.lock().await.reference_price
    }

    pub async fn snapshot(&self) -> PegView {
        let inner = self.inner.lock().await;
        PegView {
            reference_price: inner.reference_price,
            wall: inner.wall,
            direction: inner.direction,
            shift_in_flight: inner.pending.is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wall(sell: f64, buy: f64) -> WallPrices {
        WallPrices { sell, buy }
    }

    fn request(reference_price: f64) -> ShiftRequest {
        ShiftRequest {
            wall: wall(1.0 / reference_price * 1.002, 1.0 / reference_price * 0.998),
            direction: PriceDirection::Down,
            reference_price,
        }
    }

    #[tokio::test]
    async fn shift_requires_initialization() {
        let state = PegState::new();
        assert!(matches!(
            state.request_shift(request(250.0)).await,
            Err(PegError::NotInitialized)
        ));
    }

    #[tokio::test]
    async fn second_request_is_deferred_until_completion() {
        let state = PegState::new();
        state.initialize(250.0, wall(0.004008, 0.003992)).await.unwrap();

        assert!(state.request_shift(request(255.0)).await.unwrap());
        assert!(!state.request_shift(request(260.0)).await.unwrap());
        assert_eq!(state.reference_price().await, Some(255.0));

        let pending = state.begin_shift().await.unwrap();
        assert_eq!(pending.reference_price, 255.0);

        state.complete_shift(false).await;
        assert!(state.is_shift_in_flight().await);
        assert_eq!(state.begin_shift().await, Some(pending));

        state.complete_shift(true).await;
        assert!(!state.is_shift_in_flight().await);
        assert!(state.request_shift(request(260.0)).await.unwrap());
    }

    #[tokio::test]
    async fn crossed_walls_are_rejected() {
        let state = PegState::new();
        assert!(matches!(
            state.initialize(250.0, wall(0.003, 0.004)).await,
            Err(PegError::Invariant(_))
        ));
        let view = state.snapshot().await;
        assert_eq!(view.wall, None);
        assert!(!view.shift_in_flight);
    }
}
