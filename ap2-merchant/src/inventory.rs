//! Reserved-stock accounting.
//!
//! Available-to-sell counts live in a concurrent map keyed by product id.
//! Every mutation of one product's count happens under that entry's lock, so
//! two concurrent reservations against the same product serialize and at most
//! one wins the last unit. Reads are lock-free snapshots.
//!
//! A reservation holds stock for a bounded duration. Stock returns to the
//! pool at the earliest of explicit consumption by fulfillment or a
//! background timer firing at the hold deadline — reservations are the one
//! place the protocol sweeps eagerly instead of checking expiry lazily.

use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use ap2::mandate::CartItem;
use ap2::timestamp::UnixTimestamp;

use crate::catalog::ProductCatalog;
use crate::error::MerchantError;

/// Lifecycle of a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationStatus {
    /// Stock is held for the cart.
    Held,
    /// Fulfillment consumed the hold.
    Consumed,
    /// The hold lapsed or was released; stock returned to the pool.
    Released,
}

/// One held quantity of one product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservedItem {
    /// The held product.
    pub item_id: String,
    /// Units held.
    pub quantity: u32,
}

/// A bounded-duration hold of cart quantities against the stock pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    /// Unique reservation identifier.
    pub reservation_id: Uuid,
    /// The cart this hold backs; one hold per cart.
    pub cart_mandate_id: Uuid,
    /// Held products and quantities.
    pub items: Vec<ReservedItem>,
    /// Current state of the hold.
    pub status: ReservationStatus,
    /// When the hold lapses.
    pub expires_at: UnixTimestamp,
}

struct InventoryInner {
    stock: DashMap<String, u32>,
    reservations: DashMap<Uuid, Reservation>,
    shutdown: CancellationToken,
}

/// Available-to-sell stock with per-product serialized mutation.
///
/// Cheap to clone; clones share the same pool.
#[derive(Clone)]
pub struct Inventory {
    inner: Arc<InventoryInner>,
}

impl std::fmt::Debug for Inventory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inventory")
            .field("products", &self.inner.stock.len())
            .field("reservations", &self.inner.reservations.len())
            .finish()
    }
}

impl Inventory {
    /// Seeds the stock pool from a catalog's listed counts.
    #[must_use]
    pub fn from_catalog(catalog: &dyn ProductCatalog) -> Self {
        let stock = DashMap::new();
        for product in catalog.all() {
            stock.insert(product.id, product.stock);
        }
        Self {
            inner: Arc::new(InventoryInner {
                stock,
                reservations: DashMap::new(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Signals background hold timers to stop (service shutdown).
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    /// Snapshot of one product's available-to-sell count.
    #[must_use]
    pub fn available(&self, item_id: &str) -> Option<u32> {
        self.inner.stock.get(item_id).map(|entry| *entry)
    }

    /// The reservation backing a cart, if any.
    #[must_use]
    pub fn reservation(&self, cart_mandate_id: &Uuid) -> Option<Reservation> {
        self.inner
            .reservations
            .get(cart_mandate_id)
            .map(|entry| entry.clone())
    }

    /// Holds the cart's quantities against the pool for `hold_secs`.
    ///
    /// Idempotent per cart: a second call while the first hold is live
    /// returns the existing reservation. All-or-nothing across items: if any
    /// line cannot be covered, already-decremented lines are restored and
    /// the pool is left exactly as found.
    ///
    /// # Errors
    ///
    /// [`MerchantError::ProductNotFound`] or
    /// [`MerchantError::InsufficientStock`] for the first failing line; the
    /// pool is unchanged and no reservation record is created.
    pub async fn reserve(
        &self,
        cart_mandate_id: Uuid,
        items: &[CartItem],
        hold_secs: u64,
    ) -> Result<Reservation, MerchantError> {
        if let Some(existing) = self.reservation(&cart_mandate_id) {
            if existing.status == ReservationStatus::Held {
                return Ok(existing);
            }
        }

        let mut taken: Vec<ReservedItem> = Vec::with_capacity(items.len());
        for item in items {
            match self.try_take(&item.item_id, item.quantity) {
                Ok(()) => taken.push(ReservedItem {
                    item_id: item.item_id.clone(),
                    quantity: item.quantity,
                }),
                Err(err) => {
                    // Roll back lines already taken; the pool must be left
                    // exactly as found on failure.
                    for line in &taken {
                        self.restore(&line.item_id, line.quantity);
                    }
                    return Err(err);
                }
            }
        }

        let reservation = Reservation {
            reservation_id: Uuid::new_v4(),
            cart_mandate_id,
            items: taken,
            status: ReservationStatus::Held,
            expires_at: UnixTimestamp::now() + hold_secs,
        };
        self.inner
            .reservations
            .insert(cart_mandate_id, reservation.clone());
        self.spawn_hold_timer(cart_mandate_id, hold_secs);
        tracing::debug!(%cart_mandate_id, hold_secs, "inventory held");
        Ok(reservation)
    }

    /// Consumes a hold at fulfillment time.
    ///
    /// Idempotent: consuming an already-consumed hold is a no-op.
    ///
    /// # Errors
    ///
    /// [`MerchantError::ReservationNotFound`] if no hold exists,
    /// [`MerchantError::ReservationExpired`] if the hold lapsed (the stock is
    /// returned to the pool as a side effect, exactly as the timer would).
    pub fn consume(&self, cart_mandate_id: &Uuid) -> Result<(), MerchantError> {
        let mut entry = self
            .inner
            .reservations
            .get_mut(cart_mandate_id)
            .ok_or(MerchantError::ReservationNotFound)?;
        match entry.status {
            ReservationStatus::Consumed => Ok(()),
            ReservationStatus::Released => Err(MerchantError::ReservationExpired),
            ReservationStatus::Held => {
                if entry.expires_at.is_expired() {
                    let items = entry.items.clone();
                    entry.status = ReservationStatus::Released;
                    drop(entry);
                    for line in &items {
                        self.restore(&line.item_id, line.quantity);
                    }
                    return Err(MerchantError::ReservationExpired);
                }
                entry.status = ReservationStatus::Consumed;
                Ok(())
            }
        }
    }

    /// Releases a live hold back to the pool if it is past its deadline.
    ///
    /// Called by the background timer; harmless if the hold was consumed or
    /// already released.
    pub fn release_if_expired(&self, cart_mandate_id: &Uuid) {
        let Some(mut entry) = self.inner.reservations.get_mut(cart_mandate_id) else {
            return;
        };
        if entry.status != ReservationStatus::Held || !entry.expires_at.is_expired() {
            return;
        }
        let items = entry.items.clone();
        entry.status = ReservationStatus::Released;
        drop(entry);
        for line in &items {
            self.restore(&line.item_id, line.quantity);
        }
        tracing::debug!(%cart_mandate_id, "reservation lapsed, stock released");
    }

    /// Check-and-decrement one product's count under its entry lock.
    fn try_take(&self, item_id: &str, quantity: u32) -> Result<(), MerchantError> {
        let mut entry = self
            .inner
            .stock
            .get_mut(item_id)
            .ok_or_else(|| MerchantError::ProductNotFound(item_id.to_owned()))?;
        if *entry < quantity {
            return Err(MerchantError::InsufficientStock {
                item_id: item_id.to_owned(),
                available: *entry,
                requested: quantity,
            });
        }
        *entry -= quantity;
        Ok(())
    }

    fn restore(&self, item_id: &str, quantity: u32) {
        if let Some(mut entry) = self.inner.stock.get_mut(item_id) {
            *entry = entry.saturating_add(quantity);
        }
    }

    fn spawn_hold_timer(&self, cart_mandate_id: Uuid, hold_secs: u64) {
        let inventory = self.clone();
        let shutdown = self.inner.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = shutdown.cancelled() => {}
                () = tokio::time::sleep(std::time::Duration::from_secs(hold_secs)) => {
                    inventory.release_if_expired(&cart_mandate_id);
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::demo_catalog;

    fn item(id: &str, quantity: u32) -> CartItem {
        CartItem {
            item_id: id.into(),
            quantity,
            unit_price: "1.00".parse().unwrap(),
        }
    }

    #[tokio::test]
    async fn test_reserve_decrements_stock() {
        let inventory = Inventory::from_catalog(&demo_catalog());
        let reservation = inventory
            .reserve(Uuid::new_v4(), &[item("laptop_002", 3)], 60)
            .await
            .unwrap();
        assert_eq!(reservation.status, ReservationStatus::Held);
        assert_eq!(inventory.available("laptop_002"), Some(22));
    }

    #[tokio::test]
    async fn test_over_reserve_fails_and_leaves_stock_unchanged() {
        let inventory = Inventory::from_catalog(&demo_catalog());
        let err = inventory
            .reserve(Uuid::new_v4(), &[item("tablet_001", 21)], 60)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MerchantError::InsufficientStock {
                available: 20,
                requested: 21,
                ..
            }
        ));
        assert_eq!(inventory.available("tablet_001"), Some(20));
        assert_eq!(inventory.inner.reservations.len(), 0);
    }

    #[tokio::test]
    async fn test_partial_failure_rolls_back_earlier_lines() {
        let inventory = Inventory::from_catalog(&demo_catalog());
        let err = inventory
            .reserve(
                Uuid::new_v4(),
                &[item("laptop_002", 5), item("ghost_001", 1)],
                60,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MerchantError::ProductNotFound(_)));
        assert_eq!(inventory.available("laptop_002"), Some(25));
    }

    #[tokio::test]
    async fn test_reserve_is_idempotent_per_cart() {
        let inventory = Inventory::from_catalog(&demo_catalog());
        let cart_id = Uuid::new_v4();
        let first = inventory
            .reserve(cart_id, &[item("phone_001", 2)], 60)
            .await
            .unwrap();
        let second = inventory
            .reserve(cart_id, &[item("phone_001", 2)], 60)
            .await
            .unwrap();
        assert_eq!(first.reservation_id, second.reservation_id);
        assert_eq!(inventory.available("phone_001"), Some(28));
    }

    #[tokio::test]
    async fn test_last_unit_has_exactly_one_winner() {
        let inventory = Inventory::from_catalog(&demo_catalog());
        // Drain tablet stock to a single unit.
        inventory
            .reserve(Uuid::new_v4(), &[item("tablet_001", 19)], 60)
            .await
            .unwrap();

        let a = inventory.clone();
        let b = inventory.clone();
        let (left, right) = tokio::join!(
            tokio::spawn(async move { a.reserve(Uuid::new_v4(), &[item("tablet_001", 1)], 60).await }),
            tokio::spawn(async move { b.reserve(Uuid::new_v4(), &[item("tablet_001", 1)], 60).await }),
        );
        let outcomes = [left.unwrap(), right.unwrap()];
        let winners = outcomes.iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1);
        assert_eq!(inventory.available("tablet_001"), Some(0));
    }

    #[tokio::test]
    async fn test_consume_marks_hold() {
        let inventory = Inventory::from_catalog(&demo_catalog());
        let cart_id = Uuid::new_v4();
        inventory
            .reserve(cart_id, &[item("laptop_001", 1)], 60)
            .await
            .unwrap();
        inventory.consume(&cart_id).unwrap();
        assert_eq!(
            inventory.reservation(&cart_id).unwrap().status,
            ReservationStatus::Consumed
        );
        // Consumed stock stays out of the pool.
        assert_eq!(inventory.available("laptop_001"), Some(14));
        // Idempotent no-op.
        inventory.consume(&cart_id).unwrap();
    }

    #[tokio::test]
    async fn test_consume_unknown_hold() {
        let inventory = Inventory::from_catalog(&demo_catalog());
        assert!(matches!(
            inventory.consume(&Uuid::new_v4()),
            Err(MerchantError::ReservationNotFound)
        ));
    }

    #[tokio::test]
    async fn test_lapsed_hold_returns_stock_on_consume() {
        let inventory = Inventory::from_catalog(&demo_catalog());
        let cart_id = Uuid::new_v4();
        inventory
            .reserve(cart_id, &[item("laptop_001", 2)], 600)
            .await
            .unwrap();
        // Force the hold deadline into the past.
        inventory
            .inner
            .reservations
            .get_mut(&cart_id)
            .unwrap()
            .expires_at = UnixTimestamp::from_secs(0);
        let err = inventory.consume(&cart_id).unwrap_err();
        assert!(matches!(err, MerchantError::ReservationExpired));
        assert_eq!(inventory.available("laptop_001"), Some(15));
    }

    #[tokio::test]
    async fn test_release_if_expired_ignores_live_holds() {
        let inventory = Inventory::from_catalog(&demo_catalog());
        let cart_id = Uuid::new_v4();
        inventory
            .reserve(cart_id, &[item("laptop_001", 2)], 600)
            .await
            .unwrap();
        inventory.release_if_expired(&cart_id);
        assert_eq!(inventory.available("laptop_001"), Some(13));
        assert_eq!(
            inventory.reservation(&cart_id).unwrap().status,
            ReservationStatus::Held
        );
    }
}
