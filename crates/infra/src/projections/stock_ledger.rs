//! The `stock_movements` ledger read model.
//!
//! One row per movement, keyed by movement id. Rows are written once; later
//! events only stamp approval and reversal fields onto them.

use serde::Serialize;
use serde_json::Value as JsonValue;

use fieldstock_core::BusinessId;
use fieldstock_events::EventEnvelope;
use fieldstock_inventory::{MovementId, Product, ProductEvent, ProductId, StockMovement};

use super::products::product_stream;
use super::{ProjectionError, StreamCursors, decode, replay_order};
use crate::read_model::BusinessStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    #[serde(flatten)]
    pub movement: StockMovement,
    /// Stream position of the event that wrote the row (posting order).
    pub posted_sequence: u64,
    /// Stream position of the event that applied the row to stock, if any.
    pub applied_sequence: Option<u64>,
}

#[derive(Debug)]
pub struct StockLedgerProjection<S>
where
    S: BusinessStore<MovementId, LedgerEntry>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> StockLedgerProjection<S>
where
    S: BusinessStore<MovementId, LedgerEntry>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn movement(&self, business_id: BusinessId, movement_id: &MovementId) -> Option<LedgerEntry> {
        self.store.get(business_id, movement_id)
    }

    /// Ledger rows of one product in posting order.
    pub fn movements_for_product(&self, business_id: BusinessId, product_id: ProductId) -> Vec<LedgerEntry> {
        let mut rows: Vec<_> = self
            .store
            .list(business_id)
            .into_iter()
            .filter(|r| r.movement.product_id == product_id)
            .collect();
        rows.sort_by_key(|r| r.posted_sequence);
        rows
    }

    /// Stock reproduced by folding the applied rows from zero, in the order
    /// they reached stock.
    pub fn replay_stock(&self, business_id: BusinessId, product_id: ProductId) -> i64 {
        let mut applied: Vec<_> = self
            .movements_for_product(business_id, product_id)
            .into_iter()
            .filter_map(|r| r.applied_sequence.map(|seq| (seq, r.movement.quantity)))
            .collect();
        applied.sort_by_key(|(seq, _)| *seq);
        applied.into_iter().fold(0, |stock, (_, quantity)| stock + quantity)
    }

    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != Product::AGGREGATE_TYPE {
            return Ok(());
        }

        self.cursors.advance(envelope, || {
            let event: ProductEvent = decode(envelope, product_stream)?;
            self.apply_event(envelope.business_id(), envelope.sequence_number(), event)
        })?;
        Ok(())
    }

    fn apply_event(&self, business_id: BusinessId, seq: u64, event: ProductEvent) -> Result<(), ProjectionError> {
        match event {
            ProductEvent::MovementPosted(e) => {
                let applied_sequence = e.effect.is_some().then_some(seq);
                self.store.upsert(
                    business_id,
                    e.movement.movement_id,
                    LedgerEntry {
                        movement: e.movement,
                        posted_sequence: seq,
                        applied_sequence,
                    },
                );
            }
            ProductEvent::MovementApproved(e) => {
                let mut row = self.row(business_id, e.movement_id)?;
                let m = &mut row.movement;
                m.is_approved = true;
                m.approved_by = Some(e.approved_by);
                m.unit_cost = e.unit_cost;
                m.total_cost = e.total_cost;
                m.quantity_before = e.quantity_before;
                m.quantity_after = e.quantity_after;
                m.cost_before = e.cost_before;
                m.cost_after = e.cost_after;
                row.applied_sequence = Some(seq);
                self.store.upsert(business_id, e.movement_id, row);
            }
            ProductEvent::MovementReversed(e) => {
                let mut original = self.row(business_id, e.original_movement_id)?;
                original.movement.is_reversed = true;
                original.movement.reversal_movement_id = Some(e.reversal.movement_id);
                self.store.upsert(business_id, e.original_movement_id, original);

                self.store.upsert(
                    business_id,
                    e.reversal.movement_id,
                    LedgerEntry {
                        movement: e.reversal,
                        posted_sequence: seq,
                        applied_sequence: Some(seq),
                    },
                );
            }
            _ => {}
        }
        Ok(())
    }

    fn row(&self, business_id: BusinessId, movement_id: MovementId) -> Result<LedgerEntry, ProjectionError> {
        self.store
            .get(business_id, &movement_id)
            .ok_or_else(|| ProjectionError::Unavailable(format!("movement {movement_id} missing from ledger")))
    }

    /// Rebuild one business's ledger from scratch.
    pub fn rebuild(
        &self,
        business_id: BusinessId,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), ProjectionError> {
        self.cursors.clear_business(business_id);
        self.store.clear_business(business_id);

        let mut envs: Vec<_> = envelopes
            .into_iter()
            .filter(|e| e.business_id() == business_id)
            .collect();
        replay_order(&mut envs);

        for env in &envs {
            self.apply_envelope(env)?;
        }
        Ok(())
    }
}
