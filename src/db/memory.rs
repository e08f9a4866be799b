//! In-memory `BatchStore` for tests

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use super::BatchStore;
use crate::services::batch_writer::{BatchDraft, NewBatch};
use crate::types::{BatchStatus, CollectionPoint, PendingOrder};

#[derive(Default)]
struct State {
    orders: Vec<PendingOrder>,
    order_batch: HashMap<Uuid, Uuid>,
    collection_points: Vec<CollectionPoint>,
    batches: Vec<NewBatch>,
    failing_orders: HashSet<Uuid>,
}

/// Store with an atomic batch counter and optional write failures
pub struct MemoryBatchStore {
    state: Mutex<State>,
    next_batch_number: AtomicI64,
}

impl Default for MemoryBatchStore {
    fn default() -> Self {
        Self {
            state: Mutex::new(State::default()),
            next_batch_number: AtomicI64::new(1),
        }
    }
}

impl MemoryBatchStore {
    pub fn new(orders: Vec<PendingOrder>, collection_points: Vec<CollectionPoint>) -> Self {
        let store = Self::default();
        {
            let mut state = store.state.lock();
            state.orders = orders;
            state.collection_points = collection_points;
        }
        store
    }

    /// Any batch containing `order_id` fails to write
    pub fn fail_writes_for(&self, order_id: Uuid) {
        self.state.lock().failing_orders.insert(order_id);
    }

    pub fn batches(&self) -> Vec<NewBatch> {
        self.state.lock().batches.clone()
    }

    pub fn is_batched(&self, order_id: Uuid) -> bool {
        self.state.lock().order_batch.contains_key(&order_id)
    }
}

#[async_trait]
impl BatchStore for MemoryBatchStore {
    async fn pending_orders(&self, delivery_date: NaiveDate) -> Result<Vec<PendingOrder>> {
        let state = self.state.lock();
        let mut orders: Vec<PendingOrder> = state
            .orders
            .iter()
            .filter(|o| o.delivery_date == delivery_date && !state.order_batch.contains_key(&o.id))
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.id);
        Ok(orders)
    }

    async fn collection_points(&self) -> Result<Vec<CollectionPoint>> {
        Ok(self.state.lock().collection_points.clone())
    }

    async fn create_batch(&self, draft: &BatchDraft) -> Result<NewBatch> {
        let batch_number = self.next_batch_number.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();

        let order_ids = draft.order_ids();
        if let Some(id) = order_ids.iter().find(|id| state.failing_orders.contains(*id)) {
            anyhow::bail!("simulated write failure for order {}", id);
        }
        if order_ids.iter().any(|id| state.order_batch.contains_key(id)) {
            anyhow::bail!("orders were already batched by another run");
        }

        let new_batch = draft.materialize(Uuid::new_v4(), batch_number, Utc::now());
        for id in order_ids {
            state.order_batch.insert(id, new_batch.batch.id);
        }
        state.batches.push(new_batch.clone());

        Ok(new_batch)
    }

    async fn claim_batch(&self, batch_id: Uuid, driver_id: Uuid) -> Result<bool> {
        let mut state = self.state.lock();
        let Some(entry) = state.batches.iter_mut().find(|b| b.batch.id == batch_id) else {
            return Ok(false);
        };

        if entry.batch.status != BatchStatus::Pending || entry.batch.driver_id.is_some() {
            return Ok(false);
        }

        entry.batch.driver_id = Some(driver_id);
        entry.batch.status = BatchStatus::Assigned;
        Ok(true)
    }
}
