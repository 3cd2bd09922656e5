//! Tile and history fetching over HTTP.
//!
//! [`ChunkService`] knows the endpoint layout and decodes responses into
//! engine rasters. [`FetchPool`] bounds how many fetches run at once:
//! requests are spawned in nearest-first order and the semaphore grants
//! permits in FIFO order, so tiles close to the viewport center arrive
//! first. In-flight fetches are never cancelled when the viewport moves
//! on; late results still populate the cache.

use std::{collections::HashSet, sync::Arc};

use chrono::NaiveDate;
use tokio::sync::{Semaphore, mpsc};

use pixelfield_engine::{CanvasDescriptor, CanvasId, Chunk, ChunkKey, Superchunk, SuperchunkKey};

/// Concurrent tile fetches allowed per session.
pub const DEFAULT_FETCH_CONCURRENCY: usize = 16;

/// Identity of one fetch, also used to suppress duplicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TileRequest {
    Chunk { key: ChunkKey, eraser: bool },
    Superchunk { key: SuperchunkKey },
    HistoryChunk { date: NaiveDate, hour: u8, key: ChunkKey },
}

/// A decoded raster on its way to the store.
#[derive(Debug)]
pub enum TilePayload {
    Chunk(Chunk),
    Superchunk(Superchunk),
    HistoryChunk(Chunk),
}

/// Outcome of one fetch, delivered to the controller's event loop.
#[derive(Debug)]
pub struct TileResult {
    pub request: TileRequest,
    pub payload: anyhow::Result<TilePayload>,
}

/// Endpoint layout and raster decoding for one authority host.
#[derive(Debug, Clone)]
pub struct ChunkService {
    http: reqwest::Client,
    base_url: String,
}

impl ChunkService {
    pub fn new(base_url: impl Into<String>) -> Self {
        ChunkService {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn chunk_url(&self, canvas: CanvasId, key: ChunkKey, eraser: bool) -> String {
        let suffix = if eraser { "?noBg" } else { "" };
        format!("{}/chunk/{}/{}/{}{}", self.base_url, canvas, key.0, key.1, suffix)
    }

    pub fn superchunk_url(&self, canvas: CanvasId, key: SuperchunkKey) -> String {
        format!("{}/superchunk/{}/{}/{}/{}", self.base_url, canvas, key.0, key.1, key.2)
    }

    pub fn history_chunk_url(&self, date: NaiveDate, hour: u8, canvas: CanvasId, key: ChunkKey) -> String {
        format!("{}/history/chunk/{}/{}/{}/{}/{}", self.base_url, date.format("%Y%m%d"), hour, canvas, key.0, key.1)
    }

    pub fn history_dates_url(&self, canvas: CanvasId) -> String {
        format!("{}/history/dates/{}", self.base_url, canvas)
    }

    pub fn history_hours_url(&self, date: NaiveDate, canvas: CanvasId) -> String {
        format!("{}/history/hours/{}/{}", self.base_url, date.format("%Y%m%d"), canvas)
    }

    async fn get_bytes(&self, url: &str) -> anyhow::Result<Vec<u8>> {
        let response = self.http.get(url).send().await?.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }

    pub async fn fetch_chunk(&self, canvas: &CanvasDescriptor, key: ChunkKey, eraser: bool) -> anyhow::Result<Chunk> {
        let bytes = self.get_bytes(&self.chunk_url(canvas.id, key, eraser)).await?;
        Ok(Chunk::decode(&bytes, &canvas.palette)?)
    }

    pub async fn fetch_superchunk(&self, canvas: &CanvasDescriptor, key: SuperchunkKey) -> anyhow::Result<Superchunk> {
        let bytes = self.get_bytes(&self.superchunk_url(canvas.id, key)).await?;
        Ok(Superchunk::decode(&bytes)?)
    }

    pub async fn fetch_history_chunk(&self, canvas: &CanvasDescriptor, date: NaiveDate, hour: u8, key: ChunkKey) -> anyhow::Result<Chunk> {
        let bytes = self.get_bytes(&self.history_chunk_url(date, hour, canvas.id, key)).await?;
        Ok(Chunk::decode(&bytes, &canvas.palette)?)
    }

    /// Days for which the authority keeps hourly snapshots.
    pub async fn fetch_history_dates(&self, canvas: CanvasId) -> anyhow::Result<Vec<NaiveDate>> {
        let dates: Vec<String> = self.http.get(self.history_dates_url(canvas)).send().await?.error_for_status()?.json().await?;
        let mut parsed = Vec::with_capacity(dates.len());
        for date in dates {
            parsed.push(NaiveDate::parse_from_str(&date, "%Y%m%d").or_else(|_| NaiveDate::parse_from_str(&date, "%Y-%m-%d"))?);
        }
        Ok(parsed)
    }

    pub async fn fetch_history_hours(&self, date: NaiveDate, canvas: CanvasId) -> anyhow::Result<Vec<u8>> {
        Ok(self.http.get(self.history_hours_url(date, canvas)).send().await?.error_for_status()?.json().await?)
    }
}

/// Bounded fetch pool feeding decoded tiles back to the controller.
pub struct FetchPool {
    service: Arc<ChunkService>,
    semaphore: Arc<Semaphore>,
    result_tx: mpsc::Sender<TileResult>,
    in_flight: HashSet<TileRequest>,
}

impl FetchPool {
    /// Returns the pool plus the receiver the controller drains.
    pub fn new(service: ChunkService, concurrency: usize) -> (Self, mpsc::Receiver<TileResult>) {
        let (result_tx, result_rx) = mpsc::channel(256);
        (
            FetchPool {
                service: Arc::new(service),
                semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
                result_tx,
                in_flight: HashSet::new(),
            },
            result_rx,
        )
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_in_flight(&self, request: &TileRequest) -> bool {
        self.in_flight.contains(request)
    }

    /// Must be called for every drained [`TileResult`] so the request can
    /// be issued again later (e.g. a failed tile retried on the next
    /// viewport move).
    pub fn complete(&mut self, request: &TileRequest) {
        self.in_flight.remove(request);
    }

    /// Queues one fetch unless the same request is already running.
    /// Spawn order is the priority order: callers pass visible tiles
    /// nearest-first and permits are granted FIFO.
    pub fn spawn(&mut self, canvas: &Arc<CanvasDescriptor>, request: TileRequest) {
        if !self.in_flight.insert(request) {
            return;
        }
        let service = self.service.clone();
        let semaphore = self.semaphore.clone();
        let result_tx = self.result_tx.clone();
        let canvas = canvas.clone();

        tokio::spawn(async move {
            // Closed semaphore means shutdown; drop the request.
            let Ok(_permit) = semaphore.acquire().await else {
                return;
            };
            let payload = match request {
                TileRequest::Chunk { key, eraser } => service.fetch_chunk(&canvas, key, eraser).await.map(TilePayload::Chunk),
                TileRequest::Superchunk { key } => service.fetch_superchunk(&canvas, key).await.map(TilePayload::Superchunk),
                TileRequest::HistoryChunk { date, hour, key } => service.fetch_history_chunk(&canvas, date, hour, key).await.map(TilePayload::HistoryChunk),
            };
            if let Err(err) = &payload {
                log::warn!("tile fetch failed for {request:?}: {err}");
            }
            let _ = result_tx.send(TileResult { request, payload }).await;
        });
    }
}
