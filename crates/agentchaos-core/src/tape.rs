//! Tape store: recording of request/response/chaos snapshots and their
//! deterministic playback.
//!
//! A tape is a single JSON document. The recorder buffers entries in
//! memory and flushes once at graceful shutdown; the player loads and
//! indexes everything up front and serves entries FIFO per fingerprint.

use crate::fingerprint::RequestFingerprint;
use crate::flow::{Flow, FlowResponse, Headers, TrafficSubtype, TrafficType};
use crate::tape_crypto::{self, TapeKey};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Current tape format version.
pub const TAPE_VERSION: u32 = 1;

/// Tape I/O or format failure. Fatal when the recorder cannot flush in
/// RECORD mode; otherwise non-fatal.
#[derive(Debug, Error)]
pub enum TapeError {
    /// Filesystem failure.
    #[error("tape I/O failed for {path}: {source}")]
    Io {
        /// Offending path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
    /// The tape document did not parse.
    #[error("tape is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    /// Encryption or decryption failure.
    #[error("tape crypto error: {0}")]
    Crypto(String),
}

/// A recorded response, body hex-encoded for safe JSON embedding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResponseSnapshot {
    /// HTTP status code
    pub status: u16,
    /// Reason phrase
    pub reason: String,
    /// Response headers
    pub headers: Headers,
    /// Hex-encoded body bytes
    #[serde(rename = "body_bytes")]
    pub body_hex: String,
    /// Content encoding of the recorded body, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_encoding: Option<String>,
}

impl ResponseSnapshot {
    /// Snapshot a flow response.
    pub fn from_response(response: &FlowResponse) -> Self {
        Self {
            status: response.status,
            reason: response.reason.clone(),
            headers: response.headers.clone(),
            body_hex: hex::encode(&response.body),
            content_encoding: response.headers.get("content-encoding").cloned(),
        }
    }

    /// Rebuild the flow response, byte for byte.
    pub fn to_response(&self) -> FlowResponse {
        FlowResponse {
            status: self.status,
            reason: self.reason.clone(),
            headers: self.headers.clone(),
            body: hex::decode(&self.body_hex).unwrap_or_default(),
        }
    }
}

/// Chaos metadata captured alongside the response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChaosContext {
    /// Strategies applied to the recorded flow, in order
    pub applied_strategies: Vec<String>,
    /// Whether any chaos was applied
    pub chaos_applied: bool,
    /// Traffic type at record time
    pub traffic_type: TrafficType,
    /// Traffic subtype at record time
    pub traffic_subtype: TrafficSubtype,
    /// Agent role at record time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_role: Option<String>,
}

impl ChaosContext {
    /// Capture the chaos context from a flow.
    pub fn from_flow(flow: &Flow) -> Self {
        Self {
            applied_strategies: flow.metadata.applied_strategies.clone(),
            chaos_applied: flow.metadata.chaos_applied,
            traffic_type: flow.traffic_type(),
            traffic_subtype: flow.metadata.traffic_subtype,
            agent_role: flow.metadata.agent_role.clone(),
        }
    }

    /// Restore the recorded classification and chaos metadata onto a flow
    /// being served from tape.
    pub fn restore(&self, flow: &mut Flow) {
        flow.metadata.traffic_type = Some(self.traffic_type);
        flow.metadata.traffic_subtype = self.traffic_subtype;
        flow.metadata.agent_role = self.agent_role.clone();
        flow.metadata.applied_strategies = self.applied_strategies.clone();
        flow.metadata.chaos_applied = self.chaos_applied;
    }
}

/// One recorded exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TapeEntry {
    /// Request fingerprint
    pub fingerprint: RequestFingerprint,
    /// Recorded response
    pub response_snapshot: ResponseSnapshot,
    /// Recorded chaos metadata
    pub chaos_context: ChaosContext,
    /// Record time
    pub timestamp: DateTime<Utc>,
    /// Append order, strictly increasing within one tape
    pub sequence: u64,
}

/// Tape file metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TapeMetadata {
    /// When the recording started
    pub created_at: DateTime<Utc>,
    /// Version of the recorder that wrote the tape
    pub recorder_version: String,
}

/// A complete tape document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tape {
    /// Tape format version
    pub version: u32,
    /// Tape metadata
    pub metadata: TapeMetadata,
    /// Entries in record order
    pub entries: Vec<TapeEntry>,
}

impl Tape {
    fn new() -> Self {
        Self {
            version: TAPE_VERSION,
            metadata: TapeMetadata {
                created_at: Utc::now(),
                recorder_version: env!("CARGO_PKG_VERSION").to_string(),
            },
            entries: Vec::new(),
        }
    }

    /// Read a tape file, decrypting when the magic prefix is present.
    pub fn read_from(path: &Path, key: Option<&TapeKey>) -> Result<Self, TapeError> {
        let data = std::fs::read(path)
            .map_err(|source| TapeError::Io { path: path.to_path_buf(), source })?;
        let plaintext = if tape_crypto::is_encrypted(&data) {
            let key = key.ok_or_else(|| {
                TapeError::Crypto("tape is encrypted but no CHAOS_TAPE_KEY is set".to_string())
            })?;
            tape_crypto::open(key, &data)?
        } else {
            data
        };
        Ok(serde_json::from_slice(&plaintext)?)
    }

    /// Write the tape to disk, encrypting when a key is configured.
    pub fn write_to(&self, path: &Path, key: Option<&TapeKey>) -> Result<(), TapeError> {
        let json = serde_json::to_vec_pretty(self)?;
        let payload = match key {
            Some(key) => tape_crypto::seal(key, &json)?,
            None => json,
        };
        std::fs::write(path, payload)
            .map_err(|source| TapeError::Io { path: path.to_path_buf(), source })
    }
}

struct RecorderState {
    tape: Tape,
    index: HashMap<String, Vec<usize>>,
}

/// Appends entries in memory and flushes to disk at graceful shutdown.
/// Single conceptual writer; concurrent appends serialize on the lock.
pub struct TapeRecorder {
    path: PathBuf,
    key: Option<TapeKey>,
    state: Mutex<RecorderState>,
    sequence: AtomicU64,
}

impl TapeRecorder {
    /// Create a recorder that will flush to `path`.
    pub fn new(path: impl Into<PathBuf>, key: Option<TapeKey>) -> Self {
        Self {
            path: path.into(),
            key,
            state: Mutex::new(RecorderState { tape: Tape::new(), index: HashMap::new() }),
            sequence: AtomicU64::new(0),
        }
    }

    /// Append one exchange. Assigns and returns the entry's sequence.
    pub fn append(
        &self,
        fingerprint: RequestFingerprint,
        response: &FlowResponse,
        chaos: ChaosContext,
    ) -> u64 {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let entry = TapeEntry {
            fingerprint,
            response_snapshot: ResponseSnapshot::from_response(response),
            chaos_context: chaos,
            timestamp: Utc::now(),
            sequence,
        };
        let mut state = self.state.lock();
        let index = state.tape.entries.len();
        state.index.entry(entry.fingerprint.key()).or_default().push(index);
        state.tape.entries.push(entry);
        debug!(sequence, "recorded tape entry");
        sequence
    }

    /// Number of recorded entries.
    pub fn len(&self) -> usize {
        self.state.lock().tape.entries.len()
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flush the tape to disk. Fatal in RECORD mode when it fails.
    pub fn flush(&self) -> Result<(), TapeError> {
        let state = self.state.lock();
        state.tape.write_to(&self.path, self.key.as_ref())?;
        info!(
            path = %self.path.display(),
            entries = state.tape.entries.len(),
            encrypted = self.key.is_some(),
            "flushed tape"
        );
        Ok(())
    }
}

/// Serves recorded responses. Read-only after load; the per-fingerprint
/// FIFO cursors are the only mutable state and sit behind a short lock.
pub struct TapePlayer {
    entries: Vec<TapeEntry>,
    queues: Mutex<PlayerQueues>,
}

struct PlayerQueues {
    by_fingerprint: HashMap<String, VecDeque<usize>>,
    by_partial: HashMap<String, VecDeque<usize>>,
}

/// What the player matched on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapeHit {
    /// Full fingerprint match
    Exact,
    /// Fallback (method, normalized URL) match
    Partial,
}

impl TapePlayer {
    /// Load and index a tape file.
    pub fn load(path: &Path, key: Option<&TapeKey>) -> Result<Self, TapeError> {
        Ok(Self::from_tape(Tape::read_from(path, key)?))
    }

    /// Index an in-memory tape.
    pub fn from_tape(tape: Tape) -> Self {
        let mut by_fingerprint: HashMap<String, VecDeque<usize>> = HashMap::new();
        let mut by_partial: HashMap<String, VecDeque<usize>> = HashMap::new();
        let mut entries = tape.entries;
        entries.sort_by_key(|entry| entry.sequence);
        for (index, entry) in entries.iter().enumerate() {
            by_fingerprint.entry(entry.fingerprint.key()).or_default().push_back(index);
            by_partial.entry(entry.fingerprint.partial_key()).or_default().push_back(index);
        }
        Self { entries, queues: Mutex::new(PlayerQueues { by_fingerprint, by_partial }) }
    }

    /// Number of entries on the tape.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the tape is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pop the next entry matching the fingerprint: exact FIFO first, then
    /// the partial (method, URL) index. `None` means a tape miss.
    pub fn serve(&self, fingerprint: &RequestFingerprint) -> Option<(TapeEntry, TapeHit)> {
        let mut guard = self.queues.lock();
        let queues = &mut *guard;

        if let Some(queue) = queues.by_fingerprint.get_mut(&fingerprint.key()) {
            if let Some(index) = queue.pop_front() {
                let entry = self.entries[index].clone();
                remove_from(&mut queues.by_partial, &entry.fingerprint.partial_key(), index);
                return Some((entry, TapeHit::Exact));
            }
        }

        if let Some(queue) = queues.by_partial.get_mut(&fingerprint.partial_key()) {
            if let Some(index) = queue.pop_front() {
                let entry = self.entries[index].clone();
                remove_from(&mut queues.by_fingerprint, &entry.fingerprint.key(), index);
                warn!(url = %fingerprint.normalized_url, "tape served on partial fingerprint match");
                return Some((entry, TapeHit::Partial));
            }
        }

        None
    }
}

fn remove_from(map: &mut HashMap<String, VecDeque<usize>>, queue_key: &str, index: usize) {
    if let Some(queue) = map.get_mut(queue_key) {
        queue.retain(|&i| i != index);
    }
}

/// Synthesize the terminal 404 served on a tape miss. The body documents
/// the missing fingerprint so the failing request is diagnosable offline.
pub fn miss_response(fingerprint: &RequestFingerprint) -> FlowResponse {
    let body = serde_json::json!({
        "error": "tape_miss",
        "message": "no recorded response for this request",
        "fingerprint": fingerprint,
    });
    let body = serde_json::to_vec_pretty(&body).unwrap_or_default();
    let mut headers = Headers::new();
    headers.insert("content-type".to_string(), "application/json".to_string());
    headers.insert("content-length".to_string(), body.len().to_string());
    FlowResponse { status: 404, reason: "Not Found".to_string(), headers, body }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::Flow;
    use crate::plan::ReplayConfig;
    use tempfile::TempDir;

    fn fingerprint_for(url: &str, body: &[u8]) -> RequestFingerprint {
        let flow = Flow::new("GET", url, vec![], body.to_vec());
        RequestFingerprint::compute(&flow.request, &ReplayConfig::default())
    }

    fn response(status: u16, body: &[u8]) -> FlowResponse {
        FlowResponse {
            status,
            reason: "OK".to_string(),
            headers: Headers::new(),
            body: body.to_vec(),
        }
    }

    fn chaos() -> ChaosContext {
        ChaosContext {
            applied_strategies: vec!["latency".to_string()],
            chaos_applied: true,
            traffic_type: TrafficType::ToolCall,
            traffic_subtype: TrafficSubtype::None,
            agent_role: None,
        }
    }

    #[test]
    fn record_flush_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.tape.json");

        let recorder = TapeRecorder::new(&path, None);
        let fp = fingerprint_for("http://x/a", b"");
        recorder.append(fp.clone(), &response(200, b"hello"), chaos());
        recorder.flush().unwrap();

        let player = TapePlayer::load(&path, None).unwrap();
        assert_eq!(player.len(), 1);
        let (entry, hit) = player.serve(&fp).unwrap();
        assert_eq!(hit, TapeHit::Exact);
        assert_eq!(entry.response_snapshot.to_response().body, b"hello");
        assert_eq!(entry.chaos_context.applied_strategies, vec!["latency"]);
    }

    #[test]
    fn encrypted_round_trip_and_wrong_key() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.tape.enc");
        let key = TapeKey::from_env_value("tape-secret");

        let recorder = TapeRecorder::new(&path, Some(key.clone()));
        recorder.append(fingerprint_for("http://x/a", b""), &response(200, b"ok"), chaos());
        recorder.flush().unwrap();

        let raw = std::fs::read(&path).unwrap();
        assert!(tape_crypto::is_encrypted(&raw));

        assert!(TapePlayer::load(&path, None).is_err());
        let wrong = TapeKey::from_env_value("other");
        assert!(TapePlayer::load(&path, Some(&wrong)).is_err());
        let player = TapePlayer::load(&path, Some(&key)).unwrap();
        assert_eq!(player.len(), 1);
    }

    #[test]
    fn duplicate_fingerprints_serve_fifo() {
        let recorder = TapeRecorder::new("/tmp/unused.tape", None);
        let fp = fingerprint_for("http://x/a", b"");
        recorder.append(fp.clone(), &response(200, b"first"), chaos());
        recorder.append(fp.clone(), &response(200, b"second"), chaos());

        let tape = recorder.state.lock().tape.clone();
        let player = TapePlayer::from_tape(tape);

        let (first, _) = player.serve(&fp).unwrap();
        let (second, _) = player.serve(&fp).unwrap();
        assert_eq!(first.response_snapshot.to_response().body, b"first");
        assert_eq!(second.response_snapshot.to_response().body, b"second");
        assert!(first.sequence < second.sequence);
        assert!(player.serve(&fp).is_none());
    }

    #[test]
    fn partial_match_when_body_differs() {
        let recorder = TapeRecorder::new("/tmp/unused.tape", None);
        let recorded = fingerprint_for("http://x/q", br#"{"n":1}"#);
        recorder.append(recorded, &response(200, b"near"), chaos());

        let tape = recorder.state.lock().tape.clone();
        let player = TapePlayer::from_tape(tape);

        let incoming = fingerprint_for("http://x/q", br#"{"n":2}"#);
        let (entry, hit) = player.serve(&incoming).unwrap();
        assert_eq!(hit, TapeHit::Partial);
        assert_eq!(entry.response_snapshot.to_response().body, b"near");
        // a partial pop consumes the entry entirely
        assert!(player.serve(&incoming).is_none());
    }

    #[test]
    fn empty_tape_misses_everything() {
        let player = TapePlayer::from_tape(Tape::new());
        let fp = fingerprint_for("http://x/a", b"");
        assert!(player.serve(&fp).is_none());
        let miss = miss_response(&fp);
        assert_eq!(miss.status, 404);
        let body: serde_json::Value = serde_json::from_slice(&miss.body).unwrap();
        assert_eq!(body["error"], "tape_miss");
        assert_eq!(body["fingerprint"]["method"], "get");
    }
}
