//! Splitting of oversize records into `CHUNK_START`/`CHUNK_PART`/`CHUNK_END`
//! sequences, and their reassembly on the receiving side.
//!
//! The body of a record (everything after its tag, leading delimiter
//! included) is cut into fixed-size slices. Reassembly prepends the tag to the
//! concatenated slices, which reproduces the original record exactly.

use crate::codec::{encode, split_tag};
use crate::protocol::Message;
use arena_core::{PeerId, SimTime};
use rand::rngs::StdRng;
use rand::Rng;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Bytes reserved in every `CHUNK_PART` for its tag, stream id and index.
pub const CHUNK_ENVELOPE_OVERHEAD: usize = 50;

/// Assemblies older than this are abandoned by [`ChunkTable::sweep`].
pub const DEFAULT_ASSEMBLY_MAX_AGE: Duration = Duration::from_secs(10);

/// Largest record the receiving side will reassemble.
pub const MAX_REASSEMBLED_LEN: usize = 1 << 20;

/// Smallest slice a stream is assumed to use when bounding its part count.
const MIN_SLICE_LEN: usize = 256;

/// Part counts and indices at or above this are dropped on receipt.
pub const MAX_CHUNK_PARTS: usize = MAX_REASSEMBLED_LEN / MIN_SLICE_LEN;

/// Outbound side: decides when to chunk and produces the physical records.
pub struct Chunker {
    ceiling: usize,
    counter: u32,
    rng: StdRng,
}

impl Chunker {
    /// Create a chunker for a transport that accepts at most `ceiling` bytes.
    pub fn new(ceiling: usize, rng: StdRng) -> Self {
        Self {
            ceiling,
            counter: 0,
            rng,
        }
    }

    /// Transport ceiling in bytes.
    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Data bytes carried by one `CHUNK_PART`.
    pub fn slice_len(&self) -> usize {
        self.ceiling.saturating_sub(CHUNK_ENVELOPE_OVERHEAD).max(1)
    }

    /// Whether `wire` must be chunked to fit the transport.
    pub fn needs_chunking(&self, wire: &str) -> bool {
        wire.len() > self.ceiling
    }

    /// Produce the physical records for `wire`.
    ///
    /// Records that fit are returned unchanged as a single element.
    pub fn split(&mut self, wire: &str) -> Vec<String> {
        if !self.needs_chunking(wire) {
            return vec![wire.to_string()];
        }
        let Some((tag, _)) = split_tag(wire) else {
            warn!(len = wire.len(), "oversize record has no tag; sending unchunked");
            return vec![wire.to_string()];
        };

        let body = &wire[tag.len()..];
        let slices = slice_on_char_boundaries(body, self.slice_len());
        if slices.len() > MAX_CHUNK_PARTS {
            warn!(
                len = wire.len(),
                parts = slices.len(),
                "record needs more parts than receivers accept"
            );
        }
        let chunk_id = self.next_chunk_id();
        debug!(
            %chunk_id,
            kind = tag,
            parts = slices.len(),
            len = wire.len(),
            "chunking record"
        );

        let mut out = Vec::with_capacity(slices.len() + 2);
        out.push(encode(&Message::ChunkStart {
            kind_tag: tag.to_string(),
            total: slices.len(),
            chunk_id: chunk_id.clone(),
        }));
        for (index, data) in slices.into_iter().enumerate() {
            out.push(encode(&Message::ChunkPart {
                chunk_id: chunk_id.clone(),
                index,
                data: data.to_string(),
            }));
        }
        out.push(encode(&Message::ChunkEnd { chunk_id }));
        out
    }

    /// Monotonic counter plus a random suffix, so ids stay unique across a
    /// peer restarting mid-session.
    fn next_chunk_id(&mut self) -> String {
        self.counter = self.counter.wrapping_add(1);
        let suffix: u16 = self.rng.gen();
        format!("{:x}_{:04x}", self.counter, suffix)
    }
}

fn slice_on_char_boundaries(body: &str, max: usize) -> Vec<&str> {
    let mut slices = Vec::new();
    let mut rest = body;
    while !rest.is_empty() {
        let mut end = max.min(rest.len());
        while !rest.is_char_boundary(end) {
            end -= 1;
        }
        if end == 0 {
            // A single char wider than the slice; take it whole.
            end = rest.chars().next().map(char::len_utf8).unwrap_or(rest.len());
        }
        let (head, tail) = rest.split_at(end);
        slices.push(head);
        rest = tail;
    }
    slices
}

/// One in-flight chunked record.
#[derive(Debug, Clone)]
struct ChunkAssembly {
    kind_tag: String,
    expected_count: usize,
    parts: Vec<String>,
    started_at: SimTime,
}

impl ChunkAssembly {
    fn is_complete(&self) -> bool {
        !self.kind_tag.is_empty()
            && self.expected_count > 0
            && self.parts.len() == self.expected_count
            && self.parts.iter().all(|p| !p.is_empty())
    }

    fn missing(&self) -> usize {
        let empty = self.parts.iter().filter(|p| p.is_empty()).count();
        empty + self.expected_count.saturating_sub(self.parts.len())
    }
}

/// Result of a `CHUNK_END`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkEndOutcome {
    /// Every slot was filled; the reassembled record.
    Completed(String),
    /// Slots are still empty; the assembly stays pending.
    Incomplete {
        /// Number of empty or undeclared slots.
        missing: usize,
    },
    /// No assembly exists for this stream.
    UnknownStream,
}

/// Inbound side: assemblies keyed by sender and stream id.
#[derive(Default)]
pub struct ChunkTable {
    assemblies: HashMap<(PeerId, String), ChunkAssembly>,
}

impl ChunkTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle a `CHUNK_START`. Returns `false` if the record was dropped.
    ///
    /// A duplicate start keeps whatever parts already arrived.
    pub fn start(
        &mut self,
        sender: &PeerId,
        chunk_id: &str,
        kind_tag: &str,
        total: usize,
        now: SimTime,
    ) -> bool {
        if total > MAX_CHUNK_PARTS {
            debug!(%sender, %chunk_id, total, "chunk start declares too many parts");
            return false;
        }
        let assembly = self.assembly(sender, chunk_id, now);
        assembly.kind_tag = kind_tag.to_string();
        if assembly.parts.len() < total {
            assembly.parts.resize(total, String::new());
        }
        assembly.expected_count = assembly.parts.len();
        true
    }

    /// Handle a `CHUNK_PART`, growing the slot array if the sender
    /// under-declared the count. Returns `false` if the record was dropped.
    ///
    /// A part arriving before its start opens an assembly without a tag; the
    /// late start fills it in.
    pub fn part(
        &mut self,
        sender: &PeerId,
        chunk_id: &str,
        index: usize,
        data: &str,
        now: SimTime,
    ) -> bool {
        if index >= MAX_CHUNK_PARTS {
            debug!(%sender, %chunk_id, index, "chunk part index out of range");
            return false;
        }
        let assembly = self.assembly(sender, chunk_id, now);
        if index >= assembly.parts.len() {
            assembly.parts.resize(index + 1, String::new());
            assembly.expected_count = assembly.parts.len();
        }
        assembly.parts[index] = data.to_string();
        true
    }

    fn assembly(&mut self, sender: &PeerId, chunk_id: &str, now: SimTime) -> &mut ChunkAssembly {
        self.assemblies
            .entry((sender.clone(), chunk_id.to_string()))
            .or_insert_with(|| ChunkAssembly {
                kind_tag: String::new(),
                expected_count: 0,
                parts: Vec::new(),
                started_at: now,
            })
    }

    /// Handle a `CHUNK_END`.
    pub fn end(&mut self, sender: &PeerId, chunk_id: &str) -> ChunkEndOutcome {
        let key = (sender.clone(), chunk_id.to_string());
        let Some(assembly) = self.assemblies.get(&key) else {
            return ChunkEndOutcome::UnknownStream;
        };
        if !assembly.is_complete() {
            return ChunkEndOutcome::Incomplete {
                missing: assembly.missing().max(1),
            };
        }

        let assembly = match self.assemblies.remove(&key) {
            Some(assembly) => assembly,
            None => return ChunkEndOutcome::UnknownStream,
        };
        let mut record = assembly.kind_tag;
        for part in &assembly.parts {
            record.push_str(part);
        }
        ChunkEndOutcome::Completed(record)
    }

    /// Drop assemblies started more than `max_age` ago. Returns how many.
    pub fn sweep(&mut self, now: SimTime, max_age: Duration) -> usize {
        let before = self.assemblies.len();
        self.assemblies
            .retain(|_, a| now.since(a.started_at) < max_age);
        before - self.assemblies.len()
    }

    /// Number of assemblies still pending.
    pub fn pending(&self) -> usize {
        self.assemblies.len()
    }
}
