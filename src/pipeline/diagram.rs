//! Diagram resolution: fenced diagram source → image or placeholder.
//!
//! Each unique source is rendered at most once per [`DiagramCache`]. Within a
//! request, cache misses are rendered concurrently (bounded by
//! `diagram_concurrency`) via `futures::stream::buffer_unordered`; blocks are
//! then reassembled in document order. A failure never fails the request: the
//! block becomes a [`Block::DiagramPlaceholder`] naming the diagram kind and
//! the cause.

use super::parse::DiagramSource;
use super::table::PendingBlock;
use crate::config::RenderConfig;
use crate::error::DiagramError;
use crate::model::{Block, ImageSource};
use crate::process::{run_file_tool, FileJob, ToolRunner};
use crate::progress::DiagramOutcome;
use futures::stream::{self, StreamExt};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Content-addressed store of rendered diagram images.
///
/// Append-only and never invalidated. Safe to share across concurrent
/// renders; two renders racing on the same key keep the first image.
#[derive(Debug, Default)]
pub struct DiagramCache {
    entries: RwLock<HashMap<String, Arc<[u8]>>>,
}

impl DiagramCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Arc<[u8]>> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    /// Insert `bytes` unless the key is already present; returns the stored value.
    pub fn insert(&self, key: String, bytes: Arc<[u8]>) -> Arc<[u8]> {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(key)
            .or_insert(bytes)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// SHA-256 hex of the raw diagram source. The fence tag is not part of the
/// key: every diagram language goes through the same tool.
pub fn cache_key(source: &str) -> String {
    hex::encode(Sha256::digest(source.as_bytes()))
}

/// Human-readable diagram kind from the first non-empty source line.
pub fn diagram_kind(source: &str) -> &'static str {
    let first = source
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty() && !l.starts_with("%%"))
        .unwrap_or("");
    let keyword = first.split_whitespace().next().unwrap_or("");
    match keyword {
        "graph" | "flowchart" => "Flowchart",
        "sequenceDiagram" => "Sequence Diagram",
        "classDiagram" => "Class Diagram",
        k if k.starts_with("stateDiagram") => "State Diagram",
        "erDiagram" => "Entity Relationship Diagram",
        "journey" => "User Journey",
        "gantt" => "Gantt Chart",
        "pie" => "Pie Chart",
        _ => "Diagram",
    }
}

/// Result of resolving one request's diagrams.
#[derive(Debug, Default)]
pub struct Resolved {
    pub blocks: Vec<Block>,
    /// One entry per diagram block, in document order.
    pub outcomes: Vec<DiagramOutcome>,
}

/// Resolves [`PendingBlock::Diagram`]s through the diagram tool and cache.
pub struct DiagramResolver<'a> {
    pub runner: &'a dyn ToolRunner,
    pub cache: &'a DiagramCache,
    pub config: &'a RenderConfig,
    /// `false` when the capability probe found no diagram tool; every miss
    /// then becomes a placeholder without spawning anything.
    pub tool_available: bool,
}

impl DiagramResolver<'_> {
    pub async fn resolve(&self, blocks: Vec<PendingBlock>) -> Resolved {
        // ── Collect unique cache misses ──────────────────────────────────
        let mut misses: Vec<(String, &DiagramSource)> = Vec::new();
        for block in &blocks {
            if let PendingBlock::Diagram(d) = block {
                let key = cache_key(&d.source);
                if self.cache.get(&key).is_none() && !misses.iter().any(|(k, _)| *k == key) {
                    misses.push((key, d));
                }
            }
        }

        // ── Render misses concurrently ───────────────────────────────────
        let mut failures: HashMap<String, String> = HashMap::new();
        let mut fresh: HashSet<String> = HashSet::new();
        if !misses.is_empty() {
            info!("Rendering {} diagram(s)", misses.len());
            let results: Vec<(String, Result<Arc<[u8]>, DiagramError>)> =
                stream::iter(misses.into_iter().map(|(key, d)| async move {
                    let result = self.render_one(d).await;
                    (key, result)
                }))
                .buffer_unordered(self.config.diagram_concurrency.max(1))
                .collect()
                .await;

            for (key, result) in results {
                match result {
                    Ok(bytes) => {
                        self.cache.insert(key.clone(), bytes);
                        fresh.insert(key);
                    }
                    Err(e) => {
                        failures.insert(key, e.to_string());
                    }
                }
            }
        }

        // ── Reassemble in document order ─────────────────────────────────
        let mut resolved = Resolved {
            blocks: Vec::with_capacity(blocks.len()),
            outcomes: Vec::new(),
        };
        for block in blocks {
            let d = match block {
                PendingBlock::Ready(b) => {
                    resolved.blocks.push(b);
                    continue;
                }
                PendingBlock::Diagram(d) => d,
            };
            let key = cache_key(&d.source);
            let kind = diagram_kind(&d.source);
            let hit = self.cache.get(&key);
            let (block, outcome) = match hit.map(ImageSource::embedded) {
                Some(Ok(source)) => {
                    // Only the first occurrence of a fresh key counts as rendered.
                    let outcome = if fresh.remove(&key) {
                        DiagramOutcome::Rendered
                    } else {
                        debug!("Diagram cache hit {}", &key[..12]);
                        DiagramOutcome::Cached
                    };
                    (
                        Block::Image {
                            source,
                            caption: None,
                        },
                        outcome,
                    )
                }
                Some(Err(e)) => placeholder(d, kind, &format!("cached image unreadable: {e}")),
                None => {
                    let cause = failures
                        .get(&key)
                        .cloned()
                        .unwrap_or_else(|| "diagram tool unavailable".to_string());
                    placeholder(d, kind, &cause)
                }
            };
            resolved.blocks.push(block);
            resolved.outcomes.push(outcome);
        }
        resolved
    }

    async fn render_one(&self, d: &DiagramSource) -> Result<Arc<[u8]>, DiagramError> {
        if !self.tool_available {
            return Err(DiagramError::Tool(crate::error::ToolError::NotFound {
                program: self.config.diagram_tool.program.clone(),
            }));
        }
        let bytes = run_file_tool(
            self.runner,
            &self.config.diagram_tool,
            FileJob {
                input_name: "diagram.mmd",
                input: d.source.as_bytes(),
                output_name: "diagram.png",
                extra: Vec::new(),
                timeout: Duration::from_secs(self.config.diagram_timeout_secs),
            },
        )
        .await?;
        let bytes: Arc<[u8]> = Arc::from(bytes);
        // Reject anything we could not embed later.
        ImageSource::embedded(bytes.clone()).map_err(DiagramError::InvalidImage)?;
        Ok(bytes)
    }
}

fn placeholder(d: DiagramSource, kind: &str, cause: &str) -> (Block, DiagramOutcome) {
    warn!("{} could not be rendered: {}", kind, cause);
    let reason = format!("{kind} could not be rendered: {cause}");
    (
        Block::DiagramPlaceholder {
            source: d.source,
            reason: reason.clone(),
        },
        DiagramOutcome::Placeholder(reason),
    )
}
