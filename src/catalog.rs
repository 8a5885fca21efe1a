//! Curated catalog of pullable GGUF models and hardware-aware recommendation

use crate::hardware::SystemCapability;
use serde::Serialize;
use tracing::debug;

/// Runtime memory overhead on top of the file size
const RAM_OVERHEAD: f64 = 1.2;
const FIT_BONUS: i32 = 10;
const DEFAULT_RECOMMENDATIONS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CatalogEntry {
    pub id: &'static str,
    pub repo_id: &'static str,
    pub filename: &'static str,
    pub name: &'static str,
    pub size_mb: u32,
    pub context: &'static str,
    pub use_cases: &'static [&'static str],
    pub min_ram_gb: u32,
    /// 1 (slow) to 10 (fast)
    pub speed_rating: u8,
}

impl CatalogEntry {
    /// Locator accepted by the artifact fetcher
    pub fn locator(&self) -> String {
        format!("{}/{}", self.repo_id, self.filename)
    }

    pub fn estimated_ram_gb(&self) -> f64 {
        self.size_mb as f64 / 1024.0 * RAM_OVERHEAD
    }

    pub fn fits(&self, capability: &SystemCapability) -> bool {
        self.estimated_ram_gb() <= capability.available_ram_gb
    }

    fn score(&self, capability: &SystemCapability) -> i32 {
        let fit = if self.fits(capability) { FIT_BONUS } else { -FIT_BONUS };
        fit + self.speed_rating as i32
    }
}

pub const CATALOG: &[CatalogEntry] = &[
    CatalogEntry {
        id: "phi3",
        repo_id: "microsoft/Phi-3-mini-4k-instruct-gguf",
        filename: "Phi-3-mini-4k-instruct-q4.gguf",
        name: "Phi-3 Mini 4K",
        size_mb: 2400,
        context: "4K",
        use_cases: &["coding", "reasoning", "mobile"],
        min_ram_gb: 4,
        speed_rating: 9,
    },
    CatalogEntry {
        id: "phi3-medium",
        repo_id: "microsoft/Phi-3-medium-4k-instruct-gguf",
        filename: "Phi-3-medium-4k-instruct-q4.gguf",
        name: "Phi-3 Medium 4K",
        size_mb: 8000,
        context: "4K",
        use_cases: &["complex-reasoning", "coding"],
        min_ram_gb: 10,
        speed_rating: 6,
    },
    CatalogEntry {
        id: "deepseek-coder",
        repo_id: "TheBloke/deepseek-coder-6.7B-instruct-GGUF",
        filename: "deepseek-coder-6.7b-instruct.Q4_K_M.gguf",
        name: "DeepSeek Coder 6.7B",
        size_mb: 4100,
        context: "16K",
        use_cases: &["coding", "python", "javascript"],
        min_ram_gb: 6,
        speed_rating: 7,
    },
    CatalogEntry {
        id: "starcoder2-3b",
        repo_id: "bartowski/StarCoder2-3b-GGUF",
        filename: "StarCoder2-3b-Q4_K_M.gguf",
        name: "StarCoder2 3B",
        size_mb: 2100,
        context: "16K",
        use_cases: &["coding", "completion"],
        min_ram_gb: 4,
        speed_rating: 8,
    },
    CatalogEntry {
        id: "mistral",
        repo_id: "bartowski/Mistral-Nemo-Instruct-2407-GGUF",
        filename: "Mistral-Nemo-Instruct-2407-Q4_K_M.gguf",
        name: "Mistral Nemo 12B",
        size_mb: 7800,
        context: "128K",
        use_cases: &["chat", "long-context", "general"],
        min_ram_gb: 10,
        speed_rating: 7,
    },
    CatalogEntry {
        id: "llama3",
        repo_id: "NousResearch/Hermes-2-Pro-Llama-3-8B-GGUF",
        filename: "Hermes-2-Pro-Llama-3-8B-Q4_K_M.gguf",
        name: "Hermes 2 Pro (Llama 3)",
        size_mb: 4900,
        context: "8K",
        use_cases: &["chat", "roleplay", "general"],
        min_ram_gb: 7,
        speed_rating: 7,
    },
    CatalogEntry {
        id: "gemma2",
        repo_id: "google/gemma-2-2b-it-GGUF",
        filename: "gemma-2-2b-it-Q4_K_M.gguf",
        name: "Gemma 2 2B IT",
        size_mb: 1600,
        context: "8K",
        use_cases: &["fast", "chat", "mobile"],
        min_ram_gb: 3,
        speed_rating: 9,
    },
    CatalogEntry {
        id: "qwen2.5",
        repo_id: "Qwen/Qwen2.5-7B-Instruct-GGUF",
        filename: "qwen2.5-7b-instruct-q4_k_m.gguf",
        name: "Qwen 2.5 7B",
        size_mb: 4700,
        context: "32K",
        use_cases: &["chat", "multilingual", "coding"],
        min_ram_gb: 7,
        speed_rating: 8,
    },
    CatalogEntry {
        id: "qwen2.5-1.5b",
        repo_id: "Qwen/Qwen2.5-1.5B-Instruct-GGUF",
        filename: "qwen2.5-1.5b-instruct-q4_k_m.gguf",
        name: "Qwen 2.5 1.5B",
        size_mb: 1100,
        context: "32K",
        use_cases: &["fast", "rag"],
        min_ram_gb: 2,
        speed_rating: 9,
    },
    CatalogEntry {
        id: "qwen2.5-0.5b",
        repo_id: "Qwen/Qwen2.5-0.5B-Instruct-GGUF",
        filename: "qwen2.5-0.5b-instruct-q4_k_m.gguf",
        name: "Qwen 2.5 0.5B",
        size_mb: 400,
        context: "32K",
        use_cases: &["tiny", "embedded"],
        min_ram_gb: 1,
        speed_rating: 10,
    },
    CatalogEntry {
        id: "tinyllama",
        repo_id: "TheBloke/TinyLlama-1.1B-Chat-v1.0-GGUF",
        filename: "tinyllama-1.1b-chat-v1.0.Q4_K_M.gguf",
        name: "TinyLlama 1.1B",
        size_mb: 700,
        context: "2K",
        use_cases: &["fast", "mobile", "edge"],
        min_ram_gb: 1,
        speed_rating: 10,
    },
    CatalogEntry {
        id: "mixtral-8x7b",
        repo_id: "TheBloke/Mixtral-8x7B-Instruct-v0.1-GGUF",
        filename: "mixtral-8x7b-instruct-v0.1.Q4_K_M.gguf",
        name: "Mixtral 8x7B MoE",
        size_mb: 26000,
        context: "32K",
        use_cases: &["advanced", "expert", "server"],
        min_ram_gb: 32,
        speed_rating: 4,
    },
];

/// Task keyword to the catalog id it maps to
const TASKS: &[(&str, &str)] = &[
    ("coding", "phi3"),
    ("code", "deepseek-coder"),
    ("programming", "deepseek-coder"),
    ("scripting", "starcoder2-3b"),
    ("chat", "mistral"),
    ("assistant", "llama3"),
    ("fast", "gemma2"),
    ("quick", "qwen2.5-1.5b"),
    ("speed", "tinyllama"),
    ("reasoning", "phi3-medium"),
    ("rag", "qwen2.5"),
    ("tiny", "qwen2.5-0.5b"),
    ("edge", "tinyllama"),
];

pub fn get(id: &str) -> Option<&'static CatalogEntry> {
    CATALOG.iter().find(|e| e.id.eq_ignore_ascii_case(id))
}

/// Finds the entry a free-text query names, by id or display name. The
/// longest matching id wins so "phi3-medium" is not read as "phi3".
pub fn find_mentioned(query: &str) -> Option<&'static CatalogEntry> {
    let query = query.to_lowercase();
    CATALOG
        .iter()
        .filter(|e| query.contains(e.id) || query.contains(&e.name.to_lowercase()))
        .max_by_key(|e| e.id.len())
}

fn find_by_task(query: &str) -> Option<&'static CatalogEntry> {
    let query = query.to_lowercase();
    TASKS
        .iter()
        .find(|(task, _)| query.contains(task))
        .and_then(|(_, id)| get(id))
}

#[derive(Debug, Clone, Serialize)]
pub struct Recommendation {
    pub rank: usize,
    pub entry: CatalogEntry,
    pub estimated_ram_gb: f64,
    pub fits: bool,
    /// Rough tokens/sec guess derived from the speed rating
    pub speed_estimate: u32,
    pub reasoning: String,
}

impl Recommendation {
    fn new(entry: &CatalogEntry, capability: &SystemCapability, rank: usize) -> Self {
        let fits = entry.fits(capability);
        let speed_estimate = entry.speed_rating as u32 * 10;
        let reasoning = format!(
            "{} ({:.1}GB) {} available {:.1}GB RAM. Estimated {} t/s. Best for: {}.",
            entry.name,
            entry.size_mb as f64 / 1024.0,
            if fits { "fits" } else { "EXCEEDS" },
            capability.available_ram_gb,
            speed_estimate,
            entry.use_cases.join(", ")
        );
        Self {
            rank,
            entry: *entry,
            estimated_ram_gb: entry.estimated_ram_gb(),
            fits,
            speed_estimate,
            reasoning,
        }
    }
}

/// Every entry ordered by fit and speed, best first
pub fn rank(capability: &SystemCapability) -> Vec<Recommendation> {
    let mut entries: Vec<&CatalogEntry> = CATALOG.iter().collect();
    // stable sort keeps catalog order among equal scores
    entries.sort_by_key(|e| std::cmp::Reverse(e.score(capability)));
    entries
        .into_iter()
        .enumerate()
        .map(|(i, e)| Recommendation::new(e, capability, i + 1))
        .collect()
}

/// Answers a free-text request: a named model, then a task keyword, then the
/// top-ranked models for this machine
pub fn recommend(query: &str, capability: &SystemCapability) -> Vec<Recommendation> {
    if let Some(entry) = find_mentioned(query) {
        debug!(model = entry.id, "Query names a catalog model");
        return vec![Recommendation::new(entry, capability, 1)];
    }
    if let Some(entry) = find_by_task(query) {
        debug!(model = entry.id, "Query matches a task keyword");
        return vec![Recommendation::new(entry, capability, 1)];
    }

    let mut ranked = rank(capability);
    ranked.truncate(DEFAULT_RECOMMENDATIONS);
    ranked
}
