//! Composition root (C1-C13 wiring). Thin binary: load `.env`, init
//! tracing, load config, build every component once, then run until
//! shutdown.
//!
//! The chat/admin HTTP surface is an external, interface-only collaborator
//! (the frontend adapters and their surrounding CLI/health/admin glue are
//! out of scope here) — this binary wires `ChatPipeline` and friends and
//! runs the scheduler, but does not itself expose a network listener. That
//! adapter is left to be built against this crate's public API.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use companion_config::{AppConfig, ProviderKeys};
use companion_llm::{EmbeddingClient, LlmClient, LlmClientConfig, LlmRouter};
use companion_memory::{ImportanceScorer, MemoryManager, MemoryManagerConfig};
use companion_personality::{AppraisalEngine, PersonalityStore};
use companion_runtime::{ChatPipeline, ProactiveScorer, ReflectionWorker, UserSerializer};
use companion_scheduler::{Scheduler, SchedulerConfig};
use companion_security::InjectionDetector;
use companion_stores::{KvCache, RelationalStore, UserProfileStore, VectorStore};
use tracing_subscriber::EnvFilter;

/// Repeat-offender threshold used as the fail-secure default offense count
/// while Redis is down.
const SECURE_DEFAULT_OFFENSES: u32 = 3;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = AppConfig::load_from("config/default.toml").context("loading config/default.toml")?;
    let keys = ProviderKeys::from_env().context("loading provider API keys from the environment")?;

    let relational = RelationalStore::connect(&config.stores.database_url, config.numeric.relational_pool_min, config.numeric.relational_pool_max)
        .await
        .context("connecting to the relational store")?;
    let vector = VectorStore::connect(&config.stores.qdrant_url, config.stores.embedding_dim).context("constructing the vector store client")?;
    let kv = Arc::new(KvCache::connect(&config.stores.redis_url, config.numeric.kv_pool_size, SECURE_DEFAULT_OFFENSES).context("constructing the KV cache pool")?);

    let primary_llm = LlmClient::new(
        "primary",
        LlmClientConfig {
            base_url: config.llm.primary_base_url.clone(),
            api_key: keys.primary_api_key.clone(),
            model: config.llm.primary_model.clone(),
            timeout: Duration::from_secs(config.llm.chat_timeout_secs),
        },
    );
    let fallback_llm = LlmClient::new(
        "fallback",
        LlmClientConfig {
            base_url: config.llm.fallback_base_url.clone(),
            api_key: keys.fallback_api_key.clone(),
            model: config.llm.fallback_model.clone(),
            timeout: Duration::from_secs(config.llm.chat_timeout_secs),
        },
    );
    let scoring_llm = LlmClient::new(
        "scoring",
        LlmClientConfig {
            base_url: config.llm.scoring_base_url.clone(),
            api_key: keys.scoring_api_key.clone(),
            model: config.llm.scoring_model.clone(),
            timeout: Duration::from_secs(config.llm.fast_timeout_secs),
        },
    );
    let llm_router = LlmRouter::new(primary_llm, fallback_llm, scoring_llm.clone());
    let embeddings = EmbeddingClient::new(
        config.llm.embedding_base_url.clone(),
        keys.embedding_api_key.clone(),
        "embedding-001",
        config.stores.embedding_dim,
        Duration::from_secs(config.llm.embedding_timeout_secs),
    );

    let profiles = UserProfileStore::new(relational.clone());
    let personality = PersonalityStore::new(relational.clone());
    let appraisal = AppraisalEngine::new(scoring_llm.clone());

    let importance = ImportanceScorer::new(scoring_llm, kv.clone(), Duration::from_secs(config.numeric.importance_cache_ttl_secs));
    let memory = MemoryManager::new(
        vector,
        relational.clone(),
        embeddings,
        importance,
        kv.clone(),
        MemoryManagerConfig {
            similarity_floor: config.numeric.memory_similarity_floor,
            conflict_threshold: config.numeric.memory_conflict_threshold,
            mmr_lambda: config.numeric.mmr_lambda_default,
            mmr_importance_weight: config.numeric.mmr_importance_weight,
            embedding_cache_ttl: Duration::from_secs(config.numeric.importance_cache_ttl_secs),
        },
    );

    let detector = InjectionDetector::new(
        scoring_llm_for_detector(&config, &keys),
        kv.clone(),
        config.numeric.security_confidence_threshold,
        config.numeric.security_offense_window_days,
        config.numeric.security_severe_pad_penalty,
    );

    let serializer = UserSerializer::new(Duration::from_secs(config.numeric.serializer_stale_after_secs));

    let chat_pipeline = ChatPipeline::new(
        serializer,
        profiles.clone(),
        detector,
        personality.clone(),
        appraisal,
        memory.clone(),
        llm_router.clone(),
        relational.clone(),
    );
    // `chat_pipeline` is this process's library surface for the (externally
    // built) chat frontend adapter; nothing in this binary drives it.
    let _ = chat_pipeline;

    let proactive = ProactiveScorer::new(profiles.clone(), personality.clone(), llm_router.clone(), kv.clone(), relational.clone(), config.numeric.max_proactive_per_day);

    let reflection = ReflectionWorker::new(personality.clone(), memory.clone(), llm_router, relational, config.numeric.pad_drift_rate, config.numeric.quirk_reinforcement_rate);

    let timezone = chrono_tz::Tz::from_str(&config.runtime.scheduler_timezone)
        .map_err(|_| anyhow::anyhow!("invalid scheduler_timezone: {}", config.runtime.scheduler_timezone))?;

    let scheduler = Scheduler::new(
        profiles,
        memory,
        personality,
        proactive,
        reflection,
        SchedulerConfig {
            timezone,
            shutdown_deadline: Duration::from_secs(config.numeric.scheduler_shutdown_deadline_secs),
            reflection_batch_size: config.numeric.max_reflection_batch_size,
            reflection_batch_pause: Duration::from_secs(1),
            memory_cleanup_age_days: config.numeric.memory_cleanup_age_days,
            memory_cleanup_importance_threshold: config.numeric.memory_cleanup_importance_threshold,
            engagement_inactive_after_days: config.numeric.engagement_inactive_after_days,
        },
    );

    let handle = scheduler.start();
    tracing::info!("companion gateway running");

    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    tracing::info!("shutdown signal received, draining in-flight jobs");
    handle.shutdown().await;

    Ok(())
}

/// The security classifier shares the scoring provider role, but needs its
/// own owned `LlmClient` since `LlmRouter` keeps its own copy.
fn scoring_llm_for_detector(config: &companion_config::AppConfig, keys: &ProviderKeys) -> LlmClient {
    LlmClient::new(
        "scoring",
        LlmClientConfig {
            base_url: config.llm.scoring_base_url.clone(),
            api_key: keys.scoring_api_key.clone(),
            model: config.llm.scoring_model.clone(),
            timeout: Duration::from_secs(config.llm.fast_timeout_secs),
        },
    )
}
